//! Session state machine
//!
//! The coordinator owns both audio lines and reacts to server events one at a
//! time, in arrival order. Workers inside the lines never touch the session
//! state; they only exchange frames with the coordinator through queues.

use crate::audio::{AudioBackend, AudioFormat};
use crate::capture::CaptureLine;
use crate::client::{EventStream, Outbound};
use crate::error::Result;
use crate::playback::PlaybackLine;
use crate::realtime::{ServerEvent, SessionConfig};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    SessionConfiguring,
    Ready,
    Listening,
    Responding,
    ShuttingDown,
}

/// Why [`SessionCoordinator::run`] returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server closed the channel.
    ChannelClosed,
    /// The shutdown signal fired.
    Interrupted,
}

pub struct SessionCoordinator {
    backend: Arc<dyn AudioBackend>,
    format: AudioFormat,
    session: SessionConfig,
    state: SessionState,
    outbound: Option<Outbound>,
    capture: Option<CaptureLine>,
    playback: PlaybackLine,
}

impl SessionCoordinator {
    pub fn new(backend: Arc<dyn AudioBackend>, session: SessionConfig) -> Self {
        let format = AudioFormat::default();
        Self {
            playback: PlaybackLine::new(backend.clone(), format),
            backend,
            format,
            session,
            state: SessionState::Idle,
            outbound: None,
            capture: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.as_ref().is_some_and(CaptureLine::is_capturing)
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_active()
    }

    /// Response frames waiting for the speaker.
    pub fn queued_playback(&self) -> usize {
        self.playback.queued()
    }

    /// Establish the channel with `connect`, send the session configuration
    /// and open the speaker. Returns the inbound event stream.
    pub async fn start<F>(&mut self, connect: F) -> Result<EventStream>
    where
        F: Future<Output = Result<(Outbound, EventStream)>>,
    {
        self.transition(SessionState::Connecting);
        let (outbound, events) = match connect.await {
            Ok(channel) => channel,
            Err(e) => {
                error!("Connection error: {}", e);
                self.transition(SessionState::ShuttingDown);
                return Err(e);
            }
        };

        info!("Setting up voice conversation session...");
        if let Err(e) = outbound.update_session(self.session.clone()) {
            self.transition(SessionState::ShuttingDown);
            return Err(e);
        }
        info!("Session configuration sent");

        if let Err(e) = blocking(|| self.playback.start()) {
            error!("Failed to initialize audio playback: {}", e);
        }
        self.capture = Some(CaptureLine::new(self.backend.clone(), self.format, outbound.clone()));
        self.outbound = Some(outbound);
        self.transition(SessionState::SessionConfiguring);
        Ok(events)
    }

    /// Apply one server event.
    pub fn handle_event(&mut self, event: ServerEvent) {
        debug!("Received event: {}", event.kind());
        if self.state == SessionState::ShuttingDown {
            debug!("Ignoring {} during shutdown", event.kind());
            return;
        }

        match event {
            ServerEvent::SessionUpdated { session } => {
                info!("Session ready: {}", session.id);
                if self.state == SessionState::SessionConfiguring {
                    self.transition(SessionState::Ready);
                }
                if let Some(capture) = self.capture.as_mut() {
                    if let Err(e) = blocking(|| capture.start()) {
                        error!("Failed to start audio capture: {}", e);
                    }
                }
            }
            ServerEvent::SpeechStarted => {
                if !matches!(self.state, SessionState::Ready | SessionState::Responding) {
                    debug!("Ignoring speech start in state {:?}", self.state);
                    return;
                }
                info!("🎤 User started speaking - stopping playback");
                println!("🎤 Listening...");
                self.transition(SessionState::Listening);

                blocking(|| self.playback.stop());
                self.cancel_response();
            }
            ServerEvent::SpeechStopped => {
                if self.state != SessionState::Listening {
                    debug!("Ignoring speech stop in state {:?}", self.state);
                    return;
                }
                info!("🎤 User stopped speaking");
                println!("🤔 Processing...");
                self.transition(SessionState::Responding);

                if let Err(e) = blocking(|| self.playback.start()) {
                    error!("Failed to restart audio playback: {}", e);
                }
            }
            ServerEvent::ResponseCreated => info!("🤖 Assistant response created"),
            ServerEvent::AudioDelta { delta } => match delta.decode() {
                Ok(frame) => {
                    debug!("Received audio delta ({} bytes)", frame.len());
                    self.playback.enqueue(frame);
                }
                Err(e) => error!("Failed to decode audio delta: {}", e),
            },
            ServerEvent::AudioDone => {
                info!("🤖 Assistant finished speaking");
                println!("🎤 Ready for next input...");
            }
            ServerEvent::ResponseDone => info!("✅ Response complete"),
            ServerEvent::Error { error } => {
                if error.is_cancel_not_active() {
                    debug!("No response to cancel: {}", error.message);
                } else {
                    let err = error.to_error();
                    error!("❌ {}", err);
                    println!("❌ {}", err);
                }
            }
            ServerEvent::ConversationItemCreated { item } => {
                debug!("Conversation item created: {}", item.id)
            }
            ServerEvent::Unknown => debug!("Unhandled event type"),
        }
    }

    /// Dispatch events until the channel closes, `shutdown` resolves or the
    /// stream reports an error. Both lines are stopped on every exit path.
    pub async fn run<S>(&mut self, mut events: EventStream, shutdown: S) -> Result<SessionEnd>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Received shutdown signal");
                    break Ok(SessionEnd::Interrupted);
                }
                event = events.recv() => match event {
                    Some(Ok(event)) => self.handle_event(event),
                    Some(Err(e)) => {
                        error!("Error processing events: {}", e);
                        break Err(e);
                    }
                    None => {
                        info!("Event stream closed");
                        break Ok(SessionEnd::ChannelClosed);
                    }
                },
            }
        };

        self.shutdown();
        result
    }

    /// Stop capture, then playback, and release the outbound channel.
    pub fn shutdown(&mut self) {
        self.transition(SessionState::ShuttingDown);
        let capture = self.capture.take();
        let playback = &mut self.playback;
        blocking(move || {
            if let Some(mut capture) = capture {
                capture.stop();
            }
            playback.stop();
        });
        self.outbound = None;
    }

    fn cancel_response(&self) {
        let Some(outbound) = &self.outbound else {
            return;
        };
        if let Err(e) = outbound.cancel_response() {
            debug!("No response to cancel: {}", e);
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("Session state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}

/// Run a line operation that may block (device open, bounded joins) without
/// starving other tasks on a multi-threaded runtime.
fn blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        if self.state != SessionState::ShuttingDown && self.state != SessionState::Idle {
            self.shutdown();
        }
    }
}
