//! Speaker playback line
//!
//! Decoded response audio is queued by the control flow and written to the
//! output stream by a single worker thread. Stopping drains the queue, so a
//! barge-in silences the assistant after at most the frame being written.

use crate::audio::{AudioBackend, AudioFormat, AudioFrame};
use crate::error::{Result, VoiceError};
use crate::queue::FrameQueue;
use crate::worker::{Worker, JOIN_TIMEOUT};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// Response deltas are variable-sized; this bounds memory during an output stall.
pub const PLAYBACK_QUEUE_CAPACITY: usize = 2048;

const POP_TIMEOUT: Duration = Duration::from_millis(100);
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PlaybackLine {
    backend: Arc<dyn AudioBackend>,
    format: AudioFormat,
    active: Option<ActivePlayback>,
}

struct ActivePlayback {
    running: Arc<AtomicBool>,
    queue: FrameQueue<AudioFrame>,
    worker: Worker,
}

impl PlaybackLine {
    pub fn new(backend: Arc<dyn AudioBackend>, format: AudioFormat) -> Self {
        Self {
            backend,
            format,
            active: None,
        }
    }

    /// Open the output stream with an empty queue. No-op if already active.
    pub fn start(&mut self) -> Result<()> {
        if self.active.is_some() {
            debug!("Playback already running");
            return Ok(());
        }

        let running = Arc::new(AtomicBool::new(true));
        let queue = FrameQueue::<AudioFrame>::new("playback", PLAYBACK_QUEUE_CAPACITY);
        let (ready_tx, ready_rx) = bounded(1);

        let worker = {
            let backend = self.backend.clone();
            let format = self.format;
            let running = running.clone();
            let queue = queue.clone();
            Worker::spawn("playback-drain", move || {
                let mut stream = match backend.open_output(&format) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let mut written = 0usize;
                while running.load(Ordering::SeqCst) {
                    let Some(frame) = queue.pop_timeout(POP_TIMEOUT) else {
                        continue;
                    };
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(e) = stream.write(frame.as_bytes()) {
                        if running.swap(false, Ordering::SeqCst) {
                            error!("Error in audio playback: {}", e);
                        }
                        break;
                    }
                    written += frame.len();
                }

                // Discard whatever the device still has buffered
                stream.flush();
                debug!("Playback worker exiting after {:?} of audio", format.duration_of(written));
            })
            .map_err(VoiceError::device)?
        };

        let opened = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(result) => result,
            Err(_) => Err(VoiceError::device("output stream did not open in time")),
        };
        if let Err(e) = opened {
            running.store(false, Ordering::SeqCst);
            worker.join_timeout(JOIN_TIMEOUT);
            return Err(e);
        }

        self.active = Some(ActivePlayback {
            running,
            queue,
            worker,
        });
        info!("🔊 Started audio playback");
        Ok(())
    }

    /// Queue a frame for playback. Returns `false` (and drops it) if the line is inactive.
    pub fn enqueue(&self, frame: AudioFrame) -> bool {
        match &self.active {
            Some(active) if active.running.load(Ordering::SeqCst) => {
                active.queue.push(frame);
                true
            }
            _ => {
                trace!("Playback inactive, dropping {} bytes", frame.len());
                false
            }
        }
    }

    /// Discard queued audio, close the output stream and join the worker.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.running.store(false, Ordering::SeqCst);
        let discarded = active.queue.drain();
        active.worker.join_timeout(JOIN_TIMEOUT);
        // A frame may have been pushed between the drain and the worker exiting
        let discarded = discarded + active.queue.drain();
        info!("Stopped audio playback ({} queued frames discarded)", discarded);
    }

    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.running.load(Ordering::SeqCst))
    }

    /// Frames waiting to be written.
    pub fn queued(&self) -> usize {
        self.active.as_ref().map_or(0, |active| active.queue.len())
    }
}

impl Drop for PlaybackLine {
    fn drop(&mut self) {
        self.stop();
    }
}
