//! Realtime voice assistant: microphone in, assistant speech out, over a
//! persistent WebSocket session with server-side turn detection and
//! barge-in.

pub mod audio;
pub mod capture;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod playback;
pub mod queue;
pub mod realtime;
pub mod worker;

#[cfg(test)]
mod testing;

pub use coordinator::{SessionCoordinator, SessionEnd, SessionState};
pub use error::{Result, VoiceError};
