//! Error types shared by the audio lines, the realtime client and the
//! session coordinator.

use tokio_tungstenite::tungstenite::Error as WsError;

/// Error type for voice assistant operations
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// An audio device could not be opened, read or written.
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("No audio input devices found. Please check your microphone.")]
    NoInputDevice,

    #[error("No audio output devices found. Please check your speakers.")]
    NoOutputDevice,

    /// The duplex channel could not be established.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Malformed or unexpected inbound data.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error reported by the server through an `error` event.
    #[error("VoiceLive error: {0}")]
    Remote(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl VoiceError {
    pub(crate) fn device(msg: impl std::fmt::Display) -> Self {
        VoiceError::Device(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VoiceError>;
