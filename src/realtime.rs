//! Voice live realtime protocol messages
//!
//! Only the handful of commands and events the assistant uses are modelled.
//! Every message is a JSON object tagged by its `type` field; inbound events
//! we don't know about deserialize to [`ServerEvent::Unknown`].

use crate::audio::EncodedAudio;
use crate::error::{Result, VoiceError};
use serde::{Deserialize, Serialize};

/// Message sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend { audio: EncodedAudio },

    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::AudioAppend { .. } => "input_audio_buffer.append",
            Self::ResponseCancel => "response.cancel",
        }
    }
}

/// Session configuration sent once the channel is up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub modalities: Vec<Modality>,
    pub instructions: String,
    pub voice: VoiceSelection,
    pub input_audio_format: AudioEncoding,
    pub output_audio_format: AudioEncoding,
    pub turn_detection: TurnDetection,
}

impl SessionConfig {
    /// Text + audio conversation, PCM16 both ways, server-side VAD.
    pub fn conversation(instructions: &str, voice: &str) -> Self {
        Self {
            modalities: vec![Modality::Text, Modality::Audio],
            instructions: instructions.to_string(),
            voice: VoiceSelection::from_name(voice),
            input_audio_format: AudioEncoding::Pcm16,
            output_audio_format: AudioEncoding::Pcm16,
            turn_detection: TurnDetection::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioEncoding {
    #[serde(rename = "pcm16")]
    Pcm16,
}

/// Either a named standard voice (`en-US-Ava:DragonHDLatestNeural`) or a
/// plain voice identifier (`alloy`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoiceSelection {
    Standard(StandardVoice),
    Named(String),
}

impl VoiceSelection {
    /// Region-tagged names contain a dash; everything else is a plain identifier.
    pub fn from_name(voice: &str) -> Self {
        if voice.contains('-') {
            Self::Standard(StandardVoice {
                name: voice.to_string(),
                kind: "azure-standard".to_string(),
            })
        } else {
            Self::Named(voice.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardVoice {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    #[serde(rename = "server_vad")]
    ServerVad {
        threshold: f64,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
    },
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self::ServerVad {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

/// Server -> client events
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: SessionInfo,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    #[serde(rename = "response.created")]
    ResponseCreated,

    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: EncodedAudio },

    #[serde(rename = "response.audio.done")]
    AudioDone,

    #[serde(rename = "response.done")]
    ResponseDone,

    #[serde(rename = "error")]
    Error { error: ErrorDetail },

    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        #[serde(default)]
        item: ItemInfo,
    },

    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionUpdated { .. } => "session.updated",
            Self::SpeechStarted => "input_audio_buffer.speech_started",
            Self::SpeechStopped => "input_audio_buffer.speech_stopped",
            Self::ResponseCreated => "response.created",
            Self::AudioDelta { .. } => "response.audio.delta",
            Self::AudioDone => "response.audio.done",
            Self::ResponseDone => "response.done",
            Self::Error { .. } => "error",
            Self::ConversationItemCreated { .. } => "conversation.item.created",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ItemInfo {
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl ErrorDetail {
    /// The server rejected a `response.cancel` because nothing was in progress.
    pub fn is_cancel_not_active(&self) -> bool {
        self.code.as_deref() == Some("response_cancel_not_active")
    }

    /// The error as reported to the user.
    pub fn to_error(&self) -> VoiceError {
        match &self.code {
            Some(code) => VoiceError::Remote(format!("{} ({})", self.message, code)),
            None => VoiceError::Remote(self.message.clone()),
        }
    }
}

/// Parse one inbound text frame.
pub fn parse_event(text: &str) -> Result<ServerEvent> {
    serde_json::from_str(text).map_err(|e| VoiceError::Protocol(format!("{}: {}", e, text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_update_serialization() {
        let cmd = ClientCommand::SessionUpdate {
            session: SessionConfig::conversation("Be brief.", "en-US-Ava:DragonHDLatestNeural"),
        };
        let value = serde_json::to_value(&cmd).unwrap();

        assert_eq!(value["type"], "session.update");
        let session = &value["session"];
        assert_eq!(session["modalities"], json!(["text", "audio"]));
        assert_eq!(session["instructions"], "Be brief.");
        assert_eq!(session["voice"]["name"], "en-US-Ava:DragonHDLatestNeural");
        assert_eq!(session["voice"]["type"], "azure-standard");
        assert_eq!(session["input_audio_format"], "pcm16");
        assert_eq!(session["output_audio_format"], "pcm16");
        assert_eq!(
            session["turn_detection"],
            json!({
                "type": "server_vad",
                "threshold": 0.5,
                "prefix_padding_ms": 300,
                "silence_duration_ms": 500
            })
        );
    }

    #[test]
    fn test_plain_voice_is_a_string() {
        let session = SessionConfig::conversation("", "alloy");
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["voice"], "alloy");
    }

    #[test]
    fn test_audio_append_and_cancel_serialization() {
        let append = ClientCommand::AudioAppend {
            audio: EncodedAudio::from("AAEC".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&append).unwrap(),
            json!({"type": "input_audio_buffer.append", "audio": "AAEC"})
        );
        assert_eq!(
            serde_json::to_value(&ClientCommand::ResponseCancel).unwrap(),
            json!({"type": "response.cancel"})
        );
        assert_eq!(ClientCommand::ResponseCancel.kind(), "response.cancel");
    }

    #[test]
    fn test_parse_known_events() {
        let event = parse_event(r#"{"type":"session.updated","event_id":"e1","session":{"id":"sess_1","voice":"alloy"}}"#).unwrap();
        assert_eq!(
            event,
            ServerEvent::SessionUpdated {
                session: SessionInfo { id: "sess_1".to_string() }
            }
        );

        let event = parse_event(r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":1200,"item_id":"i1"}"#).unwrap();
        assert_eq!(event, ServerEvent::SpeechStarted);

        let event = parse_event(r#"{"type":"input_audio_buffer.speech_stopped","audio_end_ms":2400}"#).unwrap();
        assert_eq!(event, ServerEvent::SpeechStopped);

        let event = parse_event(r#"{"type":"response.audio.delta","response_id":"r1","delta":"AQID"}"#).unwrap();
        match event {
            ServerEvent::AudioDelta { delta } => assert_eq!(delta.decode().unwrap().as_bytes(), &[1, 2, 3]),
            other => panic!("Unexpected event: {:?}", other),
        }

        let event = parse_event(r#"{"type":"conversation.item.created","item":{"id":"item_9","type":"message"}}"#).unwrap();
        assert_eq!(event.kind(), "conversation.item.created");
    }

    #[test]
    fn test_parse_error_event() {
        let event = parse_event(
            r#"{"type":"error","error":{"type":"invalid_request_error","code":"response_cancel_not_active","message":"Cancellation failed: no active response found"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::Error { error } => {
                assert!(error.is_cancel_not_active());
                assert_eq!(error.kind.as_deref(), Some("invalid_request_error"));
                assert_eq!(
                    error.to_error().to_string(),
                    "VoiceLive error: Cancellation failed: no active response found (response_cancel_not_active)"
                );
            }
            other => panic!("Unexpected event: {:?}", other),
        }

        let event = parse_event(r#"{"type":"error","error":{"message":"rate limited"}}"#).unwrap();
        match event {
            ServerEvent::Error { error } => {
                assert!(!error.is_cancel_not_active());
                assert_eq!(error.message, "rate limited");
                match error.to_error() {
                    VoiceError::Remote(msg) => assert_eq!(msg, "rate limited"),
                    other => panic!("Unexpected error: {:?}", other),
                }
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_and_malformed_events() {
        let event = parse_event(r#"{"type":"response.audio_transcript.delta","delta":"hi"}"#).unwrap();
        assert_eq!(event, ServerEvent::Unknown);

        assert!(matches!(parse_event("not json"), Err(VoiceError::Protocol(_))));
        // Known type with a missing required field
        assert!(matches!(
            parse_event(r#"{"type":"response.audio.delta"}"#),
            Err(VoiceError::Protocol(_))
        ));
    }
}
