//! Environment configuration
//!
//! Everything is read from environment variables (a `.env` file is loaded
//! first when present):
//!
//! | Variable | Default |
//! |---|---|
//! | `AZURE_VOICE_LIVE_API_KEY` | none, falls back to the access token |
//! | `AZURE_VOICE_LIVE_ACCESS_TOKEN` | none |
//! | `AZURE_VOICE_LIVE_ENDPOINT` | `wss://api.voicelive.com/v1` |
//! | `AZURE_VOICE_LIVE_API_VERSION` | `2025-10-01` |
//! | `VOICE_LIVE_MODEL` | `gpt-realtime` |
//! | `VOICE_LIVE_VOICE` | `en-US-Ava:DragonHDLatestNeural` |
//! | `VOICE_LIVE_INSTRUCTIONS` | a short assistant prompt |
//! | `VOICE_LIVE_VERBOSE` | unset (errors only) |

use crate::client::{ConnectOptions, ConnectionConfig, Credential};
use crate::error::{Result, VoiceError};
use crate::realtime::SessionConfig;

pub const DEFAULT_ENDPOINT: &str = "wss://api.voicelive.com/v1";
pub const DEFAULT_API_VERSION: &str = "2025-10-01";
pub const DEFAULT_MODEL: &str = "gpt-realtime";
pub const DEFAULT_VOICE: &str = "en-US-Ava:DragonHDLatestNeural";
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful AI assistant. Respond naturally and conversationally. \
     Keep your responses concise but engaging.";

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub connection: ConnectionConfig,
    pub voice: String,
    pub instructions: String,
    pub verbose: bool,
}

impl VoiceConfig {
    /// Load from the process environment, after an optional `.env` file.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(VoiceError::Config(format!("failed to load .env: {}", e)));
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let credential = match (get("AZURE_VOICE_LIVE_API_KEY"), get("AZURE_VOICE_LIVE_ACCESS_TOKEN")) {
            (Some(key), _) => Credential::ApiKey(key),
            (None, Some(token)) => Credential::BearerToken(token),
            (None, None) => {
                return Err(VoiceError::Config(
                    "set AZURE_VOICE_LIVE_API_KEY or AZURE_VOICE_LIVE_ACCESS_TOKEN".to_string(),
                ))
            }
        };

        Ok(Self {
            connection: ConnectionConfig {
                endpoint: get("AZURE_VOICE_LIVE_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
                api_version: get("AZURE_VOICE_LIVE_API_VERSION")
                    .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
                model: get("VOICE_LIVE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                credential,
                options: ConnectOptions::default(),
            },
            voice: get("VOICE_LIVE_VOICE").unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            instructions: get("VOICE_LIVE_INSTRUCTIONS").unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            verbose: get("VOICE_LIVE_VERBOSE").is_some(),
        })
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig::conversation(&self.instructions, &self.voice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::VoiceSelection;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_with_api_key() {
        let config = VoiceConfig::from_lookup(lookup(&[("AZURE_VOICE_LIVE_API_KEY", "k")])).unwrap();
        assert!(matches!(config.connection.credential, Credential::ApiKey(ref k) if k == "k"));
        assert_eq!(config.connection.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.connection.api_version, DEFAULT_API_VERSION);
        assert_eq!(config.connection.model, DEFAULT_MODEL);
        assert_eq!(config.voice, DEFAULT_VOICE);
        assert_eq!(config.instructions, DEFAULT_INSTRUCTIONS);
        assert!(!config.verbose);
    }

    #[test]
    fn test_overrides() {
        let config = VoiceConfig::from_lookup(lookup(&[
            ("AZURE_VOICE_LIVE_API_KEY", "k"),
            ("AZURE_VOICE_LIVE_ENDPOINT", "https://example.cognitiveservices.azure.com"),
            ("VOICE_LIVE_MODEL", "gpt-4o"),
            ("VOICE_LIVE_VOICE", "alloy"),
            ("VOICE_LIVE_INSTRUCTIONS", "Talk like a pirate."),
            ("VOICE_LIVE_VERBOSE", "1"),
        ]))
        .unwrap();

        assert_eq!(config.connection.endpoint, "https://example.cognitiveservices.azure.com");
        assert_eq!(config.connection.model, "gpt-4o");
        assert!(config.verbose);

        let session = config.session();
        assert_eq!(session.voice, VoiceSelection::Named("alloy".to_string()));
        assert_eq!(session.instructions, "Talk like a pirate.");
    }

    #[test]
    fn test_access_token_fallback() {
        let config = VoiceConfig::from_lookup(lookup(&[
            ("AZURE_VOICE_LIVE_API_KEY", "  "),
            ("AZURE_VOICE_LIVE_ACCESS_TOKEN", "tok"),
        ]))
        .unwrap();
        assert_eq!(config.connection.credential.mode(), "bearer-token");
    }

    #[test]
    fn test_missing_credential() {
        match VoiceConfig::from_lookup(lookup(&[])) {
            Err(VoiceError::Config(msg)) => assert!(msg.contains("AZURE_VOICE_LIVE_API_KEY")),
            other => panic!("Unexpected result: {:?}", other),
        }
    }
}
