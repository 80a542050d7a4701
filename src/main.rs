//! Voice Live console assistant
//!
//! Talks to the voice live realtime API through the default PulseAudio
//! microphone and speakers until interrupted or the server ends the session.

#![forbid(unsafe_code)]

use anyhow::Context;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use voicelive::audio::{AudioBackend, PulseBackend};
use voicelive::client;
use voicelive::config::VoiceConfig;
use voicelive::{SessionCoordinator, SessionEnd};

const APP_NAME: &str = "voicelive";

#[tokio::main]
async fn main() -> ExitCode {
    let config = match VoiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(false);
            println!("❌ Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.verbose);

    let outcome = run(config).await;
    match &outcome {
        Ok(SessionEnd::Interrupted) => println!("\n👋 Voice assistant shut down. Goodbye!"),
        Ok(SessionEnd::ChannelClosed) => {}
        Err(e) => {
            error!("Fatal error: {:#}", e);
            println!("❌ Error: {:#}", e);
        }
    }
    ExitCode::from(exit_status(&outcome))
}

/// 0 when the session ended by interrupt or server close, 1 on a fatal error.
fn exit_status(outcome: &anyhow::Result<SessionEnd>) -> u8 {
    match outcome {
        Ok(SessionEnd::Interrupted | SessionEnd::ChannelClosed) => 0,
        Err(_) => 1,
    }
}

/// `RUST_LOG` wins; otherwise only errors, or everything from this crate in verbose mode.
fn init_tracing(verbose: bool) {
    let default = if verbose { "voicelive=debug" } else { "error" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: VoiceConfig) -> anyhow::Result<SessionEnd> {
    let backend: Arc<dyn AudioBackend> =
        Arc::new(PulseBackend::acquire(APP_NAME).context("Audio system check failed")?);

    println!("🎙️  Basic Voice Assistant with Azure VoiceLive");
    println!("{}", "=".repeat(50));
    info!(
        "Using model {} with voice {} ({})",
        config.connection.model,
        config.voice,
        config.connection.credential.mode()
    );

    let mut coordinator = SessionCoordinator::new(backend, config.session());
    let events = coordinator
        .start(client::connect(&config.connection))
        .await
        .context("Failed to start voice session")?;

    info!("Voice assistant ready! Start speaking...");
    println!("\n{}", "=".repeat(60));
    println!("🎤 VOICE ASSISTANT READY");
    println!("Start speaking to begin conversation");
    println!("Press Ctrl+C to exit");
    println!("{}\n", "=".repeat(60));

    let end = coordinator.run(events, shutdown_signal()).await?;
    Ok(end)
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicelive::VoiceError;

    #[test]
    fn test_exit_status() {
        assert_eq!(exit_status(&Ok(SessionEnd::Interrupted)), 0);
        assert_eq!(exit_status(&Ok(SessionEnd::ChannelClosed)), 0);
        assert_eq!(exit_status(&Err(anyhow::Error::from(VoiceError::ChannelClosed))), 1);
        assert_eq!(
            exit_status(&Err(anyhow::Error::from(VoiceError::NoInputDevice).context("Audio system check failed"))),
            1
        );
    }
}
