//! Audio device layer
//!
//! Frames are 16-bit little-endian PCM, mono, 24 kHz, which is the format the
//! voice live service expects on both directions. The device layer is
//! abstracted behind [`AudioBackend`] so the capture and playback lines can be
//! driven by PulseAudio in production and by an in-memory backend in tests.

use crate::error::{Result, VoiceError};
use base64::engine::general_purpose;
use base64::Engine;
use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::{Context, FlagSet as ContextFlagSet, State as ContextState};
use libpulse_binding::def::{BufferAttr, Retval};
use libpulse_binding::mainloop::standard::{IterateResult, Mainloop};
use libpulse_binding::proplist::Proplist;
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info};

pub const SAMPLE_RATE: u32 = 24_000;
pub const CHANNELS: u8 = 1;
pub const FRAME_SAMPLES: usize = 1024;
const BYTES_PER_SAMPLE: usize = 2;

/// Fixed stream format used for both capture and playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u8,
    /// Samples per captured frame
    pub frame_samples: usize,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            frame_samples: FRAME_SAMPLES,
        }
    }
}

impl AudioFormat {
    /// Size in bytes of one captured frame.
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples * self.channels as usize * BYTES_PER_SAMPLE
    }

    /// Playback time of `bytes` of PCM16 audio in this format.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let bytes_per_sec = self.sample_rate as u64 * self.channels as u64 * BYTES_PER_SAMPLE as u64;
        Duration::from_micros(bytes as u64 * 1_000_000 / bytes_per_sec)
    }

    fn pulse_spec(&self) -> Spec {
        Spec {
            format: Format::S16le,
            channels: self.channels,
            rate: self.sample_rate,
        }
    }
}

/// A block of raw PCM16 audio. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pcm: Vec<u8>,
}

impl AudioFrame {
    pub fn new(pcm: Vec<u8>) -> Self {
        Self { pcm }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pcm
    }

    pub fn len(&self) -> usize {
        self.pcm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    /// Encode to the transport form used by `input_audio_buffer.append`.
    pub fn encode(&self) -> EncodedAudio {
        EncodedAudio(general_purpose::STANDARD.encode(&self.pcm))
    }
}

/// Base64 transport form of an [`AudioFrame`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedAudio(String);

impl EncodedAudio {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn decode(&self) -> Result<AudioFrame> {
        general_purpose::STANDARD
            .decode(&self.0)
            .map(AudioFrame::new)
            .map_err(|e| VoiceError::Protocol(format!("invalid audio payload: {}", e)))
    }
}

impl From<String> for EncodedAudio {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Blocking input stream. Dropping it closes the stream.
pub trait CaptureStream {
    /// Fill `buf` with exactly `buf.len()` bytes of PCM, blocking until available.
    fn read(&mut self, buf: &mut [u8]) -> Result<()>;
}

/// Blocking output stream. Dropping it closes the stream.
pub trait PlaybackStream {
    /// Write a frame, blocking roughly for as long as the device needs to accept it.
    fn write(&mut self, pcm: &[u8]) -> Result<()>;

    /// Discard whatever the device still has buffered.
    fn flush(&mut self);
}

/// Process-wide audio subsystem.
///
/// Streams are opened on the worker thread that uses them, so they don't
/// need to be `Send`; the backend itself is shared between both lines.
pub trait AudioBackend: Send + Sync {
    fn open_input(&self, format: &AudioFormat) -> Result<Box<dyn CaptureStream>>;
    fn open_output(&self, format: &AudioFormat) -> Result<Box<dyn PlaybackStream>>;
}

/// Represents an audio device
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// PulseAudio source or sink name
    pub name: String,
    /// Human-readable description
    pub description: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub kind: DeviceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Microphone or other input device
    Microphone,
    /// Monitor of system audio output
    Monitor,
    /// Output device
    Speaker,
}

/// PulseAudio implementation of the audio subsystem.
///
/// Acquired once per process; dropping the last reference releases it.
pub struct PulseBackend {
    app_name: String,
}

impl PulseBackend {
    /// Connect to PulseAudio and check that at least one microphone and one
    /// output device are present.
    pub fn acquire(app_name: &str) -> Result<Self> {
        let devices = Self::list_devices(app_name)?;

        if !devices.iter().any(|d| d.kind == DeviceKind::Microphone) {
            return Err(VoiceError::NoInputDevice);
        }
        if !devices.iter().any(|d| d.kind == DeviceKind::Speaker) {
            return Err(VoiceError::NoOutputDevice);
        }

        info!("Audio subsystem acquired ({} devices)", devices.len());
        Ok(Self {
            app_name: app_name.to_string(),
        })
    }

    /// List available sources and sinks.
    pub fn list_devices(app_name: &str) -> Result<Vec<AudioDevice>> {
        let devices = Arc::new(Mutex::new(Vec::new()));
        // Source and sink listings still outstanding
        let pending = Arc::new(Mutex::new(2u8));

        let mut proplist = Proplist::new()
            .ok_or_else(|| VoiceError::device("Failed to create proplist"))?;
        proplist
            .set_str(
                libpulse_binding::proplist::properties::APPLICATION_NAME,
                &format!("{}-device-lister", app_name),
            )
            .map_err(|e| VoiceError::device(format!("Failed to set proplist: {:?}", e)))?;

        let mut mainloop =
            Mainloop::new().ok_or_else(|| VoiceError::device("Failed to create mainloop"))?;

        let mut context = Context::new_with_proplist(&mainloop, "voicelive-context", &proplist)
            .ok_or_else(|| VoiceError::device("Failed to create context"))?;

        context
            .connect(None, ContextFlagSet::NOFLAGS, None)
            .map_err(VoiceError::device)?;

        loop {
            match mainloop.iterate(false) {
                IterateResult::Quit(_) | IterateResult::Err(_) => {
                    return Err(VoiceError::device("Mainloop iterate failed"));
                }
                IterateResult::Success(_) => {}
            }

            match context.get_state() {
                ContextState::Ready => break,
                ContextState::Failed | ContextState::Terminated => {
                    return Err(VoiceError::device("PulseAudio connection failed"));
                }
                _ => {}
            }
        }

        let introspector = context.introspect();

        let sources = devices.clone();
        let sources_pending = pending.clone();
        let _source_op = introspector.get_source_info_list(move |result| match result {
            ListResult::Item(info) => {
                let is_monitor = info.monitor_of_sink.is_some()
                    || info
                        .name
                        .as_ref()
                        .map(|name| name.contains("monitor"))
                        .unwrap_or(false);
                if let (Some(name), Some(description)) = (info.name.as_ref(), info.description.as_ref()) {
                    if let Ok(mut devices) = sources.lock() {
                        devices.push(AudioDevice {
                            name: name.to_string(),
                            description: description.to_string(),
                            sample_rate: info.sample_spec.rate,
                            channels: info.sample_spec.channels,
                            kind: if is_monitor {
                                DeviceKind::Monitor
                            } else {
                                DeviceKind::Microphone
                            },
                        });
                    }
                }
            }
            ListResult::End => {
                if let Ok(mut pending) = sources_pending.lock() {
                    *pending = pending.saturating_sub(1);
                }
            }
            ListResult::Error => {
                error!("Error listing audio sources");
                if let Ok(mut pending) = sources_pending.lock() {
                    *pending = pending.saturating_sub(1);
                }
            }
        });

        let sinks = devices.clone();
        let sinks_pending = pending.clone();
        let _sink_op = introspector.get_sink_info_list(move |result| match result {
            ListResult::Item(info) => {
                if let (Some(name), Some(description)) = (info.name.as_ref(), info.description.as_ref()) {
                    if let Ok(mut devices) = sinks.lock() {
                        devices.push(AudioDevice {
                            name: name.to_string(),
                            description: description.to_string(),
                            sample_rate: info.sample_spec.rate,
                            channels: info.sample_spec.channels,
                            kind: DeviceKind::Speaker,
                        });
                    }
                }
            }
            ListResult::End => {
                if let Ok(mut pending) = sinks_pending.lock() {
                    *pending = pending.saturating_sub(1);
                }
            }
            ListResult::Error => {
                error!("Error listing audio sinks");
                if let Ok(mut pending) = sinks_pending.lock() {
                    *pending = pending.saturating_sub(1);
                }
            }
        });

        loop {
            match mainloop.iterate(false) {
                IterateResult::Quit(_) | IterateResult::Err(_) => {
                    return Err(VoiceError::device("Mainloop iterate failed"));
                }
                IterateResult::Success(_) => {}
            }

            if let Ok(pending) = pending.lock() {
                if *pending == 0 {
                    break;
                }
            }
        }

        let result = devices
            .lock()
            .map(|devices| devices.clone())
            .map_err(|_| VoiceError::device("Failed to access devices list"));

        context.disconnect();
        mainloop.quit(Retval(0));

        result
    }
}

impl Drop for PulseBackend {
    fn drop(&mut self) {
        info!("Audio subsystem released");
    }
}

impl AudioBackend for PulseBackend {
    fn open_input(&self, format: &AudioFormat) -> Result<Box<dyn CaptureStream>> {
        let attr = BufferAttr {
            maxlength: u32::MAX,
            tlength: u32::MAX,
            prebuf: u32::MAX,
            minreq: u32::MAX,
            fragsize: format.frame_bytes() as u32,
        };
        let simple = Simple::new(
            None, // default server
            &self.app_name,
            Direction::Record,
            None, // default device
            "microphone",
            &format.pulse_spec(),
            None, // default channel map
            Some(&attr),
        )
        .map_err(|e| VoiceError::device(format!("Failed to open input stream: {}", e)))?;

        debug!("Input stream opened");
        Ok(Box::new(PulseCapture { simple }))
    }

    fn open_output(&self, format: &AudioFormat) -> Result<Box<dyn PlaybackStream>> {
        // Keep the server-side buffer short so a flush on barge-in cuts audio quickly
        let attr = BufferAttr {
            maxlength: u32::MAX,
            tlength: (format.frame_bytes() * 4) as u32,
            prebuf: u32::MAX,
            minreq: u32::MAX,
            fragsize: u32::MAX,
        };
        let simple = Simple::new(
            None,
            &self.app_name,
            Direction::Playback,
            None,
            "assistant",
            &format.pulse_spec(),
            None,
            Some(&attr),
        )
        .map_err(|e| VoiceError::device(format!("Failed to open output stream: {}", e)))?;

        debug!("Output stream opened");
        Ok(Box::new(PulsePlayback { simple }))
    }
}

struct PulseCapture {
    simple: Simple,
}

impl CaptureStream for PulseCapture {
    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.simple.read(buf).map_err(VoiceError::device)
    }
}

struct PulsePlayback {
    simple: Simple,
}

impl PlaybackStream for PulsePlayback {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        self.simple.write(pcm).map_err(VoiceError::device)
    }

    fn flush(&mut self) {
        if let Err(e) = self.simple.flush() {
            debug!("Failed to flush output stream: {}", e);
        }
    }
}
