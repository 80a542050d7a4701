//! Microphone capture line
//!
//! Two OS threads per active line: one reads fixed-size frames from the input
//! stream and encodes them onto the transmit queue, the other drains that
//! queue into the outbound channel. The input stream is opened and closed on
//! the reading thread, so it never crosses threads.

use crate::audio::{AudioBackend, AudioFormat, AudioFrame, EncodedAudio};
use crate::client::Outbound;
use crate::error::{Result, VoiceError};
use crate::queue::FrameQueue;
use crate::worker::{Worker, JOIN_TIMEOUT};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// About 22 s of microphone audio at the default format.
pub const TRANSMIT_QUEUE_CAPACITY: usize = 512;

const POP_TIMEOUT: Duration = Duration::from_millis(100);
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct CaptureLine {
    backend: Arc<dyn AudioBackend>,
    format: AudioFormat,
    outbound: Outbound,
    active: Option<ActiveCapture>,
}

struct ActiveCapture {
    /// Cleared only by `stop()`
    running: Arc<AtomicBool>,
    /// Cleared when the reader exits, including on a read error
    reading: Arc<AtomicBool>,
    queue: FrameQueue<EncodedAudio>,
    reader: Worker,
    sender: Worker,
}

impl CaptureLine {
    pub fn new(backend: Arc<dyn AudioBackend>, format: AudioFormat, outbound: Outbound) -> Self {
        Self {
            backend,
            format,
            outbound,
            active: None,
        }
    }

    /// Open the input stream and start both workers. No-op if already capturing.
    pub fn start(&mut self) -> Result<()> {
        if self.active.is_some() {
            debug!("Capture already running");
            return Ok(());
        }

        let running = Arc::new(AtomicBool::new(true));
        let reading = Arc::new(AtomicBool::new(true));
        let queue = FrameQueue::<EncodedAudio>::new("transmit", TRANSMIT_QUEUE_CAPACITY);
        let (ready_tx, ready_rx) = bounded(1);

        let reader = {
            let backend = self.backend.clone();
            let format = self.format;
            let running = running.clone();
            let reading = reading.clone();
            let queue = queue.clone();
            Worker::spawn("capture-read", move || {
                let mut stream = match backend.open_input(&format) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        reading.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let mut frames = 0u64;
                while running.load(Ordering::SeqCst) {
                    let mut buf = vec![0u8; format.frame_bytes()];
                    match stream.read(&mut buf) {
                        Ok(()) => {
                            if !running.load(Ordering::SeqCst) {
                                break;
                            }
                            queue.push(AudioFrame::new(buf).encode());
                            frames += 1;
                        }
                        Err(e) => {
                            if running.load(Ordering::SeqCst) {
                                error!("Error in audio capture: {}", e);
                            }
                            break;
                        }
                    }
                }
                reading.store(false, Ordering::SeqCst);
                debug!("Capture reader exiting after {} frames", frames);
            })
            .map_err(VoiceError::device)?
        };

        let opened = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(result) => result,
            Err(_) => Err(VoiceError::device("input stream did not open in time")),
        };
        if let Err(e) = opened {
            running.store(false, Ordering::SeqCst);
            reader.join_timeout(JOIN_TIMEOUT);
            return Err(e);
        }

        let sender = {
            let running = running.clone();
            let queue = queue.clone();
            let outbound = self.outbound.clone();
            Worker::spawn("capture-transmit", move || {
                while running.load(Ordering::SeqCst) {
                    let Some(audio) = queue.pop_timeout(POP_TIMEOUT) else {
                        continue;
                    };
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(e) = outbound.append_audio(audio) {
                        warn!("Dropping captured audio: {}", e);
                        break;
                    }
                }
                debug!("Capture transmitter exiting");
            })
        };
        let sender = match sender {
            Ok(sender) => sender,
            Err(e) => {
                running.store(false, Ordering::SeqCst);
                reader.join_timeout(JOIN_TIMEOUT);
                return Err(VoiceError::device(e));
            }
        };

        self.active = Some(ActiveCapture {
            running,
            reading,
            queue,
            reader,
            sender,
        });
        info!("🎤 Started audio capture");
        Ok(())
    }

    /// Stop both workers, close the input stream and discard unsent frames.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.running.store(false, Ordering::SeqCst);
        active.reader.join_timeout(JOIN_TIMEOUT);
        active.sender.join_timeout(JOIN_TIMEOUT);
        let discarded = active.queue.drain();
        info!("Stopped audio capture ({} unsent frames discarded)", discarded);
    }

    /// True while the microphone is being read. A read error clears this on
    /// its own; frames captured before it are still sent until `stop()`.
    pub fn is_capturing(&self) -> bool {
        self.active.as_ref().is_some_and(|active| {
            active.running.load(Ordering::SeqCst) && active.reading.load(Ordering::SeqCst)
        })
    }
}

impl Drop for CaptureLine {
    fn drop(&mut self) {
        self.stop();
    }
}
