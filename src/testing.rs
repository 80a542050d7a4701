//! In-memory audio backend and helpers shared by the unit tests.

use crate::audio::{AudioBackend, AudioFormat, CaptureStream, PlaybackStream};
use crate::error::{Result, VoiceError};
use crate::realtime::ClientCommand;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

/// Scripted capture, recorded playback, and open-stream bookkeeping.
#[derive(Default)]
pub struct FakeBackend {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    script: Mutex<VecDeque<Result<Vec<u8>>>>,
    fail_open_input: AtomicBool,
    fail_open_output: AtomicBool,
    open_inputs: AtomicUsize,
    open_outputs: AtomicUsize,
    max_open_inputs: AtomicUsize,
    max_open_outputs: AtomicUsize,
    inputs_opened: AtomicUsize,
    outputs_opened: AtomicUsize,
    flushes: AtomicUsize,
    played: Mutex<Vec<Vec<u8>>>,
    gate: Mutex<Option<(Sender<Vec<u8>>, Receiver<()>)>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Frames returned by successive reads; once exhausted reads yield silence every 10 ms.
    pub fn script_input(&self, frames: Vec<Vec<u8>>) {
        let mut script = self.inner.script.lock().unwrap();
        script.extend(frames.into_iter().map(Ok));
    }

    pub fn script_read_error(&self) {
        let mut script = self.inner.script.lock().unwrap();
        script.push_back(Err(VoiceError::Device("device unplugged".to_string())));
    }

    pub fn fail_open_input(&self, fail: bool) {
        self.inner.fail_open_input.store(fail, Ordering::SeqCst);
    }

    pub fn fail_open_output(&self, fail: bool) {
        self.inner.fail_open_output.store(fail, Ordering::SeqCst);
    }

    /// Make every write announce itself on the returned receiver and then wait
    /// (up to 2 s) for a release before completing.
    pub fn gate_writes(&self) -> (Sender<()>, Receiver<Vec<u8>>) {
        let (release_tx, release_rx) = unbounded();
        let (started_tx, started_rx) = unbounded();
        *self.inner.gate.lock().unwrap() = Some((started_tx, release_rx));
        (release_tx, started_rx)
    }

    pub fn played(&self) -> Vec<Vec<u8>> {
        self.inner.played.lock().unwrap().clone()
    }

    /// Poll until at least `n` frames were played or `timeout` elapses.
    pub fn wait_for_played(&self, n: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            let played = self.played();
            if played.len() >= n || Instant::now() >= deadline {
                return played;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn open_inputs(&self) -> usize {
        self.inner.open_inputs.load(Ordering::SeqCst)
    }

    pub fn open_outputs(&self) -> usize {
        self.inner.open_outputs.load(Ordering::SeqCst)
    }

    pub fn max_open_inputs(&self) -> usize {
        self.inner.max_open_inputs.load(Ordering::SeqCst)
    }

    pub fn max_open_outputs(&self) -> usize {
        self.inner.max_open_outputs.load(Ordering::SeqCst)
    }

    pub fn inputs_opened(&self) -> usize {
        self.inner.inputs_opened.load(Ordering::SeqCst)
    }

    pub fn outputs_opened(&self) -> usize {
        self.inner.outputs_opened.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.inner.flushes.load(Ordering::SeqCst)
    }
}

impl AudioBackend for FakeBackend {
    fn open_input(&self, _format: &AudioFormat) -> Result<Box<dyn CaptureStream>> {
        if self.inner.fail_open_input.load(Ordering::SeqCst) {
            return Err(VoiceError::Device("no such input".to_string()));
        }
        let open = self.inner.open_inputs.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_open_inputs.fetch_max(open, Ordering::SeqCst);
        self.inner.inputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeInput {
            inner: self.inner.clone(),
        }))
    }

    fn open_output(&self, _format: &AudioFormat) -> Result<Box<dyn PlaybackStream>> {
        if self.inner.fail_open_output.load(Ordering::SeqCst) {
            return Err(VoiceError::Device("no such output".to_string()));
        }
        let open = self.inner.open_outputs.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_open_outputs.fetch_max(open, Ordering::SeqCst);
        self.inner.outputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeOutput {
            inner: self.inner.clone(),
        }))
    }
}

struct FakeInput {
    inner: Arc<Inner>,
}

impl CaptureStream for FakeInput {
    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        let next = self.inner.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(frame)) => {
                buf.fill(0);
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => {
                std::thread::sleep(Duration::from_millis(10));
                buf.fill(0);
                Ok(())
            }
        }
    }
}

impl Drop for FakeInput {
    fn drop(&mut self) {
        self.inner.open_inputs.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakeOutput {
    inner: Arc<Inner>,
}

impl PlaybackStream for FakeOutput {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        let gate = self.inner.gate.lock().unwrap().clone();
        if let Some((started, release)) = gate {
            let _ = started.send(pcm.to_vec());
            let _ = release.recv_timeout(Duration::from_secs(2));
        }
        self.inner.played.lock().unwrap().push(pcm.to_vec());
        Ok(())
    }

    fn flush(&mut self) {
        self.inner.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for FakeOutput {
    fn drop(&mut self) {
        self.inner.open_outputs.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A frame-sized buffer filled with `byte`.
pub fn frame_of(byte: u8) -> Vec<u8> {
    vec![byte; AudioFormat::default().frame_bytes()]
}

/// Collect up to `n` commands, waiting at most `timeout` in total.
pub fn recv_commands(
    rx: &mut UnboundedReceiver<ClientCommand>,
    n: usize,
    timeout: Duration,
) -> Vec<ClientCommand> {
    let deadline = Instant::now() + timeout;
    let mut commands = Vec::new();
    while commands.len() < n && Instant::now() < deadline {
        match rx.try_recv() {
            Ok(command) => commands.push(command),
            Err(_) => std::thread::sleep(Duration::from_millis(2)),
        }
    }
    commands
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
