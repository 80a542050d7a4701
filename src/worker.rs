//! Named OS worker threads with a bounded join.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on how long `stop()` waits for a worker to finish.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle to a spawned worker thread.
pub struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
    // Disconnects when the thread returns (its sender is dropped)
    done: Receiver<()>,
}

impl Worker {
    pub fn spawn<F>(name: &'static str, f: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done): (Sender<()>, Receiver<()>) = bounded(0);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _done = done_tx;
                f();
            })?;
        Ok(Self { name, handle, done })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait up to `timeout` for the thread to finish.
    ///
    /// Returns `false` if it is still running; the thread is then detached
    /// and left to exit on its own.
    pub fn join_timeout(self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!("{} worker did not stop within {:?}, detaching", self.name, timeout);
                false
            }
            // Only disconnection is possible; nothing is ever sent
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    warn!("{} worker panicked", self.name);
                }
                debug!("{} worker joined", self.name);
                true
            }
        }
    }
}
