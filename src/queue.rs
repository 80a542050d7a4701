//! Bounded FIFO hand-off between a producer and a draining worker thread.
//!
//! When the queue is full the oldest entry is discarded to make room, so a
//! producer never blocks on a slow consumer and memory stays bounded during a
//! network or device stall.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Cloneable handle to a bounded drop-oldest queue.
///
/// All clones share the same underlying channel. The producer pushes, the
/// worker pops with a timeout, and the owner drains on stop.
pub struct FrameQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    name: &'static str,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for FrameQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            name: self.name,
            dropped: self.dropped.clone(),
        }
    }
}

impl<T> FrameQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            name,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Push without blocking, evicting the oldest entries if the queue is full.
    pub fn push(&self, mut item: T) {
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    item = back;
                    if self.rx.try_recv().is_ok() {
                        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if dropped == 1 || dropped % 100 == 0 {
                            warn!("{} queue full, dropped {} oldest entries so far", self.name, dropped);
                        }
                    }
                }
                // Both halves are held by self, so this cannot happen
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Pop the oldest entry, waiting at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Discard everything currently queued and return how many entries were dropped.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Entries evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
