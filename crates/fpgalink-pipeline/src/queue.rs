//! Bounded single-producer/single-consumer queues between stages.
//!
//! Thin wrappers over `tokio::sync::mpsc` that make every suspension point
//! observe a [`CancellationToken`]. The sender is deliberately not `Clone`,
//! so each queue has exactly one writing stage.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why a queue operation did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The cancellation token fired while waiting.
    #[error("cancelled")]
    Cancelled,
    /// The other side of the queue is gone (and, for receivers, it is drained).
    #[error("queue closed")]
    Closed,
}

/// Create a bounded queue holding at most `capacity` items.
///
/// A `capacity` of zero is treated as one.
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueSender { tx }, QueueReceiver { rx })
}

/// Writing end of a queue. Dropping it closes the queue.
#[derive(Debug)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> QueueSender<T> {
    /// Enqueue `item`, suspending while the queue is full.
    pub async fn send(&self, item: T, cancel: &CancellationToken) -> Result<(), QueueError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
            sent = self.tx.send(item) => sent.map_err(|_| QueueError::Closed),
        }
    }

    /// True once the receiving end has been dropped or closed.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Free slots right now.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// Reading end of a queue.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Dequeue the next item, suspending while the queue is empty.
    ///
    /// Cancellation wins over a ready item.
    pub async fn recv(&mut self, cancel: &CancellationToken) -> Result<T, QueueError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
            item = self.rx.recv() => item.ok_or(QueueError::Closed),
        }
    }

    /// Like [`recv`](Self::recv), but gives up after `wait` and returns `Ok(None)`.
    pub async fn recv_within(
        &mut self,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, QueueError> {
        match tokio::time::timeout(wait, self.recv(cancel)).await {
            Ok(item) => item.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Take an item only if one is already queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting new items; already queued items can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
