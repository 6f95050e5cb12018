use std::{
    collections::HashSet,
    hash::Hash,
    sync::{Mutex, MutexGuard},
};

use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("The queue is already being consumed")]
    AlreadyConsumed,
    #[error("The queue consumer was dropped")]
    Closed,
}

/// A wake-up queue that holds each key at most once until the consumer
/// removes it again. Keys carry no payload; the store stays the source of
/// truth for what actually needs to run.
pub struct DedupQueue<K> {
    pending: Mutex<HashSet<K>>,
    sender: mpsc::Sender<K>,
    receiver: Mutex<Option<mpsc::Receiver<K>>>,
}

/// The single consumer side of a [`DedupQueue`]. Yields keys in the order
/// they were first added.
pub struct Consumer<K> {
    receiver: mpsc::Receiver<K>,
}

impl<K> DedupQueue<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        Self {
            pending: Mutex::new(HashSet::new()),
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Returns `false` without queueing when `key` is already pending. Waits
    /// for room when the queue is full.
    pub async fn add(&self, key: K) -> Result<bool, QueueError> {
        if !self.pending().insert(key.clone()) {
            return Ok(false);
        }

        if self.sender.send(key.clone()).await.is_err() {
            self.pending().remove(&key);
            return Err(QueueError::Closed);
        }

        Ok(true)
    }

    /// Marks `key` as handled so a later [`DedupQueue::add`] queues it again.
    pub fn remove(&self, key: &K) {
        self.pending().remove(key);
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending().contains(key)
    }

    /// Hands out the consumer. Only the first call succeeds.
    pub fn consume(&self) -> Result<Consumer<K>, QueueError> {
        self.receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .map(|receiver| Consumer { receiver })
            .ok_or(QueueError::AlreadyConsumed)
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<K>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<K> Consumer<K> {
    /// Never returns `None` while the queue itself is alive.
    pub async fn next(&mut self) -> Option<K> {
        self.receiver.recv().await
    }
}
