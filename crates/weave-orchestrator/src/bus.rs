use std::sync::Arc;

use tokio::sync::broadcast;
use weave_types::StatusUpdate;

use crate::store::RunStore;

/// Fire-and-forget sink for status updates. No acknowledgement is expected.
pub trait StatusPublisher: Send + Sync {
    fn publish(&self, update: StatusUpdate);
}

#[derive(Clone)]
pub struct StatusBus {
    tx: broadcast::Sender<StatusUpdate>,
}

impl StatusBus {
    pub fn new() -> Self {
        Self::with_capacity(2048)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPublisher for StatusBus {
    fn publish(&self, update: StatusUpdate) {
        // no subscribers is fine
        let _ = self.tx.send(update);
    }
}

/// Appends every update to the store's event log before forwarding it
pub struct RecordingPublisher<P> {
    inner: P,
    store: Arc<RunStore>,
}

impl<P: StatusPublisher> RecordingPublisher<P> {
    pub fn new(inner: P, store: Arc<RunStore>) -> Self {
        Self { inner, store }
    }
}

impl<P: StatusPublisher> StatusPublisher for RecordingPublisher<P> {
    fn publish(&self, update: StatusUpdate) {
        if let Err(e) = self.store.append_event(&update) {
            tracing::error!("Failed to append status event: {}", e);
        }
        self.inner.publish(update);
    }
}
