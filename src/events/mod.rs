//! In-process event fan-out.
//!
//! Events go to every receiver subscribed at publish time. A lagging receiver
//! loses the oldest events (see `broadcast::error::RecvError::Lagged`); no
//! stronger delivery guarantee is offered.

use launchpad_common::{Event, EventSink};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast-backed [`EventSink`].
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: Event) {
        let name = event.kind.name();
        if self.tx.send(event).is_err() {
            tracing::trace!(event = name, "no subscribers");
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: Event) {}
}
