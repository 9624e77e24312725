use std::sync::{mpsc, Arc, Mutex};

use crate::{
    domain::events::{EventEnvelope, InboxEvent},
    engine::clock::Clock,
};

/// Fan-out of state-change events to live subscribers.
#[derive(Clone, Debug)]
pub struct EventFeed {
    inner: Arc<Mutex<EventFeedState>>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Default)]
struct EventFeedState {
    next_sequence: u64,
    subscribers: Vec<mpsc::Sender<EventEnvelope>>,
}

impl EventFeed {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventFeedState::default())),
            clock,
        }
    }

    pub fn subscribe(&self) -> mpsc::Receiver<EventEnvelope> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut state) = self.inner.lock() {
            state.subscribers.push(tx);
        }
        rx
    }

    pub fn publish(&self, event: InboxEvent) {
        self.publish_with(|| event);
    }

    /// Builds the event while holding the feed lock, so state read by `build`
    /// is published in the same order it was observed.
    pub fn publish_with<F>(&self, build: F)
    where
        F: FnOnce() -> InboxEvent,
    {
        let Ok(mut state) = self.inner.lock() else {
            tracing::warn!(code = "INBOX_EVENT_FEED_POISONED", "event dropped");
            return;
        };

        state.next_sequence += 1;
        let envelope = EventEnvelope {
            sequence: state.next_sequence,
            at: self.clock.now(),
            event: build(),
        };
        state
            .subscribers
            .retain(|subscriber| subscriber.send(envelope.clone()).is_ok());
    }
}
