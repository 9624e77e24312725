use std::sync::{atomic::Ordering, Arc};

use crate::{
    domain::{
        error::InboxError, events::InboxEvent, ids::MessageId, message::DeliveryStatus,
    },
    engine::{event_feed::EventFeed, message_store::MessageStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Advanced {
        previous: DeliveryStatus,
        current: DeliveryStatus,
    },
    /// The message is already at or past the requested status.
    NoOp { current: DeliveryStatus },
}

impl AdvanceOutcome {
    pub fn current(&self) -> DeliveryStatus {
        match self {
            Self::Advanced { current, .. } | Self::NoOp { current } => *current,
        }
    }
}

/// Moves per-message delivery status forward. Never takes a conversation
/// token: receipts race freely and converge on the highest status.
#[derive(Debug, Clone)]
pub struct DeliveryTracker {
    store: Arc<MessageStore>,
    feed: EventFeed,
}

impl DeliveryTracker {
    pub fn new(store: Arc<MessageStore>, feed: EventFeed) -> Self {
        Self { store, feed }
    }

    pub fn advance(
        &self,
        message_id: MessageId,
        status: DeliveryStatus,
    ) -> Result<AdvanceOutcome, InboxError> {
        let stored = self
            .store
            .stored(message_id)
            .ok_or(InboxError::UnknownMessage(message_id))?;

        let target = status.to_rank();
        let mut observed = stored.status.load(Ordering::Acquire);
        loop {
            if observed >= target {
                let current = stored.delivery_status();
                tracing::debug!(
                    message_id = %message_id,
                    requested = status.as_label(),
                    current = current.as_label(),
                    "stale delivery receipt ignored"
                );
                return Ok(AdvanceOutcome::NoOp { current });
            }

            match stored.status.compare_exchange_weak(
                observed,
                target,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => observed = actual,
            }
        }

        let previous = DeliveryStatus::from_rank(observed).ok_or_else(|| {
            InboxError::fatal(message_id, format!("unknown delivery rank {observed}"))
        })?;

        // Re-read under the feed lock so published statuses never go backwards.
        let conversation_id = stored.conversation_id;
        self.feed
            .publish_with(|| InboxEvent::DeliveryStatusChanged {
                conversation_id,
                message_id,
                status: stored.delivery_status(),
            });

        Ok(AdvanceOutcome::Advanced {
            previous,
            current: status,
        })
    }

    pub fn status(&self, message_id: MessageId) -> Result<DeliveryStatus, InboxError> {
        self.store
            .stored(message_id)
            .map(|stored| stored.delivery_status())
            .ok_or(InboxError::UnknownMessage(message_id))
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        domain::{
            events::EventEnvelope,
            ids::{AgentId, ConversationId},
            message::{MessageContent, NewMessage, Sender},
        },
        test_support::ManualClock,
    };

    fn tracker_with_message() -> (DeliveryTracker, MessageId, std::sync::mpsc::Receiver<EventEnvelope>) {
        let store = Arc::new(MessageStore::new());
        let feed = EventFeed::new(Arc::new(ManualClock::default()));
        let events = feed.subscribe();
        let receipt = store
            .append(
                ConversationId(1),
                NewMessage::new(Sender::Agent(AgentId::new("a1")), MessageContent::text("hi")),
                Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            )
            .expect("append");

        (DeliveryTracker::new(store, feed), receipt.message.id, events)
    }

    #[test]
    fn stale_receipt_does_not_move_status_back() {
        let (tracker, id, _events) = tracker_with_message();

        let delivered = tracker.advance(id, DeliveryStatus::Delivered).expect("advance");
        let stale = tracker.advance(id, DeliveryStatus::Sent).expect("advance");
        let read = tracker.advance(id, DeliveryStatus::Read).expect("advance");

        assert_eq!(
            delivered,
            AdvanceOutcome::Advanced {
                previous: DeliveryStatus::Sent,
                current: DeliveryStatus::Delivered,
            }
        );
        assert_eq!(
            stale,
            AdvanceOutcome::NoOp {
                current: DeliveryStatus::Delivered
            }
        );
        assert_eq!(read.current(), DeliveryStatus::Read);
        assert_eq!(tracker.status(id).expect("status"), DeliveryStatus::Read);
    }

    #[test]
    fn duplicate_receipt_is_a_noop() {
        let (tracker, id, events) = tracker_with_message();

        tracker.advance(id, DeliveryStatus::Delivered).expect("advance");
        let duplicate = tracker.advance(id, DeliveryStatus::Delivered).expect("advance");

        assert!(matches!(duplicate, AdvanceOutcome::NoOp { .. }));
        assert_eq!(events.try_iter().count(), 1);
    }

    #[test]
    fn unknown_message_is_rejected() {
        let (tracker, _, _events) = tracker_with_message();

        assert_eq!(
            tracker.advance(MessageId(404), DeliveryStatus::Read),
            Err(InboxError::UnknownMessage(MessageId(404)))
        );
    }

    #[test]
    fn concurrent_receipts_converge_to_highest_status() {
        let (tracker, id, events) = tracker_with_message();
        let tracker = Arc::new(tracker);
        let barrier = Arc::new(Barrier::new(6));

        let workers: Vec<_> = [
            DeliveryStatus::Read,
            DeliveryStatus::Sent,
            DeliveryStatus::Delivered,
            DeliveryStatus::Delivered,
            DeliveryStatus::Sent,
            DeliveryStatus::Read,
        ]
        .into_iter()
        .map(|status| {
            let tracker = Arc::clone(&tracker);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                tracker.advance(id, status).expect("advance")
            })
        })
        .collect();
        for worker in workers {
            worker.join().expect("worker thread");
        }

        assert_eq!(tracker.status(id).expect("status"), DeliveryStatus::Read);

        let published: Vec<DeliveryStatus> = events
            .try_iter()
            .filter_map(|envelope| match envelope.event {
                InboxEvent::DeliveryStatusChanged { status, .. } => Some(status),
                _ => None,
            })
            .collect();
        assert!(published.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(published.last(), Some(&DeliveryStatus::Read));
    }
}
