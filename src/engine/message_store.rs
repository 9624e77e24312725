use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc, Mutex, RwLock,
    },
};

use chrono::{DateTime, Utc};

use crate::domain::{
    error::InboxError,
    ids::{ConversationId, MessageId},
    message::{DeliveryStatus, Message, MessageContent, NewMessage, Sender},
};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 200;

/// Append-only, per-conversation ordered message log.
#[derive(Debug)]
pub struct MessageStore {
    logs: RwLock<HashMap<ConversationId, Arc<Mutex<ConversationLog>>>>,
    index: RwLock<HashMap<MessageId, Arc<StoredMessage>>>,
    last_message_id: AtomicU64,
    open: AtomicBool,
}

#[derive(Debug, Default)]
struct ConversationLog {
    entries: Vec<Arc<StoredMessage>>,
    keys: HashMap<String, MessageId>,
}

/// Immutable message fields plus the one mutable cell: delivery status.
#[derive(Debug)]
pub(crate) struct StoredMessage {
    pub(crate) id: MessageId,
    pub(crate) conversation_id: ConversationId,
    seq: u64,
    sender: Sender,
    content: MessageContent,
    created_at: DateTime<Utc>,
    pub(crate) status: AtomicU8,
}

impl StoredMessage {
    pub(crate) fn snapshot(&self) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            seq: self.seq,
            sender: self.sender.clone(),
            content: self.content.clone(),
            created_at: self.created_at,
            delivery_status: self.delivery_status(),
        }
    }

    pub(crate) fn delivery_status(&self) -> DeliveryStatus {
        // Only ranks produced by `to_rank` are ever stored.
        DeliveryStatus::from_rank(self.status.load(Ordering::Acquire)).unwrap_or(DeliveryStatus::Read)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    pub message: Message,
    /// The idempotency key matched an earlier append; nothing new was written.
    pub duplicate: bool,
}

impl AppendReceipt {
    pub fn seq(&self) -> u64 {
        self.message.seq
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    pub fn new() -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            last_message_id: AtomicU64::new(0),
            open: AtomicBool::new(true),
        }
    }

    /// Records `message` at the end of the conversation's log. The sequence
    /// number is assigned here and is gapless per conversation.
    pub fn append(
        &self,
        conversation_id: ConversationId,
        message: NewMessage,
        at: DateTime<Utc>,
    ) -> Result<AppendReceipt, InboxError> {
        self.ensure_open(conversation_id)?;

        let log = self.log_for(conversation_id)?;
        let mut log = log.lock().map_err(|_| poisoned(conversation_id))?;

        if let Some(existing) = message
            .idempotency_key
            .as_ref()
            .and_then(|key| log.keys.get(key))
            .and_then(|id| log.entries.iter().find(|entry| entry.id == *id))
        {
            return Ok(AppendReceipt {
                message: existing.snapshot(),
                duplicate: true,
            });
        }

        let mut index = self.index.write().map_err(|_| poisoned(conversation_id))?;
        let id = MessageId(self.last_message_id.fetch_add(1, Ordering::AcqRel) + 1);
        let stored = Arc::new(StoredMessage {
            id,
            conversation_id,
            seq: log.entries.len() as u64 + 1,
            status: AtomicU8::new(DeliveryStatus::initial_for(&message.sender).to_rank()),
            sender: message.sender,
            content: message.content,
            created_at: at,
        });

        if let Some(key) = message.idempotency_key {
            log.keys.insert(key, id);
        }
        log.entries.push(Arc::clone(&stored));
        index.insert(id, Arc::clone(&stored));

        Ok(AppendReceipt {
            message: stored.snapshot(),
            duplicate: false,
        })
    }

    /// Messages with `seq >= from_seq`, oldest first. A zero limit means the
    /// default page; larger limits are capped.
    pub fn read_range(
        &self,
        conversation_id: ConversationId,
        from_seq: u64,
        limit: usize,
    ) -> Result<Vec<Message>, InboxError> {
        let Some(log) = self.existing_log(conversation_id)? else {
            return Ok(Vec::new());
        };
        let log = log.lock().map_err(|_| poisoned(conversation_id))?;

        let start = from_seq.saturating_sub(1) as usize;
        Ok(log
            .entries
            .iter()
            .skip(start)
            .take(normalized_limit(limit))
            .map(|entry| entry.snapshot())
            .collect())
    }

    pub fn find_by_key(
        &self,
        conversation_id: ConversationId,
        key: &str,
    ) -> Result<Option<Message>, InboxError> {
        let Some(log) = self.existing_log(conversation_id)? else {
            return Ok(None);
        };
        let log = log.lock().map_err(|_| poisoned(conversation_id))?;

        Ok(log
            .keys
            .get(key)
            .and_then(|id| log.entries.iter().find(|entry| entry.id == *id))
            .map(|entry| entry.snapshot()))
    }

    pub fn get(&self, message_id: MessageId) -> Option<Message> {
        self.stored(message_id).map(|stored| stored.snapshot())
    }

    pub fn last(&self, conversation_id: ConversationId) -> Result<Option<Message>, InboxError> {
        let Some(log) = self.existing_log(conversation_id)? else {
            return Ok(None);
        };
        let log = log.lock().map_err(|_| poisoned(conversation_id))?;

        Ok(log.entries.last().map(|entry| entry.snapshot()))
    }

    pub fn len(&self, conversation_id: ConversationId) -> Result<usize, InboxError> {
        let Some(log) = self.existing_log(conversation_id)? else {
            return Ok(0);
        };
        let log = log.lock().map_err(|_| poisoned(conversation_id))?;

        Ok(log.entries.len())
    }

    /// Stops accepting appends; reads keep working.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        tracing::info!(code = "INBOX_STORE_CLOSED", "message store closed for appends");
    }

    pub fn reopen(&self) {
        self.open.store(true, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn ensure_open(&self, conversation_id: ConversationId) -> Result<(), InboxError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(InboxError::StoreUnavailable(conversation_id))
        }
    }

    pub(crate) fn stored(&self, message_id: MessageId) -> Option<Arc<StoredMessage>> {
        self.index
            .read()
            .ok()
            .and_then(|index| index.get(&message_id).cloned())
    }

    fn existing_log(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<Arc<Mutex<ConversationLog>>>, InboxError> {
        let logs = self.logs.read().map_err(|_| poisoned(conversation_id))?;
        Ok(logs.get(&conversation_id).cloned())
    }

    fn log_for(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Arc<Mutex<ConversationLog>>, InboxError> {
        if let Some(log) = self.existing_log(conversation_id)? {
            return Ok(log);
        }

        let mut logs = self.logs.write().map_err(|_| poisoned(conversation_id))?;
        Ok(Arc::clone(logs.entry(conversation_id).or_default()))
    }
}

pub(crate) fn normalized_limit(limit: usize) -> usize {
    match limit {
        0 => DEFAULT_PAGE_SIZE,
        value if value > MAX_PAGE_SIZE => MAX_PAGE_SIZE,
        value => value,
    }
}

fn poisoned(conversation_id: ConversationId) -> InboxError {
    InboxError::fatal(conversation_id, "message log lock poisoned")
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use chrono::TimeZone;

    use super::*;
    use crate::domain::ids::{AgentId, CustomerId};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn inbound(text: &str) -> NewMessage {
        NewMessage::new(
            Sender::Customer(CustomerId::new("c1")),
            MessageContent::text(text),
        )
    }

    fn outbound(text: &str) -> NewMessage {
        NewMessage::new(Sender::Agent(AgentId::new("a1")), MessageContent::text(text))
    }

    #[test]
    fn assigns_sequence_numbers_starting_at_one() {
        let store = MessageStore::new();

        let first = store.append(ConversationId(1), inbound("hi"), at()).expect("append");
        let second = store.append(ConversationId(1), outbound("hello"), at()).expect("append");
        let other = store.append(ConversationId(2), inbound("hey"), at()).expect("append");

        assert_eq!((first.seq(), second.seq(), other.seq()), (1, 2, 1));
        assert!(first.message.id < second.message.id);
    }

    #[test]
    fn customer_messages_are_recorded_as_read() {
        let store = MessageStore::new();

        let inbound = store.append(ConversationId(1), inbound("hi"), at()).expect("append");
        let outbound = store.append(ConversationId(1), outbound("yo"), at()).expect("append");

        assert_eq!(inbound.message.delivery_status, DeliveryStatus::Read);
        assert_eq!(outbound.message.delivery_status, DeliveryStatus::Sent);
    }

    #[test]
    fn concurrent_appends_form_gapless_total_order() {
        let store = Arc::new(MessageStore::new());
        let barrier = Arc::new(Barrier::new(8));

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    (0..25)
                        .map(|n| {
                            store
                                .append(ConversationId(1), inbound(&format!("{worker}-{n}")), at())
                                .expect("append")
                                .seq()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seqs: Vec<u64> = workers
            .into_iter()
            .flat_map(|worker| worker.join().expect("worker thread"))
            .collect();
        seqs.sort_unstable();

        assert_eq!(seqs, (1..=200).collect::<Vec<u64>>());

        let messages = store.read_range(ConversationId(1), 1, 200).expect("read");
        assert!(messages.windows(2).all(|pair| pair[0].seq + 1 == pair[1].seq));
        assert!(messages.windows(2).all(|pair| pair[0].id < pair[1].id));
    }

    #[test]
    fn read_range_starts_at_requested_sequence() {
        let store = MessageStore::new();
        for n in 0..5 {
            store
                .append(ConversationId(1), inbound(&n.to_string()), at())
                .expect("append");
        }

        let page = store.read_range(ConversationId(1), 3, 2).expect("read");

        assert_eq!(page.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn read_range_uses_default_page_for_zero_limit() {
        let store = MessageStore::new();
        for n in 0..60 {
            store
                .append(ConversationId(1), inbound(&n.to_string()), at())
                .expect("append");
        }

        assert_eq!(store.read_range(ConversationId(1), 0, 0).expect("read").len(), 50);
        assert!(store.read_range(ConversationId(9), 1, 10).expect("read").is_empty());
    }

    #[test]
    fn duplicate_idempotency_key_returns_first_message() {
        let store = MessageStore::new();

        let first = store
            .append(ConversationId(1), inbound("hi").with_idempotency_key("wa-1"), at())
            .expect("append");
        let retry = store
            .append(ConversationId(1), inbound("hi").with_idempotency_key("wa-1"), at())
            .expect("append");

        assert!(!first.duplicate);
        assert!(retry.duplicate);
        assert_eq!(first.message, retry.message);
        assert_eq!(store.len(ConversationId(1)).expect("len"), 1);
        assert_eq!(
            store.find_by_key(ConversationId(1), "wa-1").expect("lookup"),
            Some(first.message)
        );
    }

    #[test]
    fn closed_store_rejects_appends_without_writing() {
        let store = MessageStore::new();
        store.close();

        let err = store
            .append(ConversationId(1), inbound("hi"), at())
            .expect_err("must fail");

        assert_eq!(err, InboxError::StoreUnavailable(ConversationId(1)));
        assert_eq!(store.len(ConversationId(1)).expect("len"), 0);

        store.reopen();
        assert_eq!(
            store.append(ConversationId(1), inbound("hi"), at()).expect("append").seq(),
            1
        );
    }

    #[test]
    fn lookup_by_message_id_returns_snapshot() {
        let store = MessageStore::new();
        let receipt = store.append(ConversationId(1), outbound("hi"), at()).expect("append");

        assert_eq!(store.get(receipt.message.id), Some(receipt.message.clone()));
        assert_eq!(store.last(ConversationId(1)).expect("last"), Some(receipt.message));
        assert_eq!(store.get(MessageId(999)), None);
    }
}
