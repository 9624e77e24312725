use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::{
    domain::{
        conversation::{Conversation, ConversationStatus, StatusTransition},
        error::InboxError,
        events::InboxEvent,
        ids::{AgentId, ConversationId, CustomerId},
        message::{Message, MessageContent, NewMessage, Sender},
    },
    engine::{
        blocklist::ContactBlocklist,
        clock::Clock,
        event_feed::EventFeed,
        message_store::{normalized_limit, MessageStore},
        token::{OwnershipToken, TokenError},
    },
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(2000);
const DEFAULT_MAX_TEXT_CHARS: usize = 4096;

#[derive(Debug, Clone)]
struct ConversationRecord {
    conversation: Conversation,
    history: Vec<StatusTransition>,
}

type ConversationSlot = OwnershipToken<ConversationRecord>;
type CustomerSlot = OwnershipToken<Option<ConversationId>>;

/// Result of recording one message: the conversation as committed together
/// with the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub conversation: Conversation,
    pub message: Message,
    /// The idempotency key matched an earlier message; nothing changed.
    pub duplicate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationFilter {
    pub status: Option<ConversationStatus>,
    pub assigned_to: Option<AgentId>,
    /// Case-insensitive match on customer name or last message preview.
    pub search: Option<String>,
    pub limit: usize,
}

impl ConversationFilter {
    fn matches(&self, conversation: &Conversation) -> bool {
        if self
            .status
            .is_some_and(|status| status != conversation.status)
        {
            return false;
        }
        if self
            .assigned_to
            .as_ref()
            .is_some_and(|agent| conversation.assigned_agent.as_ref() != Some(agent))
        {
            return false;
        }

        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(term) => {
                let term = term.to_lowercase();
                conversation.customer_name.to_lowercase().contains(&term)
                    || conversation
                        .last_message_preview
                        .as_deref()
                        .is_some_and(|preview| preview.to_lowercase().contains(&term))
            }
        }
    }
}

/// Failure of an outbound send: either the inbox refused it or the
/// caller-supplied delivery step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundError<E> {
    Inbox(InboxError),
    Rejected(E),
}

impl<E> From<InboxError> for OutboundError<E> {
    fn from(error: InboxError) -> Self {
        Self::Inbox(error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationSettings {
    pub lock_timeout: Duration,
    pub max_text_chars: usize,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
        }
    }
}

enum Located<R> {
    Existing(ConversationId),
    Created(R),
}

type Applied<R> = (R, Vec<InboxEvent>);

/// Owns conversation state. Every mutation runs under the conversation's
/// ownership token on a working copy that is only committed once all
/// fallible steps (including the message append) have succeeded.
#[derive(Debug)]
pub struct ConversationManager {
    conversations: RwLock<HashMap<ConversationId, Arc<ConversationSlot>>>,
    customers: Mutex<HashMap<CustomerId, Arc<CustomerSlot>>>,
    last_id: AtomicU64,
    store: Arc<MessageStore>,
    blocklist: ContactBlocklist,
    feed: EventFeed,
    clock: Arc<dyn Clock>,
    settings: ConversationSettings,
}

impl ConversationManager {
    pub fn new(
        store: Arc<MessageStore>,
        feed: EventFeed,
        clock: Arc<dyn Clock>,
        settings: ConversationSettings,
    ) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            customers: Mutex::new(HashMap::new()),
            last_id: AtomicU64::new(0),
            store,
            blocklist: ContactBlocklist::new(feed.clone(), Arc::clone(&clock)),
            feed,
            clock,
            settings,
        }
    }

    /// Shares a blocklist with other components; messages to or from a
    /// blocked customer are refused.
    pub fn with_blocklist(mut self, blocklist: ContactBlocklist) -> Self {
        self.blocklist = blocklist;
        self
    }

    pub fn settings(&self) -> ConversationSettings {
        self.settings
    }

    /// Records a customer message, opening the customer's conversation on
    /// first contact and reopening it when resolved.
    pub fn record_inbound(
        &self,
        customer: &CustomerId,
        customer_name: &str,
        content: MessageContent,
        external_id: Option<String>,
    ) -> Result<Delivery, InboxError> {
        let content = content.normalized(self.settings.max_text_chars)?;
        let message = NewMessage {
            sender: Sender::Customer(customer.clone()),
            content,
            idempotency_key: external_id,
        };

        let delivery = self.with_customer_conversation(customer, customer_name, |record, now| {
            self.apply_inbound(record, message, now)
        })?;

        tracing::debug!(
            conversation_id = %delivery.conversation.id,
            message_id = %delivery.message.id,
            seq = delivery.message.seq,
            duplicate = delivery.duplicate,
            "inbound message recorded"
        );
        Ok(delivery)
    }

    /// Sends an agent message on an existing conversation. `deliver` runs
    /// under the conversation token before the append; if it fails nothing
    /// is recorded.
    pub fn record_outbound<E, D>(
        &self,
        conversation_id: ConversationId,
        agent: &AgentId,
        content: MessageContent,
        client_key: Option<String>,
        deliver: D,
    ) -> Result<Delivery, OutboundError<E>>
    where
        D: FnOnce(&Conversation, &MessageContent) -> Result<(), E>,
    {
        let message = self.outbound_message(agent, content, client_key)?;
        let delivery = self.mutate(conversation_id, |record, now| {
            self.apply_outbound(record, message, now, deliver)
        })?;

        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %delivery.message.id,
            seq = delivery.message.seq,
            duplicate = delivery.duplicate,
            "outbound message recorded"
        );
        Ok(delivery)
    }

    /// Like [`Self::record_outbound`], addressed by customer. Opens the
    /// conversation if the customer has none yet.
    pub fn record_outbound_to_customer<E, D>(
        &self,
        customer: &CustomerId,
        customer_name: &str,
        agent: &AgentId,
        content: MessageContent,
        client_key: Option<String>,
        deliver: D,
    ) -> Result<Delivery, OutboundError<E>>
    where
        D: FnOnce(&Conversation, &MessageContent) -> Result<(), E>,
    {
        let message = self.outbound_message(agent, content, client_key)?;
        self.with_customer_conversation(customer, customer_name, |record, now| {
            self.apply_outbound(record, message, now, deliver)
        })
    }

    /// Marks the conversation as seen by an agent: unread drops to zero.
    pub fn view(&self, conversation_id: ConversationId) -> Result<Conversation, InboxError> {
        self.mutate(conversation_id, |record, _| Ok(mark_viewed(record)))
    }

    /// Like [`Self::view`], also reading the latest `page` messages (oldest
    /// first). Unread is only reset when the read succeeds.
    pub fn view_recent(
        &self,
        conversation_id: ConversationId,
        page: usize,
    ) -> Result<(Conversation, Vec<Message>), InboxError> {
        self.mutate(conversation_id, |record, _| {
            let total = self.store.len(conversation_id)?;
            let from_seq = total.saturating_sub(page) as u64 + 1;
            let messages = self.store.read_range(conversation_id, from_seq, page)?;
            let (conversation, events) = mark_viewed(record);
            Ok(((conversation, messages), events))
        })
    }

    pub fn resolve(&self, conversation_id: ConversationId) -> Result<Conversation, InboxError> {
        self.update(conversation_id, |conversation, now| conversation.resolve(now))
    }

    pub fn unassign(&self, conversation_id: ConversationId) -> Result<Conversation, InboxError> {
        self.update(conversation_id, |conversation, now| {
            conversation.unassign(now).map(Some)
        })
    }

    /// Applies a status change under the conversation token and records the
    /// resulting transition, if any.
    pub(crate) fn update<F>(
        &self,
        conversation_id: ConversationId,
        change: F,
    ) -> Result<Conversation, InboxError>
    where
        F: FnOnce(&mut Conversation, DateTime<Utc>) -> Result<Option<StatusTransition>, InboxError>,
    {
        self.mutate(conversation_id, |record, now| {
            let transition = change(&mut record.conversation, now)?;
            ensure_consistent(&record.conversation)?;

            let Some(transition) = transition else {
                return Ok((record.conversation.clone(), Vec::new()));
            };
            tracing::info!(
                conversation_id = %conversation_id,
                from = transition.from.as_label(),
                to = transition.to.as_label(),
                agent_id = ?transition.agent.as_ref().map(AgentId::as_str),
                "conversation transition"
            );
            record.history.push(transition);
            Ok((
                record.conversation.clone(),
                vec![InboxEvent::conversation_updated(&record.conversation)],
            ))
        })
    }

    pub fn get(&self, conversation_id: ConversationId) -> Result<Conversation, InboxError> {
        self.read(conversation_id, |record| record.conversation.clone())
    }

    pub fn history(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<StatusTransition>, InboxError> {
        self.read(conversation_id, |record| record.history.clone())
    }

    pub fn find_by_customer(
        &self,
        customer: &CustomerId,
    ) -> Result<Option<Conversation>, InboxError> {
        let slot = {
            let customers = self.customers.lock().map_err(|_| poisoned(customer))?;
            customers.get(customer).cloned()
        };
        let Some(slot) = slot else {
            return Ok(None);
        };

        let known = slot
            .with(self.settings.lock_timeout, |known| *known)
            .map_err(|err| customer_token_error(customer, err))?;
        known.map(|id| self.get(id)).transpose()
    }

    /// Messages of one conversation starting at `from_seq`.
    pub fn messages(
        &self,
        conversation_id: ConversationId,
        from_seq: u64,
        limit: usize,
    ) -> Result<Vec<Message>, InboxError> {
        self.slot(conversation_id)?;
        self.store.read_range(conversation_id, from_seq, limit)
    }

    /// Conversations matching `filter`, most recently active first.
    pub fn list(&self, filter: &ConversationFilter) -> Result<Vec<Conversation>, InboxError> {
        let slots: Vec<(ConversationId, Arc<ConversationSlot>)> = {
            let conversations = self
                .conversations
                .read()
                .map_err(|_| poisoned("conversation index"))?;
            conversations
                .iter()
                .map(|(id, slot)| (*id, Arc::clone(slot)))
                .collect()
        };

        let mut matching = Vec::new();
        for (id, slot) in slots {
            let conversation = slot
                .with(self.settings.lock_timeout, |record| record.conversation.clone())
                .map_err(|err| token_error(id, err))?;
            if filter.matches(&conversation) {
                matching.push(conversation);
            }
        }

        matching.sort_by(|left, right| {
            right
                .last_activity_at
                .cmp(&left.last_activity_at)
                .then_with(|| right.id.cmp(&left.id))
        });
        matching.truncate(normalized_limit(filter.limit));
        Ok(matching)
    }

    fn outbound_message(
        &self,
        agent: &AgentId,
        content: MessageContent,
        client_key: Option<String>,
    ) -> Result<NewMessage, InboxError> {
        Ok(NewMessage {
            sender: Sender::Agent(agent.clone()),
            content: content.normalized(self.settings.max_text_chars)?,
            idempotency_key: client_key,
        })
    }

    fn apply_inbound(
        &self,
        record: &mut ConversationRecord,
        message: NewMessage,
        now: DateTime<Utc>,
    ) -> Result<Applied<Delivery>, InboxError> {
        let conversation_id = record.conversation.id;
        self.blocklist.ensure_not_blocked(&record.conversation.customer)?;
        if let Some(existing) = self.find_duplicate(conversation_id, &message)? {
            return Ok((duplicate(record, existing), Vec::new()));
        }
        self.store.ensure_open(conversation_id)?;

        if let Some(reopened) = record
            .conversation
            .record_inbound(message.content.display_content(), now)
        {
            tracing::info!(
                conversation_id = %conversation_id,
                "resolved conversation reopened by customer"
            );
            record.history.push(reopened);
        }
        ensure_consistent(&record.conversation)?;

        let receipt = self.store.append(conversation_id, message, now)?;
        Ok(committed(record, receipt.message, receipt.duplicate))
    }

    fn apply_outbound<E, D>(
        &self,
        record: &mut ConversationRecord,
        message: NewMessage,
        now: DateTime<Utc>,
        deliver: D,
    ) -> Result<Applied<Delivery>, OutboundError<E>>
    where
        D: FnOnce(&Conversation, &MessageContent) -> Result<(), E>,
    {
        let conversation_id = record.conversation.id;
        self.blocklist.ensure_not_blocked(&record.conversation.customer)?;
        if let Some(existing) = self.find_duplicate(conversation_id, &message)? {
            return Ok((duplicate(record, existing), Vec::new()));
        }
        self.store.ensure_open(conversation_id)?;

        record
            .conversation
            .record_outbound(message.content.display_content());
        ensure_consistent(&record.conversation)?;

        deliver(&record.conversation, &message.content).map_err(OutboundError::Rejected)?;
        let receipt = self.store.append(conversation_id, message, now)?;
        Ok(committed(record, receipt.message, receipt.duplicate))
    }

    fn find_duplicate(
        &self,
        conversation_id: ConversationId,
        message: &NewMessage,
    ) -> Result<Option<Message>, InboxError> {
        match message.idempotency_key.as_deref() {
            Some(key) => self.store.find_by_key(conversation_id, key),
            None => Ok(None),
        }
    }

    /// Runs `apply` on a working copy under the conversation token and
    /// commits it only on success.
    fn mutate<R, E, F>(&self, conversation_id: ConversationId, apply: F) -> Result<R, E>
    where
        E: From<InboxError>,
        F: FnOnce(&mut ConversationRecord, DateTime<Utc>) -> Result<Applied<R>, E>,
    {
        let slot = self.slot(conversation_id)?;
        slot.with(self.settings.lock_timeout, |record| -> Result<R, E> {
            let mut working = record.clone();
            let (value, events) = apply(&mut working, self.clock.now())?;
            *record = working;
            for event in events {
                self.feed.publish(event);
            }
            Ok(value)
        })
        .map_err(|err| E::from(token_error(conversation_id, err)))?
    }

    /// Like `mutate`, for the customer's conversation. A customer without
    /// one gets a fresh conversation that only becomes visible if `apply`
    /// succeeds. Creation is serialized per customer.
    fn with_customer_conversation<R, E, F>(
        &self,
        customer: &CustomerId,
        customer_name: &str,
        apply: F,
    ) -> Result<R, E>
    where
        E: From<InboxError>,
        F: FnOnce(&mut ConversationRecord, DateTime<Utc>) -> Result<Applied<R>, E>,
    {
        let customer_slot = self.customer_slot(customer)?;
        let mut pending = Some(apply);

        let located = customer_slot
            .with(self.settings.lock_timeout, |known| -> Result<Located<R>, E> {
                if let Some(id) = *known {
                    return Ok(Located::Existing(id));
                }
                let Some(apply) = pending.take() else {
                    return Err(E::from(poisoned(customer)));
                };

                let now = self.clock.now();
                let id = ConversationId(self.last_id.fetch_add(1, Ordering::AcqRel) + 1);
                let slot = Arc::new(OwnershipToken::new(ConversationRecord {
                    conversation: Conversation::open(id, customer.clone(), customer_name.trim(), now),
                    history: Vec::new(),
                }));

                let created = slot
                    .with(self.settings.lock_timeout, |record| -> Result<R, E> {
                        let (value, events) = apply(record, now)?;
                        self.conversations
                            .write()
                            .map_err(|_| poisoned("conversation index"))?
                            .insert(id, Arc::clone(&slot));
                        *known = Some(id);

                        tracing::info!(
                            conversation_id = %id,
                            customer_id = %customer,
                            "conversation opened"
                        );
                        for event in events {
                            self.feed.publish(event);
                        }
                        Ok(value)
                    })
                    .map_err(|err| E::from(token_error(id, err)))??;
                Ok(Located::Created(created))
            })
            .map_err(|err| E::from(customer_token_error(customer, err)))??;

        match located {
            Located::Created(value) => Ok(value),
            Located::Existing(id) => match pending.take() {
                Some(apply) => self.mutate(id, apply),
                None => Err(E::from(poisoned(customer))),
            },
        }
    }

    fn slot(&self, conversation_id: ConversationId) -> Result<Arc<ConversationSlot>, InboxError> {
        let conversations = self
            .conversations
            .read()
            .map_err(|_| poisoned("conversation index"))?;
        conversations
            .get(&conversation_id)
            .cloned()
            .ok_or(InboxError::ConversationNotFound(conversation_id))
    }

    fn customer_slot(&self, customer: &CustomerId) -> Result<Arc<CustomerSlot>, InboxError> {
        let mut customers = self.customers.lock().map_err(|_| poisoned(customer))?;
        Ok(Arc::clone(
            customers
                .entry(customer.clone())
                .or_insert_with(|| Arc::new(OwnershipToken::new(None))),
        ))
    }

    fn read<R>(
        &self,
        conversation_id: ConversationId,
        f: impl FnOnce(&ConversationRecord) -> R,
    ) -> Result<R, InboxError> {
        self.slot(conversation_id)?
            .with(self.settings.lock_timeout, |record| f(record))
            .map_err(|err| token_error(conversation_id, err))
    }
}

fn mark_viewed(record: &mut ConversationRecord) -> Applied<Conversation> {
    let conversation = &mut record.conversation;
    if conversation.unread_count == 0 {
        return (conversation.clone(), Vec::new());
    }

    conversation.mark_viewed();
    (
        conversation.clone(),
        vec![InboxEvent::conversation_updated(conversation)],
    )
}

fn committed(record: &ConversationRecord, message: Message, duplicate: bool) -> Applied<Delivery> {
    let events = vec![
        InboxEvent::message_appended(&message),
        InboxEvent::conversation_updated(&record.conversation),
    ];
    (
        Delivery {
            conversation: record.conversation.clone(),
            message,
            duplicate,
        },
        events,
    )
}

fn duplicate(record: &ConversationRecord, message: Message) -> Delivery {
    tracing::debug!(
        conversation_id = %record.conversation.id,
        message_id = %message.id,
        "duplicate message ignored"
    );
    Delivery {
        conversation: record.conversation.clone(),
        message,
        duplicate: true,
    }
}

fn ensure_consistent(conversation: &Conversation) -> Result<(), InboxError> {
    match conversation.invariant_violation() {
        None => Ok(()),
        Some(details) => {
            tracing::error!(
                code = "INBOX_INVARIANT_VIOLATION",
                conversation_id = %conversation.id,
                details,
                "conversation change aborted"
            );
            Err(InboxError::fatal(conversation.id, details))
        }
    }
}

fn token_error(conversation_id: ConversationId, error: TokenError) -> InboxError {
    match error {
        TokenError::Timeout => {
            tracing::warn!(
                code = "INBOX_LOCK_TIMEOUT",
                conversation_id = %conversation_id,
                "conversation token not acquired in time"
            );
            InboxError::Timeout(conversation_id)
        }
        TokenError::Poisoned => InboxError::fatal(conversation_id, "conversation state poisoned"),
    }
}

fn customer_token_error(customer: &CustomerId, error: TokenError) -> InboxError {
    match error {
        TokenError::Timeout => {
            tracing::warn!(
                code = "INBOX_LOCK_TIMEOUT",
                customer_id = %customer,
                "customer token not acquired in time"
            );
            InboxError::CustomerTimeout(customer.clone())
        }
        TokenError::Poisoned => poisoned(customer),
    }
}

fn poisoned(subject: impl ToString) -> InboxError {
    InboxError::fatal(subject, "lock poisoned")
}
