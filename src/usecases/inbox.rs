use std::{
    sync::{mpsc, Arc},
    time::Duration,
};

use crate::{
    domain::{
        agent::Agent,
        audience::{AudienceSegment, SegmentWindows},
        campaign::{BroadcastCampaign, CampaignDraft},
        contact::BlockedContact,
        conversation::{Conversation, StatusTransition},
        error::{ErrorKind, InboxError},
        events::EventEnvelope,
        ids::{AgentId, CampaignId, ConversationId, CustomerId, MessageId, TemplateId},
        message::{DeliveryStatus, Message, MessageContent},
        reply::{NewReplyTemplate, ReplyKind, ReplyTemplate},
    },
    engine::{
        AdvanceOutcome, AgentRoster, AssignmentResolver, Clock, ContactBlocklist,
        ConversationFilter, ConversationManager, ConversationSettings, Delivery, DeliveryTracker,
        EventFeed, MessageStore, OutboundError, ReplyLibrary,
    },
    infra::config::AppConfig,
    usecases::{
        audience::AudienceResolver,
        broadcast::{BroadcastScheduler, DispatchSettings},
        contracts::{CustomerDirectory, OutboundRequest, OutboundTransport, TransportError},
    },
};

const RECENT_MESSAGES_PAGE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineSettings {
    pub conversations: ConversationSettings,
    pub dispatch: DispatchSettings,
    pub windows: SegmentWindows,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            conversations: ConversationSettings {
                lock_timeout: Duration::from_millis(config.engine.lock_timeout_ms),
                max_text_chars: config.messages.max_text_chars,
            },
            dispatch: DispatchSettings {
                max_concurrent_sends: config.broadcast.max_concurrent_sends,
                max_send_attempts: config.broadcast.max_send_attempts,
            },
            windows: SegmentWindows {
                active_within: chrono::Duration::days(i64::from(
                    config.audience.active_window_days,
                )),
                new_within: chrono::Duration::days(i64::from(
                    config.audience.new_customer_window_days,
                )),
            },
        }
    }
}

/// Customer message as handed over by the transport adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub customer: CustomerId,
    pub customer_name: String,
    pub content: MessageContent,
    /// Transport message id; redeliveries with the same id are ignored.
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationView {
    pub conversation: Conversation,
    /// Most recent page of messages, oldest first.
    pub messages: Vec<Message>,
}

/// Entry point for callers. Each operation is a transaction boundary:
/// either every component effect is committed or one error is returned.
pub struct Inbox {
    store: Arc<MessageStore>,
    conversations: Arc<ConversationManager>,
    tracker: DeliveryTracker,
    assignment: AssignmentResolver,
    roster: AgentRoster,
    blocklist: ContactBlocklist,
    replies: ReplyLibrary,
    audience: AudienceResolver,
    broadcasts: Arc<BroadcastScheduler>,
    transport: Arc<dyn OutboundTransport>,
    feed: EventFeed,
}

impl std::fmt::Debug for Inbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbox")
            .field("conversations", &self.conversations)
            .field("broadcasts", &self.broadcasts)
            .finish_non_exhaustive()
    }
}

impl Inbox {
    pub fn new(
        settings: EngineSettings,
        directory: Arc<dyn CustomerDirectory>,
        transport: Arc<dyn OutboundTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let feed = EventFeed::new(Arc::clone(&clock));
        let store = Arc::new(MessageStore::new());
        let blocklist = ContactBlocklist::new(feed.clone(), Arc::clone(&clock));
        let conversations = Arc::new(
            ConversationManager::new(
                Arc::clone(&store),
                feed.clone(),
                Arc::clone(&clock),
                settings.conversations,
            )
            .with_blocklist(blocklist.clone()),
        );
        let roster = AgentRoster::new(feed.clone());
        let audience = AudienceResolver::new(directory, settings.windows, Arc::clone(&clock))
            .with_blocklist(blocklist.clone());
        let broadcasts = Arc::new(BroadcastScheduler::new(
            audience.clone(),
            Arc::clone(&conversations),
            Arc::clone(&transport),
            feed.clone(),
            clock,
            settings.dispatch,
        ));

        Self {
            tracker: DeliveryTracker::new(Arc::clone(&store), feed.clone()),
            assignment: AssignmentResolver::new(Arc::clone(&conversations), roster.clone()),
            replies: ReplyLibrary::new(settings.conversations.max_text_chars),
            store,
            conversations,
            roster,
            blocklist,
            audience,
            broadcasts,
            transport,
            feed,
        }
    }

    pub fn send_message(
        &self,
        conversation_id: ConversationId,
        agent: &AgentId,
        content: MessageContent,
        client_key: Option<String>,
    ) -> Result<Delivery, InboxError> {
        let result = self.roster.require_active(agent).and_then(|_| {
            self.conversations
                .record_outbound(conversation_id, agent, content, client_key, |conversation, content| {
                    self.transport.send(&OutboundRequest {
                        conversation_id: conversation.id,
                        customer: &conversation.customer,
                        content,
                    })
                })
                .map_err(|error| map_outbound_error(conversation_id, error))
        });
        logged("send_message", result)
    }

    pub fn receive_inbound_message(&self, inbound: InboundMessage) -> Result<Delivery, InboxError> {
        let result = self.conversations.record_inbound(
            &inbound.customer,
            &inbound.customer_name,
            inbound.content,
            inbound.external_id,
        );
        logged("receive_inbound_message", result)
    }

    /// Marks the conversation read and returns it with its latest messages.
    pub fn view_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationView, InboxError> {
        let result = self
            .conversations
            .view_recent(conversation_id, RECENT_MESSAGES_PAGE)
            .map(|(conversation, messages)| ConversationView {
                conversation,
                messages,
            });
        logged("view_conversation", result)
    }

    pub fn resolve_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Conversation, InboxError> {
        logged(
            "resolve_conversation",
            self.conversations.resolve(conversation_id),
        )
    }

    /// Creates the campaign draft-first and schedules it; immediate campaigns
    /// have been dispatched by the time this returns.
    pub fn create_broadcast(&self, draft: CampaignDraft) -> Result<BroadcastCampaign, InboxError> {
        let result = self.roster.require_active(&draft.author).and_then(|_| {
            let campaign_id = self.broadcasts.schedule(draft)?;
            self.broadcasts.get(campaign_id)
        });
        logged("create_broadcast", result)
    }

    pub fn assign(
        &self,
        conversation_id: ConversationId,
        agent: &AgentId,
    ) -> Result<Conversation, InboxError> {
        logged("assign", self.assignment.assign(conversation_id, agent))
    }

    pub fn assign_observed(
        &self,
        conversation_id: ConversationId,
        agent: &AgentId,
        observed: Option<&AgentId>,
    ) -> Result<Conversation, InboxError> {
        logged(
            "assign_observed",
            self.assignment
                .assign_observed(conversation_id, agent, observed),
        )
    }

    pub fn transfer(
        &self,
        conversation_id: ConversationId,
        from: &AgentId,
        to: &AgentId,
    ) -> Result<Conversation, InboxError> {
        logged("transfer", self.assignment.transfer(conversation_id, from, to))
    }

    pub fn unassign(&self, conversation_id: ConversationId) -> Result<Conversation, InboxError> {
        logged("unassign", self.conversations.unassign(conversation_id))
    }

    pub fn advance_delivery(
        &self,
        message_id: MessageId,
        status: DeliveryStatus,
    ) -> Result<AdvanceOutcome, InboxError> {
        logged("advance_delivery", self.tracker.advance(message_id, status))
    }

    pub fn delivery_status(&self, message_id: MessageId) -> Result<DeliveryStatus, InboxError> {
        self.tracker.status(message_id)
    }

    pub fn read_messages(
        &self,
        conversation_id: ConversationId,
        from_seq: u64,
        limit: usize,
    ) -> Result<Vec<Message>, InboxError> {
        logged(
            "read_messages",
            self.conversations.messages(conversation_id, from_seq, limit),
        )
    }

    pub fn conversation(&self, conversation_id: ConversationId) -> Result<Conversation, InboxError> {
        self.conversations.get(conversation_id)
    }

    pub fn conversation_history(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<StatusTransition>, InboxError> {
        self.conversations.history(conversation_id)
    }

    pub fn list_conversations(
        &self,
        filter: &ConversationFilter,
    ) -> Result<Vec<Conversation>, InboxError> {
        logged("list_conversations", self.conversations.list(filter))
    }

    pub fn cancel_broadcast(&self, campaign_id: CampaignId) -> Result<BroadcastCampaign, InboxError> {
        logged("cancel_broadcast", self.broadcasts.cancel(campaign_id))
    }

    pub fn halt_broadcast(&self, campaign_id: CampaignId) -> Result<BroadcastCampaign, InboxError> {
        logged("halt_broadcast", self.broadcasts.halt(campaign_id))
    }

    pub fn dispatch_due(&self) -> Result<Vec<BroadcastCampaign>, InboxError> {
        logged("dispatch_due", self.broadcasts.dispatch_due())
    }

    pub fn broadcast(&self, campaign_id: CampaignId) -> Result<BroadcastCampaign, InboxError> {
        self.broadcasts.get(campaign_id)
    }

    pub fn estimate_reach(&self, segment: AudienceSegment) -> Result<usize, InboxError> {
        logged("estimate_reach", self.audience.estimate_reach(segment))
    }

    pub fn register_agent(&self, agent: Agent) -> Result<Agent, InboxError> {
        logged("register_agent", self.roster.register(agent))
    }

    pub fn deactivate_agent(&self, agent_id: &AgentId) -> Result<Agent, InboxError> {
        logged("deactivate_agent", self.roster.deactivate(agent_id))
    }

    /// Blocks the customer: their messages are refused and sends to them,
    /// broadcasts included, stop.
    pub fn block_contact(
        &self,
        customer: &CustomerId,
        agent: &AgentId,
    ) -> Result<BlockedContact, InboxError> {
        let result = self
            .roster
            .require_active(agent)
            .and_then(|_| self.blocklist.block(customer, agent));
        logged("block_contact", result)
    }

    pub fn unblock_contact(&self, customer: &CustomerId) -> Result<bool, InboxError> {
        logged("unblock_contact", self.blocklist.unblock(customer))
    }

    pub fn is_contact_blocked(&self, customer: &CustomerId) -> Result<bool, InboxError> {
        self.blocklist.is_blocked(customer)
    }

    pub fn blocked_contacts(&self) -> Result<Vec<BlockedContact>, InboxError> {
        self.blocklist.list()
    }

    pub fn add_reply_template(&self, new: NewReplyTemplate) -> Result<ReplyTemplate, InboxError> {
        logged("add_reply_template", self.replies.add(new))
    }

    pub fn remove_reply_template(
        &self,
        template_id: TemplateId,
    ) -> Result<ReplyTemplate, InboxError> {
        logged("remove_reply_template", self.replies.remove(template_id))
    }

    pub fn reply_templates(&self, kind: Option<ReplyKind>) -> Result<Vec<ReplyTemplate>, InboxError> {
        self.replies.list(kind)
    }

    pub fn search_reply_templates(&self, query: &str) -> Result<Vec<ReplyTemplate>, InboxError> {
        self.replies.search(query)
    }

    /// Sends a stored quick reply or template as the agent's message.
    pub fn send_reply_template(
        &self,
        conversation_id: ConversationId,
        agent: &AgentId,
        template_id: TemplateId,
        client_key: Option<String>,
    ) -> Result<Delivery, InboxError> {
        let template = logged("send_reply_template", self.replies.get(template_id))?;
        self.send_message(conversation_id, agent, template.message(), client_key)
    }

    pub fn subscribe(&self) -> mpsc::Receiver<EventEnvelope> {
        self.feed.subscribe()
    }

    /// Shared handle for the scheduler daemon.
    pub fn scheduler(&self) -> Arc<BroadcastScheduler> {
        Arc::clone(&self.broadcasts)
    }

    /// Stops accepting new messages; reads keep working.
    pub fn close(&self) {
        self.store.close();
    }
}

fn map_outbound_error(
    conversation_id: ConversationId,
    error: OutboundError<TransportError>,
) -> InboxError {
    match error {
        OutboundError::Inbox(error) => error,
        OutboundError::Rejected(TransportError::Permanent(reason)) => {
            InboxError::DeliveryRejected {
                conversation_id,
                reason,
            }
        }
        OutboundError::Rejected(TransportError::Transient(reason)) => {
            InboxError::TransportUnavailable {
                conversation_id,
                reason,
            }
        }
    }
}

fn logged<T>(operation: &'static str, result: Result<T, InboxError>) -> Result<T, InboxError> {
    if let Err(error) = &result {
        let kind = error.kind();
        match kind {
            ErrorKind::Fatal => tracing::error!(
                code = error.code(),
                kind = kind.as_label(),
                operation,
                error = %error,
                "inbox operation failed"
            ),
            _ => tracing::debug!(
                code = error.code(),
                kind = kind.as_label(),
                operation,
                error = %error,
                "inbox operation rejected"
            ),
        }
    }
    result
}
