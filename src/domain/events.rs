use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    agent::Agent,
    campaign::CampaignStatus,
    conversation::{Conversation, ConversationStatus},
    ids::{AgentId, CampaignId, ConversationId, CustomerId, MessageId},
    message::{DeliveryStatus, Message},
};

/// State change published to subscribers of the event feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboxEvent {
    ConversationUpdated {
        conversation_id: ConversationId,
        status: ConversationStatus,
        assigned_agent: Option<AgentId>,
        unread_count: u32,
    },
    MessageAppended {
        conversation_id: ConversationId,
        message_id: MessageId,
        seq: u64,
        status: DeliveryStatus,
    },
    DeliveryStatusChanged {
        conversation_id: ConversationId,
        message_id: MessageId,
        status: DeliveryStatus,
    },
    CampaignStatusChanged {
        campaign_id: CampaignId,
        status: CampaignStatus,
    },
    AgentUpdated {
        agent_id: AgentId,
        active: bool,
    },
    ContactBlockChanged {
        customer_id: CustomerId,
        blocked: bool,
    },
}

impl InboxEvent {
    pub fn conversation_updated(conversation: &Conversation) -> Self {
        Self::ConversationUpdated {
            conversation_id: conversation.id,
            status: conversation.status,
            assigned_agent: conversation.assigned_agent.clone(),
            unread_count: conversation.unread_count,
        }
    }

    pub fn message_appended(message: &Message) -> Self {
        Self::MessageAppended {
            conversation_id: message.conversation_id,
            message_id: message.id,
            seq: message.seq,
            status: message.delivery_status,
        }
    }

    pub fn agent_updated(agent: &Agent) -> Self {
        Self::AgentUpdated {
            agent_id: agent.id.clone(),
            active: agent.active,
        }
    }
}

/// Event as delivered to subscribers: feed-wide sequence plus timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub sequence: u64,
    pub at: DateTime<Utc>,
    pub event: InboxEvent,
}
