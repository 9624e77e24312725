use thiserror::Error;

use super::{
    conversation::ConversationStatus,
    ids::{AgentId, CampaignId, ConversationId, CustomerId, MessageId, TemplateId},
};

/// Caller-facing classification of every core failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input shape. Never retried automatically.
    Validation,
    /// Someone else changed the state first; re-read and decide.
    Conflict,
    /// Safe to retry, every operation is idempotent or CAS-based.
    Transient,
    /// Invariant violation or corrupted state; nothing was committed.
    Fatal,
}

impl ErrorKind {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::Conflict => "CONFLICT",
            Self::Transient => "TRANSIENT",
            Self::Fatal => "FATAL",
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }

    pub fn user_hint(self) -> &'static str {
        match self {
            Self::Validation => "Please check the highlighted field and try again.",
            Self::Conflict => "Someone else already did this. Refresh to see the latest state.",
            Self::Transient => "The inbox is busy right now. Please retry.",
            Self::Fatal => "Something went wrong and nothing was changed.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InboxError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),
    #[error("message {0} not found")]
    UnknownMessage(MessageId),
    #[error("agent {0} is not registered")]
    UnknownAgent(AgentId),
    #[error("campaign {0} not found")]
    CampaignNotFound(CampaignId),
    #[error("agent {agent_id} is inactive")]
    AgentInactive { agent_id: AgentId },
    #[error("conversation {conversation_id} is already assigned to {current}")]
    AlreadyAssigned {
        conversation_id: ConversationId,
        current: AgentId,
    },
    #[error("conversation {conversation_id} is no longer handled by {expected}")]
    NotCurrentAgent {
        conversation_id: ConversationId,
        expected: AgentId,
        current: Option<AgentId>,
    },
    #[error(
        "conversation {conversation_id} cannot move from {} to {}",
        .from.as_label(),
        .to.as_label()
    )]
    InvalidTransition {
        conversation_id: ConversationId,
        from: ConversationStatus,
        to: ConversationStatus,
    },
    #[error("campaign {0} has already been dispatched")]
    AlreadyDispatched(CampaignId),
    #[error("campaign {0} is not due for dispatch")]
    CampaignNotReady(CampaignId),
    #[error("customer {0} is blocked")]
    ContactBlocked(CustomerId),
    #[error("reply template {0} not found")]
    TemplateNotFound(TemplateId),
    #[error("message store unavailable for conversation {0}")]
    StoreUnavailable(ConversationId),
    #[error("timed out waiting for conversation {0}")]
    Timeout(ConversationId),
    #[error("timed out waiting for customer {0}")]
    CustomerTimeout(CustomerId),
    #[error("customer directory unavailable: {0}")]
    DirectoryUnavailable(String),
    #[error("transport unavailable for conversation {conversation_id}: {reason}")]
    TransportUnavailable {
        conversation_id: ConversationId,
        reason: String,
    },
    #[error("transport rejected message for conversation {conversation_id}: {reason}")]
    DeliveryRejected {
        conversation_id: ConversationId,
        reason: String,
    },
    #[error("corrupted state in {subject}: {details}")]
    Fatal { subject: String, details: String },
}

impl InboxError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn fatal(subject: impl ToString, details: impl Into<String>) -> Self {
        Self::Fatal {
            subject: subject.to_string(),
            details: details.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. }
            | Self::ConversationNotFound(_)
            | Self::UnknownMessage(_)
            | Self::UnknownAgent(_)
            | Self::CampaignNotFound(_)
            | Self::AgentInactive { .. }
            | Self::ContactBlocked(_)
            | Self::TemplateNotFound(_)
            | Self::DeliveryRejected { .. } => ErrorKind::Validation,
            Self::AlreadyAssigned { .. }
            | Self::NotCurrentAgent { .. }
            | Self::InvalidTransition { .. }
            | Self::AlreadyDispatched(_)
            | Self::CampaignNotReady(_) => ErrorKind::Conflict,
            Self::StoreUnavailable(_)
            | Self::Timeout(_)
            | Self::CustomerTimeout(_)
            | Self::DirectoryUnavailable(_)
            | Self::TransportUnavailable { .. } => ErrorKind::Transient,
            Self::Fatal { .. } => ErrorKind::Fatal,
        }
    }

    /// Stable code for structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "INBOX_VALIDATION_FAILED",
            Self::ConversationNotFound(_) => "INBOX_CONVERSATION_NOT_FOUND",
            Self::UnknownMessage(_) => "INBOX_UNKNOWN_MESSAGE",
            Self::UnknownAgent(_) => "INBOX_UNKNOWN_AGENT",
            Self::CampaignNotFound(_) => "INBOX_CAMPAIGN_NOT_FOUND",
            Self::AgentInactive { .. } => "INBOX_AGENT_INACTIVE",
            Self::AlreadyAssigned { .. } => "INBOX_ALREADY_ASSIGNED",
            Self::NotCurrentAgent { .. } => "INBOX_NOT_CURRENT_AGENT",
            Self::InvalidTransition { .. } => "INBOX_INVALID_TRANSITION",
            Self::AlreadyDispatched(_) => "INBOX_ALREADY_DISPATCHED",
            Self::CampaignNotReady(_) => "INBOX_CAMPAIGN_NOT_READY",
            Self::ContactBlocked(_) => "INBOX_CONTACT_BLOCKED",
            Self::TemplateNotFound(_) => "INBOX_TEMPLATE_NOT_FOUND",
            Self::StoreUnavailable(_) => "INBOX_STORE_UNAVAILABLE",
            Self::Timeout(_) | Self::CustomerTimeout(_) => "INBOX_TIMEOUT",
            Self::DirectoryUnavailable(_) => "INBOX_DIRECTORY_UNAVAILABLE",
            Self::TransportUnavailable { .. } => "INBOX_TRANSPORT_UNAVAILABLE",
            Self::DeliveryRejected { .. } => "INBOX_DELIVERY_REJECTED",
            Self::Fatal { .. } => "INBOX_FATAL",
        }
    }
}
