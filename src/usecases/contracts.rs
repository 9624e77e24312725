use thiserror::Error;

use crate::domain::{
    audience::CustomerProfile,
    ids::{ConversationId, CustomerId},
    message::MessageContent,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectorySourceError {
    Unavailable(String),
    InvalidData(String),
}

/// Read-only view of customer records owned by the host application.
pub trait CustomerDirectory: Send + Sync {
    fn customers(&self) -> Result<Vec<CustomerProfile>, DirectorySourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundRequest<'a> {
    pub conversation_id: ConversationId,
    pub customer: &'a CustomerId,
    pub content: &'a MessageContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The recipient can never be reached with this message.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

/// Outbound half of the messaging channel. Inbound messages and delivery
/// receipts are fed into the inbox by the host.
pub trait OutboundTransport: Send + Sync {
    fn send(&self, request: &OutboundRequest<'_>) -> Result<(), TransportError>;
}
