use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    error::InboxError,
    ids::{AgentId, ConversationId, CustomerId, MessageId},
};

/// Type of media attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    File,
}

impl MediaKind {
    pub fn display_label(&self) -> &'static str {
        match self {
            MediaKind::Image => "[Image]",
            MediaKind::File => "[File]",
        }
    }
}

/// Message body. Media is always a stable reference handed out by the
/// attachment store, never raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageContent {
    Text(String),
    Media {
        kind: MediaKind,
        reference: String,
        caption: Option<String>,
    },
}

impl MessageContent {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Trims text and caption and enforces non-empty, bounded content.
    pub fn normalized(self, max_chars: usize) -> Result<Self, InboxError> {
        match self {
            MessageContent::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(InboxError::validation("text", "must not be empty"));
                }
                if text.chars().count() > max_chars {
                    return Err(InboxError::validation(
                        "text",
                        format!("must be at most {max_chars} characters"),
                    ));
                }
                Ok(MessageContent::Text(text.to_owned()))
            }
            MessageContent::Media {
                kind,
                reference,
                caption,
            } => {
                let reference = reference.trim();
                if reference.is_empty() {
                    return Err(InboxError::validation("media", "reference must not be empty"));
                }
                let caption = caption
                    .map(|caption| caption.trim().to_owned())
                    .filter(|caption| !caption.is_empty());
                if caption
                    .as_ref()
                    .is_some_and(|caption| caption.chars().count() > max_chars)
                {
                    return Err(InboxError::validation(
                        "caption",
                        format!("must be at most {max_chars} characters"),
                    ));
                }
                Ok(MessageContent::Media {
                    kind,
                    reference: reference.to_owned(),
                    caption,
                })
            }
        }
    }

    /// Returns the display content: media label + caption, or just text.
    pub fn display_content(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Media { kind, caption, .. } => match caption.as_deref() {
                Some(caption) if !caption.is_empty() => {
                    format!("{} {}", kind.display_label(), caption)
                }
                _ => kind.display_label().to_owned(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sender {
    Customer(CustomerId),
    Agent(AgentId),
}

impl Sender {
    pub fn is_customer(&self) -> bool {
        matches!(self, Sender::Customer(_))
    }
}

/// Per-message delivery progression. The derived ordering is the only
/// direction status may move in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    /// Status a freshly appended message starts with. Customer messages are
    /// already read from the sending side.
    pub fn initial_for(sender: &Sender) -> Self {
        if sender.is_customer() {
            Self::Read
        } else {
            Self::Sent
        }
    }

    pub(crate) fn to_rank(self) -> u8 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Read => 2,
        }
    }

    pub(crate) fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            0 => Some(Self::Sent),
            1 => Some(Self::Delivered),
            2 => Some(Self::Read),
            _ => None,
        }
    }
}

/// Message as submitted to the store, before it owns an id and sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: Sender,
    pub content: MessageContent,
    /// Transport message id or client key; resubmissions with the same key
    /// resolve to the message recorded first.
    pub idempotency_key: Option<String>,
}

impl NewMessage {
    pub fn new(sender: Sender, content: MessageContent) -> Self {
        Self {
            sender,
            content,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub seq: u64,
    pub sender: Sender,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
    pub delivery_status: DeliveryStatus,
}

impl Message {
    pub fn is_inbound(&self) -> bool {
        self.sender.is_customer()
    }
}
