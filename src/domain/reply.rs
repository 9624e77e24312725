use serde::{Deserialize, Serialize};

use super::{error::InboxError, ids::TemplateId, message::MessageContent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    /// One-tap canned text.
    QuickReply,
    /// Named longer message picked from the template list.
    Template,
}

impl ReplyKind {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::QuickReply => "quick_reply",
            Self::Template => "template",
        }
    }
}

/// Reply text kept for agents composing messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTemplate {
    pub id: TemplateId,
    pub kind: ReplyKind,
    pub name: Option<String>,
    pub content: String,
}

impl ReplyTemplate {
    pub fn from_new(id: TemplateId, new: NewReplyTemplate) -> Self {
        Self {
            id,
            kind: new.kind,
            name: new.name.map(|name| name.trim().to_owned()),
            content: new.content.trim().to_owned(),
        }
    }

    /// Case-insensitive match on name or content; `needle` is lowercase.
    pub fn matches(&self, needle: &str) -> bool {
        self.content.to_lowercase().contains(needle)
            || self
                .name
                .as_deref()
                .is_some_and(|name| name.to_lowercase().contains(needle))
    }

    pub fn message(&self) -> MessageContent {
        MessageContent::text(self.content.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReplyTemplate {
    pub kind: ReplyKind,
    pub name: Option<String>,
    pub content: String,
}

impl NewReplyTemplate {
    pub fn quick_reply(text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::QuickReply,
            name: None,
            content: text.into(),
        }
    }

    pub fn template(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Template,
            name: Some(name.into()),
            content: content.into(),
        }
    }

    /// Content follows the outgoing text rules; templates need a name.
    pub fn validate(&self, max_chars: usize) -> Result<(), InboxError> {
        MessageContent::text(self.content.as_str()).normalized(max_chars)?;
        let name = self.name.as_deref().map(str::trim);
        match (self.kind, name) {
            (ReplyKind::Template, None | Some("")) => {
                Err(InboxError::validation("name", "templates need a name"))
            }
            (ReplyKind::QuickReply, Some(_)) => {
                Err(InboxError::validation("name", "quick replies are not named"))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_requires_a_name() {
        let unnamed = NewReplyTemplate {
            kind: ReplyKind::Template,
            name: Some("  ".to_owned()),
            content: "Thanks for reaching out".to_owned(),
        };

        assert!(matches!(
            unnamed.validate(100),
            Err(InboxError::Validation { field: "name", .. })
        ));
        assert!(NewReplyTemplate::template("Greeting", "Hello!").validate(100).is_ok());
    }

    #[test]
    fn content_follows_text_rules() {
        assert!(matches!(
            NewReplyTemplate::quick_reply("   ").validate(100),
            Err(InboxError::Validation { field: "text", .. })
        ));
        assert!(NewReplyTemplate::quick_reply("Thanks!").validate(5).is_err());
    }

    #[test]
    fn matches_name_or_content_ignoring_case() {
        let template = ReplyTemplate::from_new(
            TemplateId(1),
            NewReplyTemplate::template(" Order Status ", " Your order is on its way. "),
        );

        assert_eq!(template.name.as_deref(), Some("Order Status"));
        assert_eq!(template.content, "Your order is on its way.");
        assert!(template.matches("order status"));
        assert!(template.matches("on its way"));
        assert!(!template.matches("refund"));
    }
}
