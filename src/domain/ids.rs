use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! sequential_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

macro_rules! external_ref {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

sequential_id!(
    /// Store-assigned conversation identity.
    ConversationId,
    "conv"
);
sequential_id!(
    /// Store-wide message identity. Allocated under the owning conversation's
    /// token, so ids also increase within every conversation.
    MessageId,
    "msg"
);
sequential_id!(CampaignId, "camp");
sequential_id!(TemplateId, "tpl");

external_ref!(
    /// Reference to a support agent, owned by the agent roster.
    AgentId
);
external_ref!(
    /// Reference to a customer, owned by the customer directory.
    CustomerId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_ids_render_with_prefix() {
        assert_eq!(ConversationId(7).to_string(), "conv-7");
        assert_eq!(MessageId(12).to_string(), "msg-12");
        assert_eq!(CampaignId(3).to_string(), "camp-3");
        assert_eq!(TemplateId(2).to_string(), "tpl-2");
    }

    #[test]
    fn external_refs_render_raw_value() {
        assert_eq!(AgentId::new("sarah").to_string(), "sarah");
        assert_eq!(CustomerId::from("cust-1").as_str(), "cust-1");
    }
}
