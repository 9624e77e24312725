use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    error::InboxError,
    ids::{AgentId, ConversationId, CustomerId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    New,
    Assigned,
    Resolved,
}

impl ConversationStatus {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Assigned => "assigned",
            Self::Resolved => "resolved",
        }
    }
}

impl FromStr for ConversationStatus {
    type Err = InboxError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "assigned" => Ok(Self::Assigned),
            "resolved" => Ok(Self::Resolved),
            other => Err(InboxError::validation(
                "status",
                format!("unknown conversation status `{other}`"),
            )),
        }
    }
}

/// One entry of a conversation's audit trail. Transfers keep the status and
/// are recorded with `from == to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: ConversationStatus,
    pub to: ConversationStatus,
    pub agent: Option<AgentId>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub customer: CustomerId,
    pub customer_name: String,
    pub status: ConversationStatus,
    pub assigned_agent: Option<AgentId>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub unread_count: u32,
    pub last_message_preview: Option<String>,
}

impl Conversation {
    pub fn open(
        id: ConversationId,
        customer: CustomerId,
        customer_name: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            customer,
            customer_name: customer_name.into(),
            status: ConversationStatus::New,
            assigned_agent: None,
            created_at: at,
            last_activity_at: at,
            unread_count: 0,
            last_message_preview: None,
        }
    }

    /// Applies an inbound customer message. A resolved conversation is
    /// reopened and loses its agent.
    pub fn record_inbound(
        &mut self,
        preview: String,
        at: DateTime<Utc>,
    ) -> Option<StatusTransition> {
        let reopened = (self.status == ConversationStatus::Resolved).then(|| {
            self.assigned_agent = None;
            self.transition_to(ConversationStatus::New, None, at)
        });

        self.unread_count = self.unread_count.saturating_add(1);
        self.last_activity_at = at;
        self.last_message_preview = Some(preview);
        reopened
    }

    /// Agent and broadcast messages refresh the preview only; activity
    /// ordering follows the customer.
    pub fn record_outbound(&mut self, preview: String) {
        self.last_message_preview = Some(preview);
    }

    pub fn mark_viewed(&mut self) {
        self.unread_count = 0;
    }

    /// First-claim-wins assignment: only succeeds when the assignee still
    /// matches what the caller observed.
    pub fn claim(
        &mut self,
        agent: AgentId,
        observed: Option<&AgentId>,
        at: DateTime<Utc>,
    ) -> Result<StatusTransition, InboxError> {
        if self.assigned_agent.as_ref() != observed {
            return Err(match &self.assigned_agent {
                Some(current) => InboxError::AlreadyAssigned {
                    conversation_id: self.id,
                    current: current.clone(),
                },
                None => InboxError::NotCurrentAgent {
                    conversation_id: self.id,
                    expected: observed.cloned().unwrap_or_else(|| agent.clone()),
                    current: None,
                },
            });
        }

        if let Some(current) = &self.assigned_agent {
            if *current == agent {
                return Err(InboxError::AlreadyAssigned {
                    conversation_id: self.id,
                    current: current.clone(),
                });
            }
            return Ok(self.hand_over(agent, at));
        }

        if self.status != ConversationStatus::New {
            return Err(self.invalid(ConversationStatus::Assigned));
        }

        self.assigned_agent = Some(agent.clone());
        Ok(self.transition_to(ConversationStatus::Assigned, Some(agent), at))
    }

    pub fn transfer(
        &mut self,
        from: &AgentId,
        to: AgentId,
        at: DateTime<Utc>,
    ) -> Result<StatusTransition, InboxError> {
        if self.assigned_agent.as_ref() != Some(from) {
            return Err(InboxError::NotCurrentAgent {
                conversation_id: self.id,
                expected: from.clone(),
                current: self.assigned_agent.clone(),
            });
        }

        Ok(self.hand_over(to, at))
    }

    /// Resolving an already resolved conversation is a no-op so retries
    /// cannot fail.
    pub fn resolve(&mut self, at: DateTime<Utc>) -> Result<Option<StatusTransition>, InboxError> {
        match (self.status, &self.assigned_agent) {
            (ConversationStatus::Assigned, Some(agent)) => {
                let agent = agent.clone();
                Ok(Some(self.transition_to(
                    ConversationStatus::Resolved,
                    Some(agent),
                    at,
                )))
            }
            (ConversationStatus::Resolved, Some(_)) => Ok(None),
            _ => Err(self.invalid(ConversationStatus::Resolved)),
        }
    }

    pub fn unassign(&mut self, at: DateTime<Utc>) -> Result<StatusTransition, InboxError> {
        if self.status != ConversationStatus::Assigned {
            return Err(self.invalid(ConversationStatus::New));
        }

        let agent = self.assigned_agent.take();
        Ok(self.transition_to(ConversationStatus::New, agent, at))
    }

    /// Returns a description of the first broken invariant, if any.
    pub fn invariant_violation(&self) -> Option<&'static str> {
        match (self.status, &self.assigned_agent) {
            (ConversationStatus::New, Some(_)) => Some("new conversation carries an agent"),
            (ConversationStatus::Assigned, None) => Some("assigned conversation has no agent"),
            (ConversationStatus::Resolved, None) => Some("resolved conversation has no agent"),
            _ if self.last_activity_at < self.created_at => {
                Some("last activity precedes creation")
            }
            _ => None,
        }
    }

    fn hand_over(&mut self, to: AgentId, at: DateTime<Utc>) -> StatusTransition {
        self.assigned_agent = Some(to.clone());
        StatusTransition {
            from: self.status,
            to: self.status,
            agent: Some(to),
            at,
        }
    }

    fn transition_to(
        &mut self,
        to: ConversationStatus,
        agent: Option<AgentId>,
        at: DateTime<Utc>,
    ) -> StatusTransition {
        let from = self.status;
        self.status = to;
        StatusTransition { from, to, agent, at }
    }

    fn invalid(&self, to: ConversationStatus) -> InboxError {
        InboxError::InvalidTransition {
            conversation_id: self.id,
            from: self.status,
            to,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap()
    }

    fn conversation() -> Conversation {
        Conversation::open(ConversationId(1), CustomerId::new("c1"), "John Doe", at(0))
    }

    fn agent(name: &str) -> AgentId {
        AgentId::new(name)
    }

    #[test]
    fn new_conversation_is_unassigned_with_no_unread() {
        let conversation = conversation();

        assert_eq!(conversation.status, ConversationStatus::New);
        assert_eq!(conversation.unread_count, 0);
        assert_eq!(conversation.invariant_violation(), None);
    }

    #[test]
    fn claim_moves_new_to_assigned() {
        let mut conversation = conversation();

        let transition = conversation
            .claim(agent("a1"), None, at(1))
            .expect("claim should succeed");

        assert_eq!(transition.from, ConversationStatus::New);
        assert_eq!(transition.to, ConversationStatus::Assigned);
        assert_eq!(conversation.assigned_agent, Some(agent("a1")));
    }

    #[test]
    fn second_claim_reports_current_owner() {
        let mut conversation = conversation();
        conversation.claim(agent("a1"), None, at(1)).expect("claim");

        let err = conversation
            .claim(agent("a2"), None, at(2))
            .expect_err("second claim must fail");

        assert_eq!(
            err,
            InboxError::AlreadyAssigned {
                conversation_id: ConversationId(1),
                current: agent("a1"),
            }
        );
        assert_eq!(conversation.assigned_agent, Some(agent("a1")));
    }

    #[test]
    fn resolving_new_conversation_is_invalid() {
        let mut conversation = conversation();

        let err = conversation.resolve(at(1)).expect_err("must fail");

        assert_eq!(
            err,
            InboxError::InvalidTransition {
                conversation_id: ConversationId(1),
                from: ConversationStatus::New,
                to: ConversationStatus::Resolved,
            }
        );
    }

    #[test]
    fn resolving_twice_is_a_noop() {
        let mut conversation = conversation();
        conversation.claim(agent("a1"), None, at(1)).expect("claim");

        assert!(conversation.resolve(at(2)).expect("resolve").is_some());
        assert!(conversation.resolve(at(3)).expect("resolve again").is_none());
        assert_eq!(conversation.status, ConversationStatus::Resolved);
    }

    #[test]
    fn inbound_on_resolved_reopens_and_clears_agent() {
        let mut conversation = conversation();
        conversation.claim(agent("a1"), None, at(1)).expect("claim");
        conversation.resolve(at(2)).expect("resolve");

        let transition = conversation.record_inbound("back again".to_owned(), at(3));

        assert_eq!(
            transition.map(|t| (t.from, t.to)),
            Some((ConversationStatus::Resolved, ConversationStatus::New))
        );
        assert_eq!(conversation.assigned_agent, None);
        assert_eq!(conversation.unread_count, 1);
        assert_eq!(conversation.last_activity_at, at(3));
    }

    #[test]
    fn status_changes_do_not_bump_last_activity() {
        let mut conversation = conversation();
        conversation.record_inbound("hi".to_owned(), at(1));

        conversation.claim(agent("a1"), None, at(5)).expect("claim");
        conversation.resolve(at(6)).expect("resolve");

        assert_eq!(conversation.last_activity_at, at(1));
    }

    #[test]
    fn outbound_updates_preview_but_not_activity() {
        let mut conversation = conversation();
        conversation.record_inbound("hi".to_owned(), at(1));

        conversation.record_outbound("On it".to_owned());

        assert_eq!(conversation.last_activity_at, at(1));
        assert_eq!(conversation.last_message_preview.as_deref(), Some("On it"));
        assert_eq!(conversation.unread_count, 1);
    }

    #[test]
    fn unassign_returns_to_new_only_from_assigned() {
        let mut conversation = conversation();
        assert!(conversation.unassign(at(1)).is_err());

        conversation.claim(agent("a1"), None, at(1)).expect("claim");
        let transition = conversation.unassign(at(2)).expect("unassign");

        assert_eq!(transition.to, ConversationStatus::New);
        assert_eq!(transition.agent, Some(agent("a1")));
        assert_eq!(conversation.assigned_agent, None);
    }

    #[test]
    fn transfer_requires_current_agent() {
        let mut conversation = conversation();
        conversation.claim(agent("a1"), None, at(1)).expect("claim");

        let err = conversation
            .transfer(&agent("a2"), agent("a3"), at(2))
            .expect_err("must fail");
        assert!(matches!(err, InboxError::NotCurrentAgent { .. }));

        let transition = conversation
            .transfer(&agent("a1"), agent("a3"), at(2))
            .expect("transfer");
        assert_eq!(transition.from, transition.to);
        assert_eq!(conversation.assigned_agent, Some(agent("a3")));
    }

    #[test]
    fn parses_status_labels() {
        assert_eq!(
            "Assigned".parse::<ConversationStatus>().expect("parse"),
            ConversationStatus::Assigned
        );
        assert!("closed".parse::<ConversationStatus>().is_err());
    }
}
