use std::sync::Arc;

use crate::{
    domain::{
        conversation::Conversation,
        error::InboxError,
        ids::{AgentId, ConversationId},
    },
    engine::{conversations::ConversationManager, roster::AgentRoster},
};

/// Claims conversations for agents. Every claim is a compare-and-set on the
/// assignee, evaluated under the conversation token.
#[derive(Debug, Clone)]
pub struct AssignmentResolver {
    conversations: Arc<ConversationManager>,
    roster: AgentRoster,
}

impl AssignmentResolver {
    pub fn new(conversations: Arc<ConversationManager>, roster: AgentRoster) -> Self {
        Self {
            conversations,
            roster,
        }
    }

    /// Claims an unassigned conversation. The first claim wins; later ones
    /// get `AlreadyAssigned` naming the winner.
    pub fn assign(
        &self,
        conversation_id: ConversationId,
        agent: &AgentId,
    ) -> Result<Conversation, InboxError> {
        self.assign_observed(conversation_id, agent, None)
    }

    /// Claims the conversation only if its assignee is still `observed`.
    pub fn assign_observed(
        &self,
        conversation_id: ConversationId,
        agent: &AgentId,
        observed: Option<&AgentId>,
    ) -> Result<Conversation, InboxError> {
        self.roster.require_active(agent)?;

        let result = self.conversations.update(conversation_id, |conversation, now| {
            conversation.claim(agent.clone(), observed, now).map(Some)
        });

        match &result {
            Ok(_) => tracing::info!(
                conversation_id = %conversation_id,
                agent_id = %agent,
                "conversation assigned"
            ),
            Err(InboxError::AlreadyAssigned { current, .. }) => tracing::info!(
                code = "INBOX_CLAIM_LOST",
                conversation_id = %conversation_id,
                agent_id = %agent,
                winner = %current,
                "conversation already claimed"
            ),
            Err(_) => {}
        }
        result
    }

    pub fn transfer(
        &self,
        conversation_id: ConversationId,
        from: &AgentId,
        to: &AgentId,
    ) -> Result<Conversation, InboxError> {
        self.roster.require_active(to)?;

        let conversation = self.conversations.update(conversation_id, |conversation, now| {
            conversation.transfer(from, to.clone(), now).map(Some)
        })?;

        tracing::info!(
            conversation_id = %conversation_id,
            from = %from,
            to = %to,
            "conversation transferred"
        );
        Ok(conversation)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use super::*;
    use crate::{
        domain::{
            agent::Agent, conversation::ConversationStatus, error::ErrorKind, ids::CustomerId,
            message::MessageContent,
        },
        engine::{
            conversations::ConversationSettings, event_feed::EventFeed,
            message_store::MessageStore,
        },
        test_support::ManualClock,
    };

    struct Fixture {
        resolver: AssignmentResolver,
        conversations: Arc<ConversationManager>,
        roster: AgentRoster,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let feed = EventFeed::new(clock.clone());
        let conversations = Arc::new(ConversationManager::new(
            Arc::new(MessageStore::new()),
            feed.clone(),
            clock,
            ConversationSettings::default(),
        ));
        let roster = AgentRoster::new(feed);
        for (id, name) in [("a1", "Sarah"), ("a2", "Mike"), ("a3", "Priya")] {
            roster.register(Agent::new(id, name)).expect("register");
        }

        Fixture {
            resolver: AssignmentResolver::new(Arc::clone(&conversations), roster.clone()),
            conversations,
            roster,
        }
    }

    fn open_conversation(fixture: &Fixture) -> ConversationId {
        fixture
            .conversations
            .record_inbound(
                &CustomerId::new("c1"),
                "John Doe",
                MessageContent::text("help"),
                None,
            )
            .expect("inbound")
            .conversation
            .id
    }

    fn agent(id: &str) -> AgentId {
        AgentId::new(id)
    }

    #[test]
    fn assign_keeps_unread_count() {
        let fixture = fixture();
        let id = open_conversation(&fixture);

        let assigned = fixture.resolver.assign(id, &agent("a1")).expect("assign");

        assert_eq!(assigned.status, ConversationStatus::Assigned);
        assert_eq!(assigned.assigned_agent, Some(agent("a1")));
        assert_eq!(assigned.unread_count, 1);
    }

    #[test]
    fn concurrent_claims_have_exactly_one_winner() {
        for _ in 0..20 {
            let fixture = fixture();
            let id = open_conversation(&fixture);
            let barrier = Arc::new(Barrier::new(2));

            let claims: Vec<_> = ["a1", "a2"]
                .into_iter()
                .map(|name| {
                    let resolver = fixture.resolver.clone();
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        resolver.assign(id, &AgentId::new(name))
                    })
                })
                .collect();
            let results: Vec<_> = claims
                .into_iter()
                .map(|claim| claim.join().expect("claim thread"))
                .collect();

            let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
            let losers: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
            assert_eq!(winners.len(), 1);
            assert_eq!(losers.len(), 1);

            let winner = winners[0].assigned_agent.clone().expect("winner assigned");
            assert_eq!(
                losers[0],
                &InboxError::AlreadyAssigned {
                    conversation_id: id,
                    current: winner.clone(),
                }
            );
            assert_eq!(
                fixture.conversations.get(id).expect("get").assigned_agent,
                Some(winner)
            );
        }
    }

    #[test]
    fn inactive_agent_cannot_claim() {
        let fixture = fixture();
        let id = open_conversation(&fixture);
        fixture.roster.deactivate(&agent("a2")).expect("deactivate");

        let err = fixture.resolver.assign(id, &agent("a2")).expect_err("inactive");

        assert_eq!(err, InboxError::AgentInactive { agent_id: agent("a2") });
        assert_eq!(
            fixture.conversations.get(id).expect("get").status,
            ConversationStatus::New
        );
    }

    #[test]
    fn unknown_agent_is_rejected_as_validation() {
        let fixture = fixture();
        let id = open_conversation(&fixture);

        let err = fixture.resolver.assign(id, &agent("ghost")).expect_err("unknown");

        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn observed_claim_fails_once_assignee_changed() {
        let fixture = fixture();
        let id = open_conversation(&fixture);
        fixture.resolver.assign(id, &agent("a1")).expect("assign");
        fixture
            .resolver
            .transfer(id, &agent("a1"), &agent("a2"))
            .expect("transfer");

        let stale = fixture
            .resolver
            .assign_observed(id, &agent("a3"), Some(&agent("a1")));
        let fresh = fixture
            .resolver
            .assign_observed(id, &agent("a3"), Some(&agent("a2")))
            .expect("reassign");

        assert!(matches!(stale, Err(InboxError::AlreadyAssigned { .. })));
        assert_eq!(fresh.assigned_agent, Some(agent("a3")));
    }

    #[test]
    fn transfer_from_stale_agent_is_a_conflict() {
        let fixture = fixture();
        let id = open_conversation(&fixture);
        fixture.resolver.assign(id, &agent("a1")).expect("assign");

        let err = fixture
            .resolver
            .transfer(id, &agent("a2"), &agent("a3"))
            .expect_err("stale");

        assert_eq!(
            err,
            InboxError::NotCurrentAgent {
                conversation_id: id,
                expected: agent("a2"),
                current: Some(agent("a1")),
            }
        );
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn transfer_keeps_resolved_status() {
        let fixture = fixture();
        let id = open_conversation(&fixture);
        fixture.resolver.assign(id, &agent("a1")).expect("assign");
        fixture.conversations.resolve(id).expect("resolve");

        let moved = fixture
            .resolver
            .transfer(id, &agent("a1"), &agent("a2"))
            .expect("transfer");

        assert_eq!(moved.status, ConversationStatus::Resolved);
        assert_eq!(moved.assigned_agent, Some(agent("a2")));
    }

    #[test]
    fn transfer_to_inactive_agent_is_rejected() {
        let fixture = fixture();
        let id = open_conversation(&fixture);
        fixture.resolver.assign(id, &agent("a1")).expect("assign");
        fixture.roster.deactivate(&agent("a3")).expect("deactivate");

        assert_eq!(
            fixture.resolver.transfer(id, &agent("a1"), &agent("a3")),
            Err(InboxError::AgentInactive { agent_id: agent("a3") })
        );
    }
}
