use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use crate::{
    domain::{agent::Agent, error::InboxError, events::InboxEvent, ids::AgentId},
    engine::event_feed::EventFeed,
};

/// Registered support agents and their active flag.
#[derive(Debug, Clone)]
pub struct AgentRoster {
    agents: Arc<RwLock<BTreeMap<AgentId, Agent>>>,
    feed: EventFeed,
}

impl AgentRoster {
    pub fn new(feed: EventFeed) -> Self {
        Self {
            agents: Arc::new(RwLock::new(BTreeMap::new())),
            feed,
        }
    }

    /// Adds or replaces an agent record.
    pub fn register(&self, agent: Agent) -> Result<Agent, InboxError> {
        if agent.id.as_str().trim().is_empty() {
            return Err(InboxError::validation("agent_id", "must not be empty"));
        }
        if agent.display_name.trim().is_empty() {
            return Err(InboxError::validation("display_name", "must not be empty"));
        }

        let mut agents = self.agents.write().map_err(|_| poisoned())?;
        agents.insert(agent.id.clone(), agent.clone());
        drop(agents);

        tracing::info!(agent_id = %agent.id, active = agent.active, "agent registered");
        self.feed.publish(InboxEvent::agent_updated(&agent));
        Ok(agent)
    }

    pub fn deactivate(&self, agent_id: &AgentId) -> Result<Agent, InboxError> {
        self.set_active(agent_id, false)
    }

    pub fn activate(&self, agent_id: &AgentId) -> Result<Agent, InboxError> {
        self.set_active(agent_id, true)
    }

    pub fn get(&self, agent_id: &AgentId) -> Result<Agent, InboxError> {
        let agents = self.agents.read().map_err(|_| poisoned())?;
        agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| InboxError::UnknownAgent(agent_id.clone()))
    }

    pub fn require_active(&self, agent_id: &AgentId) -> Result<Agent, InboxError> {
        let agent = self.get(agent_id)?;
        if !agent.active {
            return Err(InboxError::AgentInactive {
                agent_id: agent_id.clone(),
            });
        }
        Ok(agent)
    }

    pub fn list(&self) -> Result<Vec<Agent>, InboxError> {
        let agents = self.agents.read().map_err(|_| poisoned())?;
        Ok(agents.values().cloned().collect())
    }

    fn set_active(&self, agent_id: &AgentId, active: bool) -> Result<Agent, InboxError> {
        let mut agents = self.agents.write().map_err(|_| poisoned())?;
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| InboxError::UnknownAgent(agent_id.clone()))?;
        if agent.active == active {
            return Ok(agent.clone());
        }

        agent.active = active;
        let updated = agent.clone();
        drop(agents);

        tracing::info!(agent_id = %agent_id, active, "agent availability changed");
        self.feed.publish(InboxEvent::agent_updated(&updated));
        Ok(updated)
    }
}

fn poisoned() -> InboxError {
    InboxError::fatal("agent roster", "lock poisoned")
}
