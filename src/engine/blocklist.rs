use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, RwLock},
};

use crate::{
    domain::{
        contact::BlockedContact,
        error::InboxError,
        events::InboxEvent,
        ids::{AgentId, CustomerId},
    },
    engine::{clock::Clock, event_feed::EventFeed},
};

/// Customers agents have blocked.
#[derive(Debug, Clone)]
pub struct ContactBlocklist {
    entries: Arc<RwLock<BTreeMap<CustomerId, BlockedContact>>>,
    feed: EventFeed,
    clock: Arc<dyn Clock>,
}

impl ContactBlocklist {
    pub fn new(feed: EventFeed, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            feed,
            clock,
        }
    }

    /// Blocking an already blocked customer keeps the original entry.
    pub fn block(
        &self,
        customer: &CustomerId,
        blocked_by: &AgentId,
    ) -> Result<BlockedContact, InboxError> {
        if customer.as_str().trim().is_empty() {
            return Err(InboxError::validation("customer_id", "must not be empty"));
        }

        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        if let Some(existing) = entries.get(customer) {
            return Ok(existing.clone());
        }
        let entry = BlockedContact {
            customer: customer.clone(),
            blocked_by: blocked_by.clone(),
            blocked_at: self.clock.now(),
        };
        entries.insert(customer.clone(), entry.clone());
        drop(entries);

        tracing::info!(
            code = "INBOX_CONTACT_BLOCKED",
            customer_id = %customer,
            agent_id = %blocked_by,
            "contact blocked"
        );
        self.publish(customer, true);
        Ok(entry)
    }

    /// Returns whether the customer was blocked.
    pub fn unblock(&self, customer: &CustomerId) -> Result<bool, InboxError> {
        let removed = self
            .entries
            .write()
            .map_err(|_| poisoned())?
            .remove(customer)
            .is_some();

        if removed {
            tracing::info!(customer_id = %customer, "contact unblocked");
            self.publish(customer, false);
        }
        Ok(removed)
    }

    pub fn is_blocked(&self, customer: &CustomerId) -> Result<bool, InboxError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.contains_key(customer))
    }

    pub fn ensure_not_blocked(&self, customer: &CustomerId) -> Result<(), InboxError> {
        if self.is_blocked(customer)? {
            return Err(InboxError::ContactBlocked(customer.clone()));
        }
        Ok(())
    }

    pub fn blocked_ids(&self) -> Result<BTreeSet<CustomerId>, InboxError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.keys().cloned().collect())
    }

    pub fn list(&self) -> Result<Vec<BlockedContact>, InboxError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.values().cloned().collect())
    }

    fn publish(&self, customer: &CustomerId, blocked: bool) {
        self.feed.publish(InboxEvent::ContactBlockChanged {
            customer_id: customer.clone(),
            blocked,
        });
    }
}

fn poisoned() -> InboxError {
    InboxError::fatal("contact blocklist", "lock poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{base_time, ManualClock};

    fn blocklist() -> ContactBlocklist {
        let clock = Arc::new(ManualClock::default());
        ContactBlocklist::new(EventFeed::new(clock.clone()), clock)
    }

    #[test]
    fn blocked_contact_fails_check_until_unblocked() {
        let blocklist = blocklist();
        let customer = CustomerId::new("c1");

        let entry = blocklist
            .block(&customer, &AgentId::new("a1"))
            .expect("block");

        assert_eq!(entry.blocked_at, base_time());
        assert_eq!(
            blocklist.ensure_not_blocked(&customer),
            Err(InboxError::ContactBlocked(customer.clone()))
        );
        assert_eq!(blocklist.unblock(&customer), Ok(true));
        assert_eq!(blocklist.unblock(&customer), Ok(false));
        assert!(blocklist.ensure_not_blocked(&customer).is_ok());
    }

    #[test]
    fn blocking_twice_keeps_first_entry() {
        let blocklist = blocklist();
        let customer = CustomerId::new("c1");
        blocklist.block(&customer, &AgentId::new("a1")).expect("block");

        let again = blocklist
            .block(&customer, &AgentId::new("a2"))
            .expect("block again");

        assert_eq!(again.blocked_by, AgentId::new("a1"));
        assert_eq!(blocklist.list().expect("list").len(), 1);
    }

    #[test]
    fn block_and_unblock_publish_events() {
        let blocklist = blocklist();
        let events = blocklist.feed.subscribe();
        let customer = CustomerId::new("c1");

        blocklist.block(&customer, &AgentId::new("a1")).expect("block");
        blocklist.block(&customer, &AgentId::new("a1")).expect("block again");
        blocklist.unblock(&customer).expect("unblock");

        let blocked: Vec<bool> = events
            .try_iter()
            .filter_map(|envelope| match envelope.event {
                InboxEvent::ContactBlockChanged { blocked, .. } => Some(blocked),
                _ => None,
            })
            .collect();
        assert_eq!(blocked, vec![true, false]);
    }

    #[test]
    fn rejects_blank_customer() {
        assert!(matches!(
            blocklist().block(&CustomerId::new(" "), &AgentId::new("a1")),
            Err(InboxError::Validation { field: "customer_id", .. })
        ));
    }
}
