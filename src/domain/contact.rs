use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AgentId, CustomerId};

/// A customer an agent has blocked. Blocked customers cannot write in and
/// receive nothing from the inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedContact {
    pub customer: CustomerId,
    pub blocked_by: AgentId,
    pub blocked_at: DateTime<Utc>,
}
