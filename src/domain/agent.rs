use serde::{Deserialize, Serialize};

use super::ids::AgentId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub display_name: String,
    pub active: bool,
}

impl Agent {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(id),
            display_name: display_name.into(),
            active: true,
        }
    }
}
