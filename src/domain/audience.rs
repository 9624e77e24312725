use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{error::InboxError, ids::CustomerId};

/// Named rule selecting the customers a broadcast goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudienceSegment {
    All,
    Active,
    Inactive,
    New,
}

impl AudienceSegment {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::New => "new",
        }
    }
}

impl FromStr for AudienceSegment {
    type Err = InboxError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "new" => Ok(Self::New),
            other => Err(InboxError::validation(
                "segment",
                format!("unknown audience segment `{other}`"),
            )),
        }
    }
}

/// Customer record as exposed by the customer directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub id: CustomerId,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub opted_out: bool,
}

/// Time windows that give `active` and `new` their meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentWindows {
    pub active_within: Duration,
    pub new_within: Duration,
}

impl Default for SegmentWindows {
    fn default() -> Self {
        Self {
            active_within: Duration::days(30),
            new_within: Duration::days(14),
        }
    }
}

impl SegmentWindows {
    /// Segment membership of one customer at `now`. Opt-out is checked by the
    /// resolver, not here.
    pub fn matches(
        &self,
        segment: AudienceSegment,
        customer: &CustomerProfile,
        now: DateTime<Utc>,
    ) -> bool {
        match segment {
            AudienceSegment::All => true,
            AudienceSegment::Active => self.is_active(customer, now),
            AudienceSegment::Inactive => !self.is_active(customer, now),
            AudienceSegment::New => {
                customer.created_at <= now && now - customer.created_at <= self.new_within
            }
        }
    }

    fn is_active(&self, customer: &CustomerProfile, now: DateTime<Utc>) -> bool {
        customer
            .last_active_at
            .is_some_and(|seen| seen <= now && now - seen <= self.active_within)
    }
}
