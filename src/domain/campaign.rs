use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    audience::AudienceSegment,
    error::InboxError,
    ids::{AgentId, CampaignId, CustomerId, MessageId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Completed,
    Failed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Send-time presets offered to campaign authors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendWindow {
    Now,
    Morning,
    Afternoon,
    Evening,
}

impl SendWindow {
    fn hour(self) -> Option<u32> {
        match self {
            Self::Now => None,
            Self::Morning => Some(9),
            Self::Afternoon => Some(14),
            Self::Evening => Some(18),
        }
    }

    /// Resolves the preset on `date` into a scheduled-at instant. `Now` means
    /// immediate dispatch.
    pub fn scheduled_at(
        self,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, InboxError> {
        let Some(hour) = self.hour() else {
            return Ok(None);
        };

        let time = NaiveTime::from_hms_opt(hour, 0, 0)
            .ok_or_else(|| InboxError::validation("window", "invalid hour"))?;
        let at = date.and_time(time).and_utc();
        if at <= now {
            return Err(InboxError::validation(
                "scheduled_at",
                format!("{at} is not in the future"),
            ));
        }

        Ok(Some(at))
    }
}

impl FromStr for SendWindow {
    type Err = InboxError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "now" => Ok(Self::Now),
            "morning" => Ok(Self::Morning),
            "afternoon" => Ok(Self::Afternoon),
            "evening" => Ok(Self::Evening),
            other => Err(InboxError::validation(
                "window",
                format!("unknown send window `{other}`"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignDraft {
    pub title: String,
    pub body: String,
    pub segment: AudienceSegment,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub author: AgentId,
}

impl CampaignDraft {
    pub fn validate(&self) -> Result<(), InboxError> {
        if self.title.trim().is_empty() {
            return Err(InboxError::validation("title", "must not be empty"));
        }
        if self.body.trim().is_empty() {
            return Err(InboxError::validation("body", "must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryOutcome {
    Delivered { message_id: MessageId },
    Failed { reason: String, attempts: u32 },
    /// Not attempted because the dispatch was halted first.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientOutcome {
    pub customer: CustomerId,
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CampaignReport {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl CampaignReport {
    pub fn from_outcomes(outcomes: &[RecipientOutcome]) -> Self {
        outcomes
            .iter()
            .fold(Self::default(), |mut report, entry| {
                match entry.outcome {
                    DeliveryOutcome::Delivered { .. } => report.delivered += 1,
                    DeliveryOutcome::Failed { .. } => report.failed += 1,
                    DeliveryOutcome::Skipped => report.skipped += 1,
                }
                report
            })
    }

    pub fn total(&self) -> usize {
        self.delivered + self.failed + self.skipped
    }

    pub fn is_full_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    pub fn is_partial_success(&self) -> bool {
        self.delivered > 0 && !self.is_full_success()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastCampaign {
    pub id: CampaignId,
    pub title: String,
    pub body: String,
    pub segment: AudienceSegment,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub author: AgentId,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcomes: Vec<RecipientOutcome>,
    pub failure_reason: Option<String>,
}

impl BroadcastCampaign {
    pub fn from_draft(id: CampaignId, draft: CampaignDraft, at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: draft.title.trim().to_owned(),
            body: draft.body.trim().to_owned(),
            segment: draft.segment,
            scheduled_at: draft.scheduled_at,
            author: draft.author,
            status: CampaignStatus::Draft,
            created_at: at,
            dispatched_at: None,
            finished_at: None,
            outcomes: Vec::new(),
            failure_reason: None,
        }
    }

    pub fn report(&self) -> CampaignReport {
        CampaignReport::from_outcomes(&self.outcomes)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == CampaignStatus::Scheduled && self.scheduled_at.map_or(true, |at| at <= now)
    }

    pub fn mark_scheduled(&mut self) -> Result<(), InboxError> {
        match self.status {
            CampaignStatus::Draft => {
                self.status = CampaignStatus::Scheduled;
                Ok(())
            }
            _ => Err(InboxError::AlreadyDispatched(self.id)),
        }
    }

    /// Claims the campaign for dispatch. Only one caller can win the claim.
    /// Claims a due campaign for sending. Drafts and campaigns whose time
    /// has not come yet are `CampaignNotReady`.
    pub fn begin_dispatch(&mut self, at: DateTime<Utc>) -> Result<(), InboxError> {
        match self.status {
            CampaignStatus::Scheduled if self.is_due(at) => {
                self.status = CampaignStatus::Sending;
                self.dispatched_at = Some(at);
                Ok(())
            }
            CampaignStatus::Draft | CampaignStatus::Scheduled => {
                Err(InboxError::CampaignNotReady(self.id))
            }
            CampaignStatus::Cancelled => Err(InboxError::validation(
                "campaign",
                format!("{} was cancelled", self.id),
            )),
            CampaignStatus::Sending | CampaignStatus::Completed | CampaignStatus::Failed => {
                Err(InboxError::AlreadyDispatched(self.id))
            }
        }
    }

    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<(), InboxError> {
        match self.status {
            CampaignStatus::Draft | CampaignStatus::Scheduled => {
                self.status = CampaignStatus::Cancelled;
                self.finished_at = Some(at);
                Ok(())
            }
            CampaignStatus::Cancelled => Ok(()),
            CampaignStatus::Sending | CampaignStatus::Completed | CampaignStatus::Failed => {
                Err(InboxError::AlreadyDispatched(self.id))
            }
        }
    }

    pub fn complete(
        &mut self,
        outcomes: Vec<RecipientOutcome>,
        at: DateTime<Utc>,
    ) -> Result<(), InboxError> {
        self.ensure_sending("complete")?;
        self.status = CampaignStatus::Completed;
        self.outcomes = outcomes;
        self.finished_at = Some(at);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> Result<(), InboxError> {
        self.ensure_sending("fail")?;
        self.status = CampaignStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.finished_at = Some(at);
        Ok(())
    }

    fn ensure_sending(&self, action: &str) -> Result<(), InboxError> {
        if self.status != CampaignStatus::Sending {
            return Err(InboxError::fatal(
                self.id,
                format!("cannot {action} a campaign in status {}", self.status.as_label()),
            ));
        }
        Ok(())
    }
}
