use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::{
    domain::{
        audience::CustomerProfile,
        campaign::{
            BroadcastCampaign, CampaignDraft, CampaignStatus, DeliveryOutcome, RecipientOutcome,
        },
        error::InboxError,
        events::InboxEvent,
        ids::CampaignId,
        message::MessageContent,
    },
    engine::{
        clock::Clock,
        conversations::{ConversationManager, OutboundError},
        event_feed::EventFeed,
    },
    usecases::{
        audience::AudienceResolver,
        contracts::{OutboundRequest, OutboundTransport, TransportError},
    },
};

const RETRY_BACKOFF: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub max_concurrent_sends: usize,
    pub max_send_attempts: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent_sends: 4,
            max_send_attempts: 3,
        }
    }
}

/// Owns broadcast campaigns from draft to their terminal status and runs
/// the per-recipient fan-out.
pub struct BroadcastScheduler {
    campaigns: Mutex<BTreeMap<CampaignId, BroadcastCampaign>>,
    halts: Mutex<HashMap<CampaignId, Arc<AtomicBool>>>,
    last_id: AtomicU64,
    audience: AudienceResolver,
    conversations: Arc<ConversationManager>,
    transport: Arc<dyn OutboundTransport>,
    feed: EventFeed,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
}

impl std::fmt::Debug for BroadcastScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastScheduler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl BroadcastScheduler {
    pub fn new(
        audience: AudienceResolver,
        conversations: Arc<ConversationManager>,
        transport: Arc<dyn OutboundTransport>,
        feed: EventFeed,
        clock: Arc<dyn Clock>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            campaigns: Mutex::new(BTreeMap::new()),
            halts: Mutex::new(HashMap::new()),
            last_id: AtomicU64::new(0),
            audience,
            conversations,
            transport,
            feed,
            clock,
            settings,
        }
    }

    /// Stores the draft without scheduling it.
    pub fn create_draft(&self, draft: CampaignDraft) -> Result<BroadcastCampaign, InboxError> {
        self.insert(draft, |_| Ok(()))
    }

    /// Creates the campaign already scheduled, so a failure leaves nothing
    /// behind. Without a scheduled time it is dispatched before this returns.
    pub fn schedule(&self, draft: CampaignDraft) -> Result<CampaignId, InboxError> {
        let campaign = self.insert(draft, BroadcastCampaign::mark_scheduled)?;
        tracing::info!(
            campaign_id = %campaign.id,
            scheduled_at = ?campaign.scheduled_at,
            "broadcast scheduled"
        );

        if campaign.scheduled_at.is_none() {
            match self.dispatch(campaign.id) {
                Ok(_) => {}
                Err(InboxError::AlreadyDispatched(_)) => {
                    tracing::debug!(campaign_id = %campaign.id, "broadcast claimed by the daemon");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(campaign.id)
    }

    pub fn schedule_draft(&self, campaign_id: CampaignId) -> Result<BroadcastCampaign, InboxError> {
        let scheduled = self.update(campaign_id, |campaign, now| {
            if campaign.scheduled_at.is_some_and(|at| at <= now) {
                return Err(InboxError::validation(
                    "scheduled_at",
                    "scheduled time has already passed",
                ));
            }
            campaign.mark_scheduled()
        })?;

        tracing::info!(
            campaign_id = %campaign_id,
            scheduled_at = ?scheduled.scheduled_at,
            "broadcast scheduled"
        );
        if scheduled.scheduled_at.is_none() {
            return self.dispatch(campaign_id);
        }
        Ok(scheduled)
    }

    /// Cancels a campaign that has not started sending. Cancelling twice is
    /// a no-op; cancelling after dispatch began is `AlreadyDispatched`.
    pub fn cancel(&self, campaign_id: CampaignId) -> Result<BroadcastCampaign, InboxError> {
        let campaign = self.update(campaign_id, |campaign, now| campaign.cancel(now))?;
        tracing::info!(campaign_id = %campaign_id, "broadcast cancelled");
        Ok(campaign)
    }

    /// Stops sends that have not started yet. A campaign that is not sending
    /// is cancelled instead.
    pub fn halt(&self, campaign_id: CampaignId) -> Result<BroadcastCampaign, InboxError> {
        let mut requested = false;
        let campaign = self.update(campaign_id, |campaign, now| {
            if campaign.status != CampaignStatus::Sending {
                return campaign.cancel(now);
            }
            let halts = self.halts.lock().map_err(|_| poisoned(campaign_id))?;
            if let Some(flag) = halts.get(&campaign_id) {
                flag.store(true, Ordering::Release);
                requested = true;
            }
            Ok(())
        })?;

        if requested {
            tracing::info!(
                code = "INBOX_BROADCAST_HALTED",
                campaign_id = %campaign_id,
                "broadcast halt requested"
            );
        } else if campaign.status == CampaignStatus::Cancelled {
            tracing::info!(campaign_id = %campaign_id, "broadcast cancelled");
        }
        Ok(campaign)
    }

    /// Scheduled campaigns whose time has come, oldest first.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<CampaignId>, InboxError> {
        let campaigns = self
            .campaigns
            .lock()
            .map_err(|_| InboxError::fatal("campaigns", "lock poisoned"))?;
        Ok(campaigns
            .values()
            .filter(|campaign| campaign.is_due(now))
            .map(|campaign| campaign.id)
            .collect())
    }

    /// Dispatches every due campaign and returns the finished ones. Claims
    /// lost to a concurrent dispatcher are skipped.
    pub fn dispatch_due(&self) -> Result<Vec<BroadcastCampaign>, InboxError> {
        let mut finished = Vec::new();
        for campaign_id in self.due(self.clock.now())? {
            match self.dispatch(campaign_id) {
                Ok(campaign) => finished.push(campaign),
                Err(InboxError::AlreadyDispatched(_)) => {
                    tracing::debug!(campaign_id = %campaign_id, "broadcast claimed elsewhere");
                }
                Err(error) => {
                    tracing::warn!(
                        code = error.code(),
                        campaign_id = %campaign_id,
                        error = %error,
                        "due broadcast not dispatched"
                    );
                }
            }
        }
        Ok(finished)
    }

    /// Claims a due campaign and sends it to every resolved recipient. The
    /// audience is resolved exactly once; a resolution failure fails the
    /// campaign rather than the call.
    pub fn dispatch(&self, campaign_id: CampaignId) -> Result<BroadcastCampaign, InboxError> {
        let halted = Arc::new(AtomicBool::new(false));
        let campaign = self.update(campaign_id, |campaign, now| {
            campaign.begin_dispatch(now)?;
            self.halts
                .lock()
                .map_err(|_| poisoned(campaign_id))?
                .insert(campaign_id, Arc::clone(&halted));
            Ok(())
        })?;

        tracing::info!(
            campaign_id = %campaign_id,
            segment = campaign.segment.as_label(),
            "broadcast dispatch started"
        );

        let result = match self.audience.resolve_profiles(campaign.segment) {
            Ok(recipients) => {
                let outcomes = self.fan_out(&campaign, &recipients, &halted);
                self.update(campaign_id, |campaign, now| campaign.complete(outcomes, now))
            }
            Err(error) => {
                tracing::warn!(
                    code = "INBOX_BROADCAST_AUDIENCE_FAILED",
                    campaign_id = %campaign_id,
                    error = %error,
                    "broadcast audience could not be resolved"
                );
                let reason = error.to_string();
                self.update(campaign_id, |campaign, now| campaign.fail(reason, now))
            }
        };

        if let Ok(mut halts) = self.halts.lock() {
            halts.remove(&campaign_id);
        }

        let campaign = result?;
        let report = campaign.report();
        tracing::info!(
            code = if report.is_full_success() {
                "INBOX_BROADCAST_COMPLETED"
            } else {
                "INBOX_BROADCAST_PARTIAL"
            },
            campaign_id = %campaign_id,
            status = campaign.status.as_label(),
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped,
            "broadcast dispatch finished"
        );
        Ok(campaign)
    }

    pub fn get(&self, campaign_id: CampaignId) -> Result<BroadcastCampaign, InboxError> {
        self.campaigns
            .lock()
            .map_err(|_| poisoned(campaign_id))?
            .get(&campaign_id)
            .cloned()
            .ok_or(InboxError::CampaignNotFound(campaign_id))
    }

    pub fn list(&self) -> Result<Vec<BroadcastCampaign>, InboxError> {
        let campaigns = self
            .campaigns
            .lock()
            .map_err(|_| InboxError::fatal("campaigns", "lock poisoned"))?;
        Ok(campaigns.values().cloned().collect())
    }

    fn insert<F>(&self, draft: CampaignDraft, prepare: F) -> Result<BroadcastCampaign, InboxError>
    where
        F: FnOnce(&mut BroadcastCampaign) -> Result<(), InboxError>,
    {
        draft.validate()?;
        let now = self.clock.now();
        if let Some(at) = draft.scheduled_at {
            if at <= now {
                return Err(InboxError::validation(
                    "scheduled_at",
                    format!("{at} is not in the future"),
                ));
            }
        }

        let id = CampaignId(self.last_id.fetch_add(1, Ordering::AcqRel) + 1);
        let mut campaign = BroadcastCampaign::from_draft(id, draft, now);
        prepare(&mut campaign)?;
        self.campaigns
            .lock()
            .map_err(|_| poisoned(id))?
            .insert(id, campaign.clone());

        tracing::info!(
            campaign_id = %id,
            segment = campaign.segment.as_label(),
            status = campaign.status.as_label(),
            "broadcast created"
        );
        self.publish_status(&campaign);
        Ok(campaign)
    }

    /// Applies `change` to a copy under the campaigns lock and stores it only
    /// on success.
    fn update<F>(&self, campaign_id: CampaignId, change: F) -> Result<BroadcastCampaign, InboxError>
    where
        F: FnOnce(&mut BroadcastCampaign, DateTime<Utc>) -> Result<(), InboxError>,
    {
        let mut campaigns = self.campaigns.lock().map_err(|_| poisoned(campaign_id))?;
        let campaign = campaigns
            .get_mut(&campaign_id)
            .ok_or(InboxError::CampaignNotFound(campaign_id))?;

        let before = campaign.status;
        let mut working = campaign.clone();
        change(&mut working, self.clock.now())?;
        *campaign = working.clone();
        drop(campaigns);
        let updated = working;

        if updated.status != before {
            self.publish_status(&updated);
        }
        Ok(updated)
    }

    /// Sends to every recipient with at most `max_concurrent_sends` sends in
    /// flight. Outcomes keep recipient order.
    fn fan_out(
        &self,
        campaign: &BroadcastCampaign,
        recipients: &[CustomerProfile],
        halted: &AtomicBool,
    ) -> Vec<RecipientOutcome> {
        let next = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<DeliveryOutcome>>> =
            recipients.iter().map(|_| Mutex::new(None)).collect();
        let workers = self
            .settings
            .max_concurrent_sends
            .clamp(1, recipients.len().max(1));

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next.fetch_add(1, Ordering::AcqRel);
                    let Some(recipient) = recipients.get(index) else {
                        break;
                    };
                    let outcome = if halted.load(Ordering::Acquire) {
                        DeliveryOutcome::Skipped
                    } else {
                        self.send_to(campaign, recipient)
                    };
                    if let Ok(mut slot) = slots[index].lock() {
                        *slot = Some(outcome);
                    }
                });
            }
        });

        recipients
            .iter()
            .zip(slots)
            .map(|(recipient, slot)| RecipientOutcome {
                customer: recipient.id.clone(),
                outcome: slot
                    .into_inner()
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| DeliveryOutcome::Failed {
                        reason: "send worker stopped".to_owned(),
                        attempts: 0,
                    }),
            })
            .collect()
    }

    fn send_to(&self, campaign: &BroadcastCampaign, recipient: &CustomerProfile) -> DeliveryOutcome {
        let key = format!("{}:{}", campaign.id, recipient.id);
        let max_attempts = self.settings.max_send_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = self.conversations.record_outbound_to_customer(
                &recipient.id,
                &recipient.display_name,
                &campaign.author,
                MessageContent::text(campaign.body.as_str()),
                Some(key.clone()),
                |conversation, content| {
                    self.transport.send(&OutboundRequest {
                        conversation_id: conversation.id,
                        customer: &conversation.customer,
                        content,
                    })
                },
            );

            let reason = match result {
                Ok(delivery) => {
                    return DeliveryOutcome::Delivered {
                        message_id: delivery.message.id,
                    }
                }
                Err(OutboundError::Rejected(TransportError::Transient(reason)))
                    if attempts < max_attempts =>
                {
                    reason
                }
                Err(OutboundError::Inbox(error))
                    if error.kind().is_retryable() && attempts < max_attempts =>
                {
                    error.to_string()
                }
                Err(OutboundError::Rejected(error)) => {
                    return failed(campaign, recipient, error.to_string(), attempts)
                }
                Err(OutboundError::Inbox(error)) => {
                    return failed(campaign, recipient, error.to_string(), attempts)
                }
            };

            tracing::debug!(
                campaign_id = %campaign.id,
                customer_id = %recipient.id,
                attempts,
                reason = %reason,
                "broadcast send will be retried"
            );
            thread::sleep(RETRY_BACKOFF * attempts);
        }
    }

    fn publish_status(&self, campaign: &BroadcastCampaign) {
        self.feed.publish(InboxEvent::CampaignStatusChanged {
            campaign_id: campaign.id,
            status: campaign.status,
        });
    }
}

fn failed(
    campaign: &BroadcastCampaign,
    recipient: &CustomerProfile,
    reason: String,
    attempts: u32,
) -> DeliveryOutcome {
    tracing::warn!(
        code = "INBOX_BROADCAST_SEND_FAILED",
        campaign_id = %campaign.id,
        customer_id = %recipient.id,
        attempts,
        reason = %reason,
        "broadcast recipient not delivered"
    );
    DeliveryOutcome::Failed { reason, attempts }
}

fn poisoned(campaign_id: CampaignId) -> InboxError {
    InboxError::fatal(campaign_id, "campaign lock poisoned")
}
