use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use inbox::{
    domain::{
        agent::Agent,
        audience::AudienceSegment,
        campaign::{BroadcastCampaign, CampaignDraft, DeliveryOutcome, SendWindow},
        ids::AgentId,
    },
    infra::{config::AppConfig, error::AppError},
    usecases::{
        bootstrap::{self, compose_inbox},
        context::AppContext,
        inbox::Inbox,
        scheduler_daemon::SchedulerDaemon,
    },
};

const CLI_AGENT_ID: &str = "cli";
const BROADCAST_WAITING: &str = "INBOX_BROADCAST_WAITING_FOR_WINDOW";

pub fn run(cli: crate::cli::Cli) -> Result<()> {
    let context = bootstrap::bootstrap(cli.config.as_deref())?;

    match cli.command_or_default() {
        crate::cli::Command::CheckConfig => {
            print!("{}", render_config(&context.config)?);
        }
        crate::cli::Command::Reach { segment } => {
            let inbox = compose_inbox(&context);
            let reach = inbox.estimate_reach(segment)?;
            println!("{}: {reach} customer(s)", segment.as_label());
        }
        crate::cli::Command::Broadcast {
            title,
            body,
            segment,
            window,
            date,
        } => {
            let campaign = run_broadcast(&context, title, body, segment, window, date)?;
            for line in report_lines(&campaign) {
                println!("{line}");
            }
        }
    }

    Ok(())
}

fn render_config(config: &AppConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

fn run_broadcast(
    context: &AppContext,
    title: String,
    body: String,
    segment: AudienceSegment,
    window: SendWindow,
    date: Option<NaiveDate>,
) -> Result<BroadcastCampaign> {
    let inbox = compose_inbox(context);
    inbox.register_agent(Agent::new(CLI_AGENT_ID, "Command line"))?;

    let now = Utc::now();
    let scheduled_at = window.scheduled_at(date.unwrap_or_else(|| now.date_naive()), now)?;
    let campaign = inbox.create_broadcast(CampaignDraft {
        title,
        body,
        segment,
        scheduled_at,
        author: AgentId::new(CLI_AGENT_ID),
    })?;
    if campaign.status.is_terminal() {
        return Ok(campaign);
    }

    tracing::info!(
        code = BROADCAST_WAITING,
        campaign_id = %campaign.id,
        scheduled_at = ?campaign.scheduled_at,
        "broadcast scheduled; waiting for its send window"
    );
    let tick = Duration::from_millis(context.config.broadcast.tick_interval_ms);
    wait_for_dispatch(&inbox, campaign, tick)
}

fn wait_for_dispatch(
    inbox: &Inbox,
    campaign: BroadcastCampaign,
    tick: Duration,
) -> Result<BroadcastCampaign> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(AppError::Runtime)?;

    let finished = runtime.block_on(async {
        let daemon = SchedulerDaemon::start(runtime.handle(), inbox.scheduler(), tick);
        let finished = loop {
            tokio::time::sleep(tick).await;
            match inbox.broadcast(campaign.id) {
                Ok(current) if current.status.is_terminal() => break Ok(current),
                Ok(_) => {}
                Err(error) => break Err(error),
            }
        };
        daemon.shutdown().await;
        finished
    })?;
    Ok(finished)
}

fn report_lines(campaign: &BroadcastCampaign) -> Vec<String> {
    let report = campaign.report();
    let mut lines = vec![format!(
        "campaign {} {}: {} delivered, {} failed, {} skipped",
        campaign.id,
        campaign.status.as_label(),
        report.delivered,
        report.failed,
        report.skipped
    )];
    if let Some(reason) = &campaign.failure_reason {
        lines.push(format!("  reason: {reason}"));
    }

    lines.extend(campaign.outcomes.iter().map(|entry| match &entry.outcome {
        DeliveryOutcome::Delivered { message_id } => {
            format!("  {} delivered ({message_id})", entry.customer)
        }
        DeliveryOutcome::Failed { reason, attempts } => {
            format!(
                "  {} failed after {attempts} attempt(s): {reason}",
                entry.customer
            )
        }
        DeliveryOutcome::Skipped => format!("  {} skipped", entry.customer),
    }));
    lines
}
