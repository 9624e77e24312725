use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use inbox::domain::{audience::AudienceSegment, campaign::SendWindow};

#[derive(Debug, Parser)]
#[command(name = "inbox", about = "Customer-support inbox engine")]
pub struct Cli {
    /// Path to config file (default: ./inbox.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Validate config and print the effective values
    CheckConfig,
    /// Estimate how many customers a segment reaches
    Reach {
        /// all, active, inactive or new
        #[arg(long)]
        segment: AudienceSegment,
    },
    /// Send a broadcast through the loopback transport and print the report
    Broadcast {
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
        #[arg(long)]
        segment: AudienceSegment,
        /// now, morning, afternoon or evening
        #[arg(long, default_value = "now")]
        window: SendWindow,
        /// Day of the send window (default: today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

impl Cli {
    pub fn command_or_default(&self) -> Command {
        self.command.clone().unwrap_or(Command::CheckConfig)
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn defaults_to_check_config_when_command_is_missing() {
        let cli = Cli::parse_from(["inbox"]);

        assert!(matches!(cli.command_or_default(), Command::CheckConfig));
    }

    #[test]
    fn parses_reach_segment_and_global_config() {
        let cli = Cli::parse_from(["inbox", "reach", "--segment", "active", "--config", "custom.toml"]);

        assert!(matches!(
            cli.command_or_default(),
            Command::Reach {
                segment: AudienceSegment::Active
            }
        ));
        assert_eq!(
            cli.config
                .as_deref()
                .map(|p| p.to_string_lossy().to_string()),
            Some("custom.toml".to_owned())
        );
    }

    #[test]
    fn broadcast_window_defaults_to_now() {
        let cli = Cli::parse_from([
            "inbox", "broadcast", "--title", "Spring", "--body", "New menu", "--segment", "all",
        ]);

        let Command::Broadcast { window, date, .. } = cli.command_or_default() else {
            panic!("expected broadcast command");
        };
        assert_eq!(window, SendWindow::Now);
        assert_eq!(date, None);
    }

    #[test]
    fn parses_scheduled_broadcast() {
        let cli = Cli::parse_from([
            "inbox",
            "broadcast",
            "--title",
            "Spring",
            "--body",
            "New menu",
            "--segment",
            "new",
            "--window",
            "evening",
            "--date",
            "2030-03-01",
        ]);

        let Command::Broadcast {
            segment,
            window,
            date,
            ..
        } = cli.command_or_default()
        else {
            panic!("expected broadcast command");
        };
        assert_eq!(segment, AudienceSegment::New);
        assert_eq!(window, SendWindow::Evening);
        assert_eq!(date, NaiveDate::from_ymd_opt(2030, 3, 1));
    }

    #[test]
    fn rejects_unknown_segment() {
        assert!(Cli::try_parse_from(["inbox", "reach", "--segment", "vip"]).is_err());
    }
}
