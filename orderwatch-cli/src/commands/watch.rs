//! `orderwatch watch`: run the engine in the foreground.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use orderwatch_core::{config, OwnerId, WatchConfig};
use orderwatch_sync::{Notice, NoticeLevel, NotificationSink, NotifyError};

use super::super::TransportArg;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Override the configured transport for this run.
    #[arg(long, value_name = "KIND")]
    pub transport: Option<TransportArg>,

    /// Override the polling interval for this run.
    #[arg(long = "interval-ms", value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Override the owner filter for this run.
    #[arg(long)]
    pub owner: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let config = config::load_at(&home).context("failed to load watch config")?;
        let config = self.apply(config);
        config.validate().context("invalid option")?;

        let json_logs = self.json_logs;
        orderwatch_daemon::start_blocking(&home, config, Arc::new(TerminalSink), json_logs)
            .context("order watch exited with error")?;
        Ok(())
    }

    fn apply(&self, mut config: WatchConfig) -> WatchConfig {
        if let Some(transport) = self.transport {
            config.transport = transport.into();
        }
        if let Some(interval_ms) = self.interval_ms {
            config.refresh_interval_ms = interval_ms;
        }
        if let Some(owner) = &self.owner {
            config.owner_filter = Some(OwnerId::from(owner.as_str()));
        }
        config
    }
}

/// Prints notices to stdout, one line each.
struct TerminalSink;

impl NotificationSink for TerminalSink {
    fn notify(&self, notice: &Notice) -> Result<(), NotifyError> {
        let time = chrono::Local::now().format("%H:%M:%S").to_string();
        let line = match notice.level {
            NoticeLevel::Success => format!("✓ {}", notice.message).green(),
            NoticeLevel::Info => format!("• {}", notice.message).cyan(),
            NoticeLevel::Failure => format!("✗ {}", notice.message).red().bold(),
        };
        println!("{} {line}", time.bright_black());
        Ok(())
    }
}
