//! `orderwatch init (--url <URL> | --dir <PATH>) [--transport ...] [--interval-ms N] [--owner ID]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use orderwatch_core::config::{self, config_path_at};
use orderwatch_core::{OwnerId, SourceConfig, WatchConfig};

use super::super::TransportArg;

/// Write the watch configuration.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// JSON endpoint returning the order list.
    #[arg(long, conflicts_with = "dir", required_unless_present = "dir")]
    pub url: Option<String>,

    /// Spool directory with one `<id>.json` file per order.
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Transport strategy: poll | push.
    #[arg(long, value_name = "KIND")]
    pub transport: Option<TransportArg>,

    /// Polling interval in milliseconds.
    #[arg(long = "interval-ms", value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Only track orders belonging to this owner.
    #[arg(long)]
    pub owner: Option<String>,

    /// Order table name used for push subscriptions.
    #[arg(long)]
    pub table: Option<String>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;

        let source = match (self.url, self.dir) {
            (Some(url), _) => SourceConfig::Http { url },
            (None, Some(dir)) => {
                let path = dir
                    .canonicalize()
                    .with_context(|| format!("cannot resolve path '{}'", dir.display()))?;
                SourceConfig::Directory { path }
            }
            (None, None) => anyhow::bail!("one of --url or --dir is required"),
        };

        let mut config = WatchConfig::new(source);
        if let Some(transport) = self.transport {
            config.transport = transport.into();
        }
        if let Some(interval_ms) = self.interval_ms {
            config.refresh_interval_ms = interval_ms;
        }
        if let Some(owner) = self.owner {
            config.owner_filter = Some(OwnerId::from(owner));
        }
        if let Some(table) = self.table {
            config.table = table;
        }

        config::save_at(&home, &config).context("failed to write config")?;

        println!("✓ Saved watch config ({} transport)", config.transport);
        println!("  Saved to: {}", config_path_at(&home).display());
        Ok(())
    }
}
