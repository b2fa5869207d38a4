//! `orderwatch status`: engine state from a running `watch`.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::{json, Value};

use orderwatch_daemon::paths::socket_path;
use orderwatch_daemon::{request_status, DaemonError};

/// Arguments for `orderwatch status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;

        let status = match request_status(&home) {
            Ok(status) => status,
            Err(DaemonError::DaemonNotRunning { .. }) => json!({
                "running": false,
                "socket": socket_path(&home).display().to_string(),
            }),
            Err(err) => return Err(err).context("failed to query watch status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("failed to render status JSON")?
            );
            return Ok(());
        }

        print_human(&status);
        Ok(())
    }
}

fn print_human(status: &Value) {
    if !status["running"].as_bool().unwrap_or(false) {
        println!("{} orderwatch is not running", "■".bright_black().bold());
        println!("Run 'orderwatch watch' to start syncing.");
        return;
    }

    let lifecycle = status["lifecycle"].as_str().unwrap_or("unknown");
    let indicator = match lifecycle {
        "active" if !status["last_error"].is_null() => "■".yellow().bold(),
        "active" => "■".green().bold(),
        "paused" => "■".cyan().bold(),
        _ => "■".bright_black().bold(),
    };

    println!(
        "{indicator} orderwatch v{} | {} | {} transport",
        env!("CARGO_PKG_VERSION"),
        lifecycle.to_uppercase(),
        status["transport"].as_str().unwrap_or("?"),
    );
    println!(
        "  orders: {}   unseen: {}",
        status["order_count"],
        unseen_label(status["unseen_count"].as_u64().unwrap_or(0)),
    );
    println!(
        "  last sync: {}",
        status["last_sync_at"].as_str().unwrap_or("never")
    );
    if let Some(channel) = status["channel"].as_str() {
        println!("  channel: {channel}");
    }
    if status["loading"].as_bool().unwrap_or(false) {
        println!("  {}", "fetching…".bright_black());
    }
    if let Some(error) = status["last_error"].as_object() {
        let kind = error.get("kind").and_then(Value::as_str).unwrap_or("error");
        let message = error.get("message").and_then(Value::as_str).unwrap_or("");
        println!("  {} {kind}: {message}", "last error".red().bold());
    }
}

fn unseen_label(unseen: u64) -> String {
    if unseen == 0 {
        "0".to_string()
    } else {
        unseen.to_string().yellow().bold().to_string()
    }
}
