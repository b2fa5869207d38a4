//! orderwatch: real-time order list sync from the command line.
//!
//! # Usage
//!
//! ```text
//! orderwatch init (--url <URL> | --dir <PATH>) [--transport poll|push] [--interval-ms N] [--owner ID]
//! orderwatch watch [--transport poll|push] [--interval-ms N] [--owner ID] [--json-logs]
//! orderwatch status [--json]
//! orderwatch orders [--json]
//! orderwatch refresh|seen|pause|resume|stop
//! orderwatch visibility visible|hidden
//! orderwatch event insert|update|delete [--record JSON]
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    control::{ControlCommand, EventArgs, VisibilityArgs},
    init::InitArgs,
    orders::OrdersArgs,
    status::StatusArgs,
    watch::WatchArgs,
};
use orderwatch_core::TransportKind;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "orderwatch",
    version,
    about = "Keep a live, notifying view of an order list",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.orderwatch/config.yaml.
    Init(InitArgs),

    /// Run the sync engine in the foreground with its control socket.
    Watch(WatchArgs),

    /// Show engine state from a running `watch`.
    Status(StatusArgs),

    /// List the current order snapshot.
    Orders(OrdersArgs),

    /// Fetch immediately; a failure is reported as a notice.
    Refresh,

    /// Reset the unseen-order counter.
    Seen,

    /// Suspend syncing until `resume`.
    Pause,

    /// Resume syncing and fetch once.
    Resume,

    /// Report host visibility; hidden pauses, visible resumes.
    Visibility(VisibilityArgs),

    /// Relay a change event into a push subscription.
    Event(EventArgs),

    /// Stop a running `watch`.
    Stop,
}

// ---------------------------------------------------------------------------
// Shared TransportKind argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `TransportKind` from CLI args.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportArg(pub TransportKind);

impl FromStr for TransportArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl fmt::Display for TransportArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        arg.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Watch(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Orders(args) => args.run(),
        Commands::Refresh => commands::control::run(ControlCommand::Refresh),
        Commands::Seen => commands::control::run(ControlCommand::Seen),
        Commands::Pause => commands::control::run(ControlCommand::Pause),
        Commands::Resume => commands::control::run(ControlCommand::Resume),
        Commands::Stop => commands::control::run(ControlCommand::Stop),
        Commands::Visibility(args) => args.run(),
        Commands::Event(args) => args.run(),
    }
}
