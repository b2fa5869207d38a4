//! One-shot control commands sent to a running `watch`.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use orderwatch_daemon::{
    request_command, request_event, request_stop, request_visibility, ChangeEvent, ChangeKind,
    DaemonError,
};

#[derive(Debug, Clone, Copy)]
pub enum ControlCommand {
    Refresh,
    Seen,
    Pause,
    Resume,
    Stop,
}

impl ControlCommand {
    fn cmd(self) -> &'static str {
        match self {
            ControlCommand::Refresh => "refresh",
            ControlCommand::Seen => "seen",
            ControlCommand::Pause => "pause",
            ControlCommand::Resume => "resume",
            ControlCommand::Stop => "stop",
        }
    }

    fn done_message(self) -> &'static str {
        match self {
            ControlCommand::Refresh => "refresh requested",
            ControlCommand::Seen => "unseen orders cleared",
            ControlCommand::Pause => "syncing paused",
            ControlCommand::Resume => "syncing resumed",
            ControlCommand::Stop => "stop requested",
        }
    }
}

pub fn run(command: ControlCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    let outcome = match command {
        ControlCommand::Stop => request_stop(&home),
        other => request_command(&home, other.cmd()).map(|_| ()),
    };
    match outcome {
        Ok(()) => println!("{}", command.done_message()),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("orderwatch is not running"),
        Err(err) => return Err(err).with_context(|| format!("'{}' failed", command.cmd())),
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum VisibilityState {
    Visible,
    Hidden,
}

#[derive(Args, Debug)]
pub struct VisibilityArgs {
    #[arg(value_enum)]
    pub state: VisibilityState,
}

impl VisibilityArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let visible = matches!(self.state, VisibilityState::Visible);
        request_visibility(&home, visible).context("failed to report visibility")?;
        println!("visibility: {}", if visible { "visible" } else { "hidden" });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EventKindArg {
    Insert,
    Update,
    Delete,
}

impl From<EventKindArg> for ChangeKind {
    fn from(kind: EventKindArg) -> Self {
        match kind {
            EventKindArg::Insert => ChangeKind::Insert,
            EventKindArg::Update => ChangeKind::Update,
            EventKindArg::Delete => ChangeKind::Delete,
        }
    }
}

#[derive(Args, Debug)]
pub struct EventArgs {
    #[arg(value_enum)]
    pub kind: EventKindArg,

    /// Row payload as JSON; only used for owner filtering.
    #[arg(long)]
    pub record: Option<String>,
}

impl EventArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let record: Option<serde_json::Value> = self
            .record
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("--record must be valid JSON")?;

        let event = ChangeEvent::new(self.kind.into(), record);
        let data = request_event(&home, event).context("failed to relay change event")?;
        let delivered = data["delivered"].as_u64().unwrap_or(0);
        if delivered == 0 {
            println!("event relayed; no push subscription is listening");
        } else {
            println!("event relayed to {delivered} subscription(s)");
        }
        Ok(())
    }
}
