//! Bundled [`ChangeFeed`] implementations.

use std::fs;
use std::path::{Path, PathBuf};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use orderwatch_sync::SyncError;

use crate::source::is_order_file;
use crate::transport::{
    ChangeEvent, ChangeFeed, ChangeKind, Subscription, SubscriptionFilter, SubscriptionGuard,
};

/// In-process relay for change events published over the control socket,
/// e.g. by a webhook forwarder sitting next to the daemon.
#[derive(Clone)]
pub struct ChannelFeed {
    table: String,
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChannelFeed {
    pub fn new(table: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            table: table.into(),
            tx,
        }
    }

    /// Publish one event; returns how many subscriptions received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl ChangeFeed for ChannelFeed {
    fn subscribe(&self, filter: &SubscriptionFilter) -> Result<Subscription, SyncError> {
        if filter.table != self.table {
            return Err(SyncError::Subscription(format!(
                "no change feed for table '{}'",
                filter.table
            )));
        }

        let mut rx = self.tx.subscribe();
        let (tx, events) = mpsc::unbounded_channel();
        let filter = filter.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                let forwarded = match rx.recv().await {
                    Ok(event) if filter.matches(&event) => tx.send(Ok(event)),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // Missed events still mean the list is out of date.
                        tracing::warn!(missed, "change relay lagged; forcing a re-fetch");
                        tx.send(Ok(ChangeEvent::new(ChangeKind::Update, None)))
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if forwarded.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription {
            events,
            guard: SubscriptionGuard::new(move || forwarder.abort()),
        })
    }
}

/// Watches an order spool directory and turns file events into change events.
pub struct DirectoryFeed {
    dir: PathBuf,
}

impl DirectoryFeed {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ChangeFeed for DirectoryFeed {
    fn subscribe(&self, filter: &SubscriptionFilter) -> Result<Subscription, SyncError> {
        if !self.dir.is_dir() {
            return Err(SyncError::Subscription(format!(
                "order directory missing: {}",
                self.dir.display()
            )));
        }

        let (tx, events) = mpsc::unbounded_channel();
        let filter = filter.clone();
        let mut watcher: RecommendedWatcher =
            recommended_watcher(move |event: notify::Result<Event>| match event {
                Ok(event) => {
                    for change in changes_from_event(&event, &filter) {
                        let _ = tx.send(Ok(change));
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(SyncError::Subscription(err.to_string())));
                }
            })
            .map_err(|err| SyncError::Subscription(err.to_string()))?;

        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(|err| SyncError::Subscription(err.to_string()))?;
        tracing::debug!(path = %self.dir.display(), "watching order directory");

        Ok(Subscription {
            events,
            guard: SubscriptionGuard::new(move || drop(watcher)),
        })
    }
}

fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Insert),
        // Includes renames; the re-fetch sorts out which side moved.
        EventKind::Modify(_) => Some(ChangeKind::Update),
        EventKind::Remove(_) => Some(ChangeKind::Delete),
        _ => None,
    }
}

fn changes_from_event(event: &Event, filter: &SubscriptionFilter) -> Vec<ChangeEvent> {
    let Some(kind) = change_kind(&event.kind) else {
        return Vec::new();
    };
    event
        .paths
        .iter()
        .filter(|path| is_order_file(path))
        .map(|path| ChangeEvent::new(kind, read_record(path, kind)))
        .filter(|change| filter.matches(change))
        .collect()
}

fn read_record(path: &Path, kind: ChangeKind) -> Option<Value> {
    if kind == ChangeKind::Delete {
        let stem = path.file_stem()?.to_str()?;
        return Some(serde_json::json!({ "id": stem }));
    }
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}
