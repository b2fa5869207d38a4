//! The order sync engine: one tokio task owning the snapshot, the lifecycle,
//! and the transport.
//!
//! Everything that mutates engine state goes through the actor, so commands,
//! visibility changes, and transport results are applied one at a time in
//! arrival order. Readers get an [`EngineView`] over a `watch` channel.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use orderwatch_core::OrderRecord;
use orderwatch_sync::{
    reconcile, Effect, Lifecycle, LifecycleState, NotificationPolicy, Snapshot, SyncError,
    Transition,
};

use crate::error::DaemonError;
use crate::transport::{BatchSink, ChannelStatus, FetchOrigin, Transport, TransportEvent};

/// What consumers see after every engine step.
#[derive(Debug, Clone)]
pub struct EngineView<T> {
    pub snapshot: Snapshot<T>,
    pub unseen_count: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub is_loading: bool,
    pub last_error: Option<SyncError>,
    pub is_paused: bool,
    pub lifecycle: LifecycleState,
    /// Push channel health; `None` for polling or while stopped.
    pub channel: Option<ChannelStatus>,
    pub transport: &'static str,
}

impl<T> EngineView<T> {
    fn initial(transport: &'static str) -> Self {
        Self {
            snapshot: Snapshot::default(),
            unseen_count: 0,
            last_sync_at: None,
            is_loading: false,
            last_error: None,
            is_paused: false,
            lifecycle: LifecycleState::Stopped,
            channel: None,
            transport,
        }
    }
}

pub struct EngineOptions<T> {
    /// Activate immediately on spawn.
    pub enabled: bool,
    pub policy: NotificationPolicy<T>,
    /// Host visibility; `false` pauses, `true` resumes.
    pub visibility: Option<watch::Receiver<bool>>,
}

impl<T> EngineOptions<T> {
    pub fn new(policy: NotificationPolicy<T>) -> Self {
        Self {
            enabled: true,
            policy,
            visibility: None,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn visibility(mut self, visibility: watch::Receiver<bool>) -> Self {
        self.visibility = Some(visibility);
        self
    }
}

#[derive(Debug)]
enum Command {
    Activate,
    Refresh,
    MarkSeen,
    Pause,
    Resume,
    Stop,
}

/// Cloneable control surface for a running engine.
pub struct EngineHandle<T> {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<EngineView<T>>,
    closed: Arc<AtomicBool>,
}

impl<T> Clone for EngineHandle<T> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            view: self.view.clone(),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<T: Clone> EngineHandle<T> {
    /// Activate an engine spawned with `enabled: false`.
    pub fn start(&self) -> Result<(), DaemonError> {
        self.send(Command::Activate)
    }

    /// Fetch once now. Ignored unless active; a failure raises a notice.
    pub fn refresh(&self) -> Result<(), DaemonError> {
        self.send(Command::Refresh)
    }

    pub fn mark_seen(&self) -> Result<(), DaemonError> {
        self.send(Command::MarkSeen)
    }

    pub fn pause(&self) -> Result<(), DaemonError> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), DaemonError> {
        self.send(Command::Resume)
    }

    /// Tear the engine down. Safe to call more than once and from inside a
    /// notification callback; nothing is applied after this returns.
    pub fn stop(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.commands.send(Command::Stop);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn view(&self) -> EngineView<T> {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineView<T>> {
        self.view.clone()
    }

    fn send(&self, command: Command) -> Result<(), DaemonError> {
        if self.is_stopped() {
            return Err(DaemonError::ChannelClosed("engine stopped"));
        }
        self.commands
            .send(command)
            .map_err(|_| DaemonError::ChannelClosed("engine commands"))
    }
}

/// Spawn the engine actor on the current tokio runtime.
pub fn spawn<T: OrderRecord>(
    transport: Box<dyn Transport<T>>,
    options: EngineOptions<T>,
) -> (EngineHandle<T>, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(EngineView::initial(transport.name()));
    let closed = Arc::new(AtomicBool::new(false));

    let actor = EngineActor {
        transport,
        policy: options.policy,
        lifecycle: Lifecycle::new(),
        baseline: None,
        unseen_count: 0,
        last_sync_at: None,
        last_error: None,
        error_seq: 0,
        channel_fault: false,
        channel: None,
        epoch: 0,
        tokens: Arc::new(AtomicU64::new(0)),
        applied_seq: 0,
        in_flight: BTreeMap::new(),
        events_tx,
        closed: Arc::clone(&closed),
        view_tx,
    };
    let task = tokio::spawn(actor.run(commands_rx, events_rx, options.visibility, options.enabled));

    let handle = EngineHandle {
        commands: commands_tx,
        view: view_rx,
        closed,
    };
    (handle, task)
}

struct EngineActor<T: OrderRecord> {
    transport: Box<dyn Transport<T>>,
    policy: NotificationPolicy<T>,
    lifecycle: Lifecycle,
    /// `None` until the first successful batch; that batch is the baseline
    /// and raises no notifications.
    baseline: Option<Snapshot<T>>,
    unseen_count: u64,
    last_sync_at: Option<DateTime<Utc>>,
    last_error: Option<SyncError>,
    /// Seq of the fetch that produced `last_error`; only a later-issued
    /// success may clear it.
    error_seq: u64,
    /// `last_error` came from the push channel itself and holds until it
    /// reports `Subscribed` again.
    channel_fault: bool,
    channel: Option<ChannelStatus>,
    /// Bumped on every transport start and stop.
    epoch: u64,
    tokens: Arc<AtomicU64>,
    applied_seq: u64,
    in_flight: BTreeMap<u64, FetchOrigin>,
    events_tx: mpsc::UnboundedSender<TransportEvent<T>>,
    closed: Arc<AtomicBool>,
    view_tx: watch::Sender<EngineView<T>>,
}

impl<T: OrderRecord> EngineActor<T> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TransportEvent<T>>,
        mut visibility: Option<watch::Receiver<bool>>,
        enabled: bool,
    ) {
        if enabled {
            self.transition(Transition::Activate);
            let hidden = visibility.as_ref().map(|rx| !*rx.borrow()).unwrap_or(false);
            if hidden {
                self.transition(Transition::Pause);
            }
        }
        self.publish();

        loop {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Stop) | None => break,
                    Some(command) => self.handle_command(command),
                },
                visible = next_visibility(&mut visibility) => {
                    let transition = if visible { Transition::Resume } else { Transition::Pause };
                    tracing::debug!(visible, "host visibility changed");
                    self.transition(transition);
                }
                Some(event) = events.recv() => self.handle_event(event),
            }
            self.publish();
        }

        self.teardown();
        self.publish();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Activate => self.transition(Transition::Activate),
            Command::Pause => self.transition(Transition::Pause),
            Command::Resume => self.transition(Transition::Resume),
            Command::Refresh => {
                if self.lifecycle.is_active() {
                    self.transport.refresh_now(FetchOrigin::Manual);
                } else {
                    tracing::debug!(state = %self.lifecycle.state(), "refresh ignored");
                }
            }
            Command::MarkSeen => self.unseen_count = 0,
            Command::Stop => {}
        }
    }

    fn transition(&mut self, transition: Transition) {
        match self.lifecycle.apply(transition) {
            Effect::None => {
                tracing::trace!(?transition, state = %self.lifecycle.state(), "transition is a no-op");
            }
            Effect::Start => self.start_transport(),
            Effect::StartAndRefresh => {
                self.start_transport();
                self.transport.refresh_now(FetchOrigin::Resume);
            }
            Effect::Stop | Effect::Release => self.stop_transport(),
            Effect::Rejected => {
                tracing::debug!(?transition, "engine already torn down");
            }
        }
    }

    fn start_transport(&mut self) {
        self.epoch += 1;
        let sink = BatchSink::new(self.epoch, Arc::clone(&self.tokens), self.events_tx.clone());
        self.transport.start(sink);
        tracing::info!(
            transport = self.transport.name(),
            epoch = self.epoch,
            "order sync active"
        );
    }

    fn stop_transport(&mut self) {
        self.transport.stop();
        // Anything still queued from the old sink is now stale.
        self.epoch += 1;
        self.in_flight.clear();
        self.channel = None;
        tracing::info!(
            transport = self.transport.name(),
            state = %self.lifecycle.state(),
            "order sync halted"
        );
    }

    fn handle_event(&mut self, event: TransportEvent<T>) {
        if self.closed.load(Ordering::SeqCst)
            || event.epoch() != self.epoch
            || !self.lifecycle.is_active()
        {
            tracing::trace!(epoch = event.epoch(), "discarding transport event");
            return;
        }

        match event {
            TransportEvent::Issued { token, .. } => {
                self.in_flight.insert(token.seq, token.origin);
            }
            TransportEvent::Batch { token, orders, .. } => {
                self.in_flight.remove(&token.seq);
                if token.seq <= self.applied_seq {
                    tracing::debug!(
                        seq = token.seq,
                        applied = self.applied_seq,
                        "dropping stale batch"
                    );
                    return;
                }
                self.applied_seq = token.seq;
                self.apply_batch(token.seq, orders);
            }
            TransportEvent::Failed { token, error, .. } => {
                if let Some(token) = token {
                    self.in_flight.remove(&token.seq);
                    if token.seq <= self.applied_seq {
                        tracing::debug!(seq = token.seq, "dropping stale failure");
                        return;
                    }
                    if token.origin == FetchOrigin::Manual {
                        self.policy.refresh_failed(&error);
                    }
                    tracing::warn!(kind = ?error.kind(), error = %error, "order fetch failed");
                    if token.seq < self.error_seq {
                        return;
                    }
                    self.error_seq = token.seq;
                    self.channel_fault = false;
                } else {
                    tracing::warn!(kind = ?error.kind(), error = %error, "order channel error");
                    self.channel_fault = true;
                }
                self.last_error = Some(error);
            }
            TransportEvent::Status { status, .. } => {
                if status == ChannelStatus::Subscribed && self.channel_fault {
                    self.channel_fault = false;
                    self.last_error = None;
                }
                self.channel = Some(status);
            }
        }
    }

    fn apply_batch(&mut self, seq: u64, orders: Vec<T>) {
        let (snapshot, diff) = reconcile(self.baseline.as_ref(), orders);
        let first = self.baseline.is_none();
        let count = snapshot.len();
        self.baseline = Some(snapshot);
        self.last_sync_at = Some(Utc::now());
        if seq > self.error_seq && !self.channel_fault {
            self.last_error = None;
        }

        if first {
            tracing::info!(orders = count, "baseline established");
            return;
        }
        if diff.is_empty() {
            return;
        }
        tracing::info!(
            added = diff.added.len(),
            changed = diff.changed.len(),
            removed = diff.removed_count,
            "orders changed"
        );
        self.unseen_count = self.policy.apply(&diff, self.unseen_count);
    }

    fn teardown(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.transition(Transition::Teardown);
        tracing::info!("order sync engine stopped");
    }

    fn view(&self) -> EngineView<T> {
        let awaiting_first =
            self.lifecycle.is_active() && self.baseline.is_none() && self.last_error.is_none();
        EngineView {
            snapshot: self.baseline.clone().unwrap_or_default(),
            unseen_count: self.unseen_count,
            last_sync_at: self.last_sync_at,
            is_loading: !self.in_flight.is_empty() || awaiting_first,
            last_error: self.last_error.clone(),
            is_paused: self.lifecycle.state() == LifecycleState::Paused,
            lifecycle: self.lifecycle.state(),
            channel: self.channel,
            transport: self.transport.name(),
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view());
    }
}

/// Next visibility value, or pending forever once the sender is gone.
async fn next_visibility(visibility: &mut Option<watch::Receiver<bool>>) -> bool {
    let Some(rx) = visibility.as_mut() else {
        return std::future::pending().await;
    };
    match rx.changed().await {
        Ok(()) => *rx.borrow_and_update(),
        Err(_) => {
            *visibility = None;
            std::future::pending().await
        }
    }
}
