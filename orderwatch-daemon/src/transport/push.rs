//! Subscription-driven transport.
//!
//! Change events are only a trigger: every insert, update, or delete causes
//! a full re-fetch from the [`OrderSource`], since pushed rows lack the joined
//! fields consumers render. Events that queue up while a fetch is running are
//! folded into a single follow-up fetch.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use orderwatch_core::OwnerId;
use orderwatch_sync::SyncError;

use super::{fetch_once, BatchSink, ChannelStatus, FetchOrigin, OrderSource, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change announced by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, record: Option<Value>) -> Self {
        Self { kind, record }
    }

    /// Owner column of the pushed row, when the payload carries one.
    pub fn owner(&self) -> Option<&str> {
        let record = self.record.as_ref()?;
        record
            .get("user_id")
            .or_else(|| record.get("owner_id"))
            .and_then(Value::as_str)
    }

    fn record_id(&self) -> Option<String> {
        let id = self.record.as_ref()?.get("id")?;
        match id {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Which changes a subscription wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub table: String,
    pub owner: Option<OwnerId>,
}

impl SubscriptionFilter {
    /// Events without an owner column always pass; deletes commonly carry
    /// only the primary key.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match (&self.owner, event.owner()) {
            (Some(wanted), Some(owner)) => wanted.0 == owner,
            _ => true,
        }
    }
}

/// Releases the underlying channel when dropped or explicitly released.
pub struct SubscriptionGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// A live subscription: the event stream plus the handle that tears it down.
#[derive(Debug)]
pub struct Subscription {
    pub events: mpsc::UnboundedReceiver<Result<ChangeEvent, SyncError>>,
    pub guard: SubscriptionGuard,
}

/// A change-event stream keyed by table and optional owner.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self, filter: &SubscriptionFilter) -> Result<Subscription, SyncError>;
}

pub struct PushTransport<T> {
    source: Arc<dyn OrderSource<T>>,
    feed: Arc<dyn ChangeFeed>,
    filter: SubscriptionFilter,
    timeout: Duration,
    sink: Option<BatchSink<T>>,
    guard: Option<SubscriptionGuard>,
    listener: Option<JoinHandle<()>>,
    out_of_band: Vec<JoinHandle<()>>,
}

impl<T> PushTransport<T> {
    pub fn new(
        source: Arc<dyn OrderSource<T>>,
        feed: Arc<dyn ChangeFeed>,
        filter: SubscriptionFilter,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            feed,
            filter,
            timeout,
            sink: None,
            guard: None,
            listener: None,
            out_of_band: Vec::new(),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.guard.is_some()
    }

    fn abort_tasks(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        for task in self.out_of_band.drain(..) {
            task.abort();
        }
    }
}

impl<T: Send + 'static> PushTransport<T> {
    fn spawn_fetch(&mut self, sink: BatchSink<T>, origin: FetchOrigin) {
        self.out_of_band.retain(|task| !task.is_finished());
        let source = Arc::clone(&self.source);
        let timeout = self.timeout;
        self.out_of_band.push(tokio::spawn(async move {
            fetch_once(source.as_ref(), &sink, origin, timeout).await;
        }));
    }
}

impl<T: Send + 'static> Transport<T> for PushTransport<T> {
    fn start(&mut self, sink: BatchSink<T>) {
        if self.sink.is_some() {
            tracing::debug!("push transport already running");
            return;
        }
        self.sink = Some(sink.clone());

        sink.status(ChannelStatus::Connecting);
        let Subscription { events, guard } = match self.feed.subscribe(&self.filter) {
            Ok(subscription) => subscription,
            Err(err) => {
                tracing::warn!(table = %self.filter.table, error = %err, "subscribe failed");
                sink.status(ChannelStatus::Error);
                sink.fail(err);
                // Still load the list; only live updates are missing.
                self.spawn_fetch(sink, FetchOrigin::Initial);
                return;
            }
        };
        sink.status(ChannelStatus::Subscribed);
        tracing::info!(
            table = %self.filter.table,
            owner = ?self.filter.owner,
            "subscribed to order changes"
        );
        self.guard = Some(guard);

        let source = Arc::clone(&self.source);
        let timeout = self.timeout;
        self.listener = Some(tokio::spawn(listen(source, sink, events, timeout)));
    }

    fn stop(&mut self) {
        if self.sink.take().is_none() {
            return;
        }
        if let Some(guard) = self.guard.take() {
            guard.release();
        }
        self.abort_tasks();
        tracing::debug!(table = %self.filter.table, "unsubscribed from order changes");
    }

    fn refresh_now(&mut self, origin: FetchOrigin) {
        let Some(sink) = self.sink.clone() else {
            tracing::debug!(origin = ?origin, "refresh ignored; push transport not running");
            return;
        };
        self.spawn_fetch(sink, origin);
    }

    fn name(&self) -> &'static str {
        "push"
    }
}

impl<T> Drop for PushTransport<T> {
    fn drop(&mut self) {
        self.guard.take();
        self.abort_tasks();
    }
}

async fn listen<T>(
    source: Arc<dyn OrderSource<T>>,
    sink: BatchSink<T>,
    mut events: mpsc::UnboundedReceiver<Result<ChangeEvent, SyncError>>,
    timeout: Duration,
) {
    fetch_once(source.as_ref(), &sink, FetchOrigin::Initial, timeout).await;

    let mut healthy = true;
    loop {
        let Some(first) = events.recv().await else {
            sink.status(ChannelStatus::Closed);
            sink.fail(SyncError::Subscription("change feed closed".to_string()));
            return;
        };

        let mut triggers = 0usize;
        let mut pending = Some(first);
        while let Some(next) = pending.take() {
            match next {
                Ok(event) => {
                    if !healthy {
                        healthy = true;
                        sink.status(ChannelStatus::Subscribed);
                    }
                    tracing::debug!(kind = ?event.kind, id = ?event.record_id(), "order change event");
                    triggers += 1;
                }
                Err(err) => {
                    healthy = false;
                    tracing::warn!(error = %err, "change feed error");
                    sink.status(ChannelStatus::Error);
                    sink.fail(err);
                }
            }
            pending = events.try_recv().ok();
        }

        if triggers > 0 {
            if triggers > 1 {
                tracing::debug!(events = triggers, "coalesced change events into one fetch");
            }
            fetch_once(source.as_ref(), &sink, FetchOrigin::Push, timeout).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use orderwatch_core::Order;
    use serde_json::json;
    use tokio::time::sleep;

    use super::super::testing::{ScriptedSource, Step};
    use super::super::TransportEvent;
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Feed whose events are pushed by the test; counts live subscriptions.
    #[derive(Default)]
    struct ManualFeed {
        senders: Mutex<Vec<mpsc::UnboundedSender<Result<ChangeEvent, SyncError>>>>,
        live: Arc<AtomicUsize>,
        refuse: bool,
    }

    impl ManualFeed {
        fn refusing() -> Self {
            Self {
                refuse: true,
                ..Self::default()
            }
        }

        fn push(&self, event: Result<ChangeEvent, SyncError>) {
            for tx in self.senders.lock().expect("lock").iter() {
                let _ = tx.send(event.clone());
            }
        }

        fn close(&self) {
            self.senders.lock().expect("lock").clear();
        }
    }

    impl ChangeFeed for ManualFeed {
        fn subscribe(&self, _filter: &SubscriptionFilter) -> Result<Subscription, SyncError> {
            if self.refuse {
                return Err(SyncError::Subscription("channel rejected".into()));
            }
            let (tx, events) = mpsc::unbounded_channel();
            self.senders.lock().expect("lock").push(tx);
            self.live.fetch_add(1, Ordering::SeqCst);
            let live = Arc::clone(&self.live);
            Ok(Subscription {
                events,
                guard: SubscriptionGuard::new(move || {
                    live.fetch_sub(1, Ordering::SeqCst);
                }),
            })
        }
    }

    fn filter() -> SubscriptionFilter {
        SubscriptionFilter {
            table: "orders".into(),
            owner: None,
        }
    }

    fn sink() -> (BatchSink<Order>, mpsc::UnboundedReceiver<TransportEvent<Order>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (BatchSink::new(1, Arc::new(AtomicU64::new(0)), tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent<Order>>) -> Vec<TransportEvent<Order>> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn insert() -> Result<ChangeEvent, SyncError> {
        Ok(ChangeEvent::new(ChangeKind::Insert, Some(json!({"id": 9}))))
    }

    #[tokio::test(start_paused = true)]
    async fn initial_fetch_then_refetch_per_event() {
        let source = Arc::new(ScriptedSource::new(vec![], vec![Order::new("1")]));
        let feed = Arc::new(ManualFeed::default());
        let mut transport: PushTransport<Order> =
            PushTransport::new(source.clone(), feed.clone(), filter(), TIMEOUT);
        let (sink, mut rx) = sink();

        transport.start(sink);
        sleep(Duration::from_millis(1)).await;
        assert_eq!(source.calls(), 1);

        feed.push(insert());
        sleep(Duration::from_millis(1)).await;
        feed.push(Ok(ChangeEvent::new(ChangeKind::Delete, None)));
        sleep(Duration::from_millis(1)).await;
        assert_eq!(source.calls(), 3);

        let statuses: Vec<ChannelStatus> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::Status { status, .. } => Some(status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![ChannelStatus::Connecting, ChannelStatus::Subscribed]
        );
        transport.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn burst_during_fetch_coalesces() {
        let source = Arc::new(ScriptedSource::new(
            vec![
                Step::ok(vec![Order::new("1")]),
                Step::ok(vec![Order::new("1")]).after(Duration::from_secs(1)),
            ],
            vec![Order::new("1")],
        ));
        let feed = Arc::new(ManualFeed::default());
        let mut transport: PushTransport<Order> =
            PushTransport::new(source.clone(), feed.clone(), filter(), TIMEOUT);
        let (sink, _rx) = sink();

        transport.start(sink);
        sleep(Duration::from_millis(1)).await;
        feed.push(insert());
        sleep(Duration::from_millis(100)).await;
        // Second fetch is still running; these three queue up.
        for _ in 0..3 {
            feed.push(insert());
        }
        sleep(Duration::from_secs(2)).await;
        assert_eq!(source.calls(), 3, "initial + first event + one coalesced fetch");
        transport.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_subscription_and_is_idempotent() {
        let source = Arc::new(ScriptedSource::new(vec![], vec![Order::new("1")]));
        let feed = Arc::new(ManualFeed::default());
        let mut transport: PushTransport<Order> =
            PushTransport::new(source.clone(), feed.clone(), filter(), TIMEOUT);
        let (sink, _rx) = sink();

        transport.start(sink);
        assert_eq!(feed.live.load(Ordering::SeqCst), 1);
        transport.stop();
        assert_eq!(feed.live.load(Ordering::SeqCst), 0);
        transport.stop();
        assert_eq!(feed.live.load(Ordering::SeqCst), 0);
        assert!(!transport.is_subscribed());

        sleep(Duration::from_millis(1)).await;
        feed.push(insert());
        sleep(Duration::from_millis(1)).await;
        assert!(source.calls() <= 1, "no fetch after stop");
    }

    #[tokio::test(start_paused = true)]
    async fn refused_subscription_reports_error_but_still_loads() {
        let source = Arc::new(ScriptedSource::new(vec![], vec![Order::new("1")]));
        let feed = Arc::new(ManualFeed::refusing());
        let mut transport: PushTransport<Order> =
            PushTransport::new(source.clone(), feed, filter(), TIMEOUT);
        let (sink, mut rx) = sink();

        transport.start(sink);
        sleep(Duration::from_millis(1)).await;

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            TransportEvent::Failed {
                token: None,
                error: SyncError::Subscription(_),
                ..
            }
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, TransportEvent::Status { status: ChannelStatus::Error, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, TransportEvent::Batch { .. })));
        transport.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn feed_errors_flip_status_and_recover() {
        let source = Arc::new(ScriptedSource::new(vec![], vec![Order::new("1")]));
        let feed = Arc::new(ManualFeed::default());
        let mut transport: PushTransport<Order> =
            PushTransport::new(source.clone(), feed.clone(), filter(), TIMEOUT);
        let (sink, mut rx) = sink();

        transport.start(sink);
        sleep(Duration::from_millis(1)).await;
        feed.push(Err(SyncError::Subscription("socket reset".into())));
        sleep(Duration::from_millis(1)).await;
        assert_eq!(source.calls(), 1, "errors alone do not trigger a fetch");
        feed.push(insert());
        sleep(Duration::from_millis(1)).await;
        assert_eq!(source.calls(), 2);

        let statuses: Vec<ChannelStatus> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::Status { status, .. } => Some(status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                ChannelStatus::Connecting,
                ChannelStatus::Subscribed,
                ChannelStatus::Error,
                ChannelStatus::Subscribed
            ]
        );
        transport.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_feed_is_reported() {
        let source = Arc::new(ScriptedSource::new(vec![], vec![Order::new("1")]));
        let feed = Arc::new(ManualFeed::default());
        let mut transport: PushTransport<Order> =
            PushTransport::new(source, feed.clone(), filter(), TIMEOUT);
        let (sink, mut rx) = sink();

        transport.start(sink);
        sleep(Duration::from_millis(1)).await;
        feed.close();
        sleep(Duration::from_millis(1)).await;

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, TransportEvent::Status { status: ChannelStatus::Closed, .. })));
        transport.stop();
    }

    #[test]
    fn owner_filter_lets_ownerless_events_through() {
        let filter = SubscriptionFilter {
            table: "orders".into(),
            owner: Some(OwnerId::from("u1")),
        };
        let mine = ChangeEvent::new(ChangeKind::Update, Some(json!({"id": 1, "user_id": "u1"})));
        let theirs = ChangeEvent::new(ChangeKind::Update, Some(json!({"id": 2, "user_id": "u2"})));
        let bare = ChangeEvent::new(ChangeKind::Delete, Some(json!({"id": 3})));
        assert!(filter.matches(&mine));
        assert!(!filter.matches(&theirs));
        assert!(filter.matches(&bare));
    }
}
