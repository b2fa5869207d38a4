//! Transport strategies: how fresh order batches reach the engine.
//!
//! Both strategies deliver through a [`BatchSink`]. Every fetch takes a
//! [`FetchToken`] before it is issued; tokens are strictly increasing across
//! the engine's whole life, which lets the engine drop results that complete
//! out of issue order. Each `start` hands the transport a sink bound to a new
//! epoch, so anything still in flight from before a `stop` is recognisably
//! stale when it lands.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use orderwatch_sync::SyncError;

mod polling;
mod push;

pub use polling::PollingTransport;
pub use push::{
    ChangeEvent, ChangeFeed, ChangeKind, PushTransport, Subscription, SubscriptionFilter,
    SubscriptionGuard,
};

/// Supplies the authoritative order list.
#[async_trait]
pub trait OrderSource<T>: Send + Sync {
    async fn fetch(&self) -> Result<Vec<T>, SyncError>;
}

/// Common shape of the polling and push drivers.
pub trait Transport<T>: Send {
    /// Begin delivering batches into `sink`. Calling `start` on a running
    /// transport is a no-op.
    fn start(&mut self, sink: BatchSink<T>);

    /// Cancel timers, subscriptions, and in-flight fetches. Idempotent.
    fn stop(&mut self);

    /// Fetch once out of band without disturbing any schedule.
    fn refresh_now(&mut self, origin: FetchOrigin);

    fn name(&self) -> &'static str;
}

/// Why a fetch was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchOrigin {
    /// First fetch after `start`.
    Initial,
    /// Polling timer tick.
    Scheduled,
    /// A push event arrived.
    Push,
    /// Out-of-band refresh after a resume.
    Resume,
    /// Requested by the user; failures surface as a notice.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchToken {
    pub seq: u64,
    pub origin: FetchOrigin,
}

/// Push channel health, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Connecting,
    Subscribed,
    Error,
    Closed,
}

#[derive(Debug)]
pub enum TransportEvent<T> {
    Issued {
        epoch: u64,
        token: FetchToken,
    },
    Batch {
        epoch: u64,
        token: FetchToken,
        orders: Vec<T>,
    },
    Failed {
        epoch: u64,
        token: Option<FetchToken>,
        error: SyncError,
    },
    Status {
        epoch: u64,
        status: ChannelStatus,
    },
}

impl<T> TransportEvent<T> {
    pub fn epoch(&self) -> u64 {
        match self {
            TransportEvent::Issued { epoch, .. }
            | TransportEvent::Batch { epoch, .. }
            | TransportEvent::Failed { epoch, .. }
            | TransportEvent::Status { epoch, .. } => *epoch,
        }
    }
}

/// The `onBatch`/`onError` pair handed to a transport on `start`.
pub struct BatchSink<T> {
    epoch: u64,
    tokens: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<TransportEvent<T>>,
}

impl<T> Clone for BatchSink<T> {
    fn clone(&self) -> Self {
        Self {
            epoch: self.epoch,
            tokens: Arc::clone(&self.tokens),
            tx: self.tx.clone(),
        }
    }
}

impl<T> BatchSink<T> {
    pub fn new(
        epoch: u64,
        tokens: Arc<AtomicU64>,
        tx: mpsc::UnboundedSender<TransportEvent<T>>,
    ) -> Self {
        Self { epoch, tokens, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Take the next token and announce the fetch to the engine.
    pub fn issue(&self, origin: FetchOrigin) -> FetchToken {
        let seq = self.tokens.fetch_add(1, Ordering::SeqCst) + 1;
        let token = FetchToken { seq, origin };
        self.send(TransportEvent::Issued {
            epoch: self.epoch,
            token,
        });
        token
    }

    /// Deliver the outcome of one fetch: a full batch or an error, never both.
    pub fn complete(&self, token: FetchToken, outcome: Result<Vec<T>, SyncError>) {
        let event = match outcome {
            Ok(orders) => TransportEvent::Batch {
                epoch: self.epoch,
                token,
                orders,
            },
            Err(error) => TransportEvent::Failed {
                epoch: self.epoch,
                token: Some(token),
                error,
            },
        };
        self.send(event);
    }

    /// Report an error not tied to a fetch (subscription failures).
    pub fn fail(&self, error: SyncError) {
        self.send(TransportEvent::Failed {
            epoch: self.epoch,
            token: None,
            error,
        });
    }

    pub fn status(&self, status: ChannelStatus) {
        self.send(TransportEvent::Status {
            epoch: self.epoch,
            status,
        });
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, event: TransportEvent<T>) {
        // The engine has gone away; nothing left to deliver to.
        let _ = self.tx.send(event);
    }
}

/// Issue one fetch against `source`, bounded by `timeout`, and deliver it.
pub(crate) async fn fetch_once<T>(
    source: &dyn OrderSource<T>,
    sink: &BatchSink<T>,
    origin: FetchOrigin,
    timeout: Duration,
) {
    let token = sink.issue(origin);
    let outcome = match tokio::time::timeout(timeout, source.fetch()).await {
        Ok(outcome) => outcome,
        Err(_) => Err(SyncError::FetchTimeout { after: timeout }),
    };
    if let Err(err) = &outcome {
        tracing::warn!(seq = token.seq, origin = ?origin, error = %err, "order fetch failed");
    }
    sink.complete(token, outcome);
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted sources shared by transport and engine tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// One scripted fetch: how long it takes and what it returns.
    pub struct Step<T> {
        pub delay: Duration,
        pub outcome: Result<Vec<T>, SyncError>,
    }

    impl<T> Step<T> {
        pub fn ok(orders: Vec<T>) -> Self {
            Self {
                delay: Duration::ZERO,
                outcome: Ok(orders),
            }
        }

        pub fn err(error: SyncError) -> Self {
            Self {
                delay: Duration::ZERO,
                outcome: Err(error),
            }
        }

        pub fn after(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    /// Plays back steps in call order; once exhausted, repeats `fallback`.
    pub struct ScriptedSource<T> {
        steps: Mutex<VecDeque<Step<T>>>,
        fallback: Vec<T>,
        calls: AtomicU64,
    }

    impl<T: Clone> ScriptedSource<T> {
        pub fn new(steps: Vec<Step<T>>, fallback: Vec<T>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                fallback,
                calls: AtomicU64::new(0),
            }
        }

        pub fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl<T: Clone + Send + Sync> OrderSource<T> for ScriptedSource<T> {
        async fn fetch(&self) -> Result<Vec<T>, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().expect("lock").pop_front();
            match step {
                Some(step) => {
                    if !step.delay.is_zero() {
                        tokio::time::sleep(step.delay).await;
                    }
                    step.outcome
                }
                None => Ok(self.fallback.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use orderwatch_core::Order;

    use super::testing::{ScriptedSource, Step};
    use super::*;

    fn sink(epoch: u64) -> (BatchSink<Order>, mpsc::UnboundedReceiver<TransportEvent<Order>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (BatchSink::new(epoch, Arc::new(AtomicU64::new(0)), tx), rx)
    }

    #[test]
    fn tokens_increase_across_clones() {
        let (sink, _rx) = sink(1);
        let other = sink.clone();
        let a = sink.issue(FetchOrigin::Initial);
        let b = other.issue(FetchOrigin::Manual);
        let c = sink.issue(FetchOrigin::Scheduled);
        assert!(a.seq < b.seq && b.seq < c.seq);
    }

    #[tokio::test]
    async fn fetch_once_announces_then_delivers() {
        let (sink, mut rx) = sink(3);
        let source = ScriptedSource::new(vec![Step::ok(vec![Order::new("1")])], vec![]);
        fetch_once(&source, &sink, FetchOrigin::Manual, Duration::from_secs(1)).await;

        match rx.recv().await.expect("issued") {
            TransportEvent::Issued { epoch, token } => {
                assert_eq!(epoch, 3);
                assert_eq!(token.origin, FetchOrigin::Manual);
            }
            other => panic!("expected issued, got {other:?}"),
        }
        match rx.recv().await.expect("batch") {
            TransportEvent::Batch { orders, .. } => assert_eq!(orders.len(), 1),
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_becomes_timeout() {
        let (sink, mut rx) = sink(1);
        let source = ScriptedSource::new(
            vec![Step::ok(vec![Order::new("1")]).after(Duration::from_secs(60))],
            vec![],
        );
        fetch_once(&source, &sink, FetchOrigin::Scheduled, Duration::from_secs(5)).await;

        let _issued = rx.recv().await.expect("issued");
        match rx.recv().await.expect("failure") {
            TransportEvent::Failed {
                token: Some(_),
                error,
                ..
            } => assert_eq!(
                error,
                SyncError::FetchTimeout {
                    after: Duration::from_secs(5)
                }
            ),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
