//! Notification policy: turns a cycle's [`DiffResult`] into user-facing
//! signals (unseen count, callbacks, transient notices).
//!
//! Notices are fire-and-forget. A sink that fails or is missing only costs
//! the notice; it never feeds back into the cache or the lifecycle.

use std::sync::Arc;

use serde::Serialize;

use orderwatch_core::OrderRecord;

use crate::diff::DiffResult;
use crate::error::{NotifyError, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Info,
    Failure,
}

/// A transient, user-visible message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Failure,
            message: message.into(),
        }
    }
}

/// Where notices are displayed.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: &Notice) -> Result<(), NotifyError>;
}

/// Sink used when no UI layer is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn notify(&self, _notice: &Notice) -> Result<(), NotifyError> {
        Ok(())
    }
}

pub type OrderCallback<T> = Box<dyn Fn(&T) + Send + Sync>;

pub struct NotificationPolicy<T> {
    sink: Arc<dyn NotificationSink>,
    on_new_order: Option<OrderCallback<T>>,
    on_order_update: Option<OrderCallback<T>>,
}

impl<T> Default for NotificationPolicy<T> {
    fn default() -> Self {
        Self::new(Arc::new(NoopSink))
    }
}

impl<T> std::fmt::Debug for NotificationPolicy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationPolicy")
            .field("on_new_order", &self.on_new_order.is_some())
            .field("on_order_update", &self.on_order_update.is_some())
            .finish_non_exhaustive()
    }
}

impl<T> NotificationPolicy<T> {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink,
            on_new_order: None,
            on_order_update: None,
        }
    }

    pub fn on_new_order(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_new_order = Some(Box::new(callback));
        self
    }

    pub fn on_order_update(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_order_update = Some(Box::new(callback));
        self
    }

    /// A user-triggered refresh failed.
    pub fn refresh_failed(&self, error: &SyncError) {
        tracing::debug!("manual refresh failed: {error}");
        self.emit(&Notice::failure("Failed to refresh orders"));
    }

    fn emit(&self, notice: &Notice) {
        if let Err(err) = self.sink.notify(notice) {
            tracing::warn!("dropping notice {:?}: {err}", notice.message);
        }
    }
}

impl<T: OrderRecord> NotificationPolicy<T> {
    /// Consume one post-baseline diff.
    ///
    /// Returns the new unseen count.
    pub fn apply(&self, diff: &DiffResult<T>, unseen_count: u64) -> u64 {
        let unseen_count = unseen_count.saturating_add(diff.added.len() as u64);

        if let (Some(callback), Some(latest)) = (&self.on_new_order, most_recent(&diff.added)) {
            callback(latest);
        }
        if let Some(callback) = &self.on_order_update {
            for order in &diff.changed {
                callback(order);
            }
        }
        for notice in summarize(diff) {
            self.emit(&notice);
        }
        unseen_count
    }
}

/// The newest of `added`: latest `created_at`, first in batch order on ties
/// or when no timestamps are present.
pub fn most_recent<T: OrderRecord>(added: &[T]) -> Option<&T> {
    let mut best: Option<&T> = None;
    for order in added {
        match best {
            Some(current) if order.created_at() <= current.created_at() => {}
            _ => best = Some(order),
        }
    }
    best
}

/// Transient notices for a diff, one per non-empty category.
pub fn summarize<T>(diff: &DiffResult<T>) -> Vec<Notice> {
    let mut notices = Vec::new();
    match diff.added.len() {
        0 => {}
        1 => notices.push(Notice::success("New order received")),
        n => notices.push(Notice::success(format!("{n} new orders received"))),
    }
    if !diff.changed.is_empty() {
        notices.push(Notice::info(format!(
            "{} updated",
            pluralize(diff.changed.len(), "order", "orders")
        )));
    }
    if diff.removed_count > 0 {
        notices.push(Notice::info(format!(
            "{} removed",
            pluralize(diff.removed_count, "order", "orders")
        )));
    }
    notices
}

/// `1 order`, `2 orders`.
pub fn pluralize(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{count} {singular}")
    } else {
        format!("{count} {plural}")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};
    use orderwatch_core::Order;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        notices: Mutex<Vec<Notice>>,
    }

    impl NotificationSink for RecordingSink {
        fn notify(&self, notice: &Notice) -> Result<(), NotifyError> {
            self.notices.lock().expect("lock").push(notice.clone());
            Ok(())
        }
    }

    struct BrokenSink;

    impl NotificationSink for BrokenSink {
        fn notify(&self, _notice: &Notice) -> Result<(), NotifyError> {
            Err(NotifyError("no display attached".into()))
        }
    }

    fn diff(added: &[&str], changed: &[&str], removed_count: usize) -> DiffResult<Order> {
        DiffResult {
            added: added.iter().map(|id| Order::new(*id)).collect(),
            changed: changed.iter().map(|id| Order::new(*id)).collect(),
            removed_count,
        }
    }

    #[test]
    fn pluralization() {
        assert_eq!(pluralize(1, "order", "orders"), "1 order");
        assert_eq!(pluralize(0, "order", "orders"), "0 orders");
        assert_eq!(pluralize(5, "order", "orders"), "5 orders");
    }

    #[test]
    fn summary_singular_and_plural() {
        let single = summarize(&diff(&["1"], &["2"], 1));
        assert_eq!(
            single,
            vec![
                Notice::success("New order received"),
                Notice::info("1 order updated"),
                Notice::info("1 order removed"),
            ]
        );

        let many = summarize(&diff(&["1", "2", "3"], &["4", "5"], 2));
        assert_eq!(many[0].message, "3 new orders received");
        assert_eq!(many[1].message, "2 orders updated");
        assert_eq!(many[2].message, "2 orders removed");
    }

    #[test]
    fn empty_diff_has_no_notices() {
        assert!(summarize(&DiffResult::<Order>::default()).is_empty());
    }

    #[test]
    fn most_recent_prefers_latest_created_at() {
        let old = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let new = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let added = vec![
            Order::new("a").with_created_at(old),
            Order::new("b").with_created_at(new),
            Order::new("c"),
        ];
        assert_eq!(most_recent(&added).map(|o| o.id.0.as_str()), Some("b"));
    }

    #[test]
    fn most_recent_falls_back_to_first() {
        let added = vec![Order::new("a"), Order::new("b")];
        assert_eq!(most_recent(&added).map(|o| o.id.0.as_str()), Some("a"));
        assert!(most_recent::<Order>(&[]).is_none());
    }

    #[test]
    fn apply_counts_and_calls_back() {
        let sink = Arc::new(RecordingSink::default());
        let new_orders = Arc::new(Mutex::new(Vec::new()));
        let updated = Arc::new(Mutex::new(Vec::new()));
        let policy = {
            let new_orders = new_orders.clone();
            let updated = updated.clone();
            NotificationPolicy::new(sink.clone())
                .on_new_order(move |o: &Order| new_orders.lock().expect("lock").push(o.id.0.clone()))
                .on_order_update(move |o: &Order| updated.lock().expect("lock").push(o.id.0.clone()))
        };

        let unseen = policy.apply(&diff(&["1", "2"], &["3", "4"], 0), 5);
        assert_eq!(unseen, 7);
        assert_eq!(*new_orders.lock().expect("lock"), vec!["1"]);
        assert_eq!(*updated.lock().expect("lock"), vec!["3", "4"]);
        assert_eq!(sink.notices.lock().expect("lock").len(), 2);
    }

    #[test]
    fn broken_sink_does_not_affect_counts() {
        let policy: NotificationPolicy<Order> = NotificationPolicy::new(Arc::new(BrokenSink));
        let unseen = policy.apply(&diff(&["1"], &[], 0), 0);
        assert_eq!(unseen, 1);
        policy.refresh_failed(&SyncError::FetchFailed("offline".into()));
    }

    #[test]
    fn no_new_order_callback_without_additions() {
        let called = Arc::new(Mutex::new(false));
        let policy = {
            let called = called.clone();
            NotificationPolicy::default().on_new_order(move |_: &Order| {
                *called.lock().expect("lock") = true;
            })
        };
        assert_eq!(policy.apply(&diff(&[], &["1"], 3), 2), 2);
        assert!(!*called.lock().expect("lock"));
    }
}
