use std::sync::{Arc, Mutex};

use orderwatch_core::Order;
use orderwatch_sync::{
    reconcile, DiffResult, Notice, NotificationPolicy, NotificationSink, NotifyError, Snapshot,
};
use rstest::rstest;

fn orders(ids: &[u64]) -> Vec<Order> {
    ids.iter().map(|id| Order::new(*id)).collect()
}

fn baseline(ids: &[u64]) -> Snapshot<Order> {
    reconcile(None, orders(ids)).0
}

fn diff_ids(diff: &[Order]) -> Vec<String> {
    diff.iter().map(|o| o.id.to_string()).collect()
}

#[rstest]
#[case::empty(&[])]
#[case::one(&[1])]
#[case::many(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10])]
fn first_reconciliation_is_silent(#[case] ids: &[u64]) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (snapshot, diff) = reconcile(None, orders(ids));
    assert_eq!(snapshot.len(), ids.len());
    assert_eq!(diff, DiffResult::default());
}

#[test]
fn reconciling_same_batch_twice_is_empty() {
    let incoming = vec![
        Order::new("1").with_status("new"),
        Order::new("2").with_status("shipped"),
    ];
    let (first, _) = reconcile(None, incoming.clone());
    let (second, diff) = reconcile(Some(&first), incoming.clone());
    assert!(diff.is_empty());
    let (_, again) = reconcile(Some(&second), incoming);
    assert!(again.is_empty());
}

#[test]
fn detects_added_order() {
    let previous = baseline(&[1, 2]);
    let (_, diff) = reconcile(Some(&previous), orders(&[1, 2, 3]));
    assert_eq!(diff_ids(&diff.added), vec!["3"]);
    assert!(diff.changed.is_empty());
    assert_eq!(diff.removed_count, 0);
}

#[test]
fn detects_changed_order() {
    let (previous, _) = reconcile(None, vec![Order::new("1").with_status("new")]);
    let (_, diff) = reconcile(Some(&previous), vec![Order::new("1").with_status("shipped")]);
    assert!(diff.added.is_empty());
    assert_eq!(diff.changed, vec![Order::new("1").with_status("shipped")]);
    assert_eq!(diff.removed_count, 0);
}

#[test]
fn detects_removed_order() {
    let previous = baseline(&[1, 2]);
    let (_, diff) = reconcile(Some(&previous), orders(&[1]));
    assert_eq!(diff.removed_count, 1);
    assert!(diff.added.is_empty());
    assert!(diff.changed.is_empty());
}

#[test]
fn diff_is_deterministic() {
    let previous = baseline(&[1, 2, 3]);
    let incoming = || {
        vec![
            Order::new("5"),
            Order::new("2").with_status("ready"),
            Order::new("4"),
        ]
    };
    let (_, a) = reconcile(Some(&previous), incoming());
    let (_, b) = reconcile(Some(&previous), incoming());
    assert_eq!(a, b);
    assert_eq!(diff_ids(&a.added), vec!["5", "4"]);
    assert_eq!(a.removed_count, 2);
}

#[derive(Default)]
struct Collect(Mutex<Vec<Notice>>);

impl NotificationSink for Collect {
    fn notify(&self, notice: &Notice) -> Result<(), NotifyError> {
        self.0.lock().expect("lock").push(notice.clone());
        Ok(())
    }
}

#[test]
fn unseen_count_accumulates_and_resets() {
    let sink = Arc::new(Collect::default());
    let policy: NotificationPolicy<Order> = NotificationPolicy::new(sink.clone());

    let mut snapshot = baseline(&[1]);
    let mut unseen = 0;
    for batch in [vec![1, 2], vec![1, 2, 3, 4, 5]] {
        let (next, diff) = reconcile(Some(&snapshot), orders(&batch));
        unseen = policy.apply(&diff, unseen);
        snapshot = next;
    }
    assert_eq!(unseen, 4);

    // mark seen
    unseen = 0;
    let (_, diff) = reconcile(Some(&snapshot), orders(&[1, 2, 3, 4, 5, 6, 7]));
    unseen = policy.apply(&diff, unseen);
    assert_eq!(unseen, 2);

    let messages: Vec<String> = sink
        .0
        .lock()
        .expect("lock")
        .iter()
        .map(|n| n.message.clone())
        .collect();
    assert_eq!(
        messages,
        vec![
            "New order received",
            "3 new orders received",
            "2 new orders received"
        ]
    );
}
