//! Snapshot reconciliation.
//!
//! [`reconcile`] is pure: it never mutates the previous snapshot, and for the
//! same two inputs it always returns the same [`DiffResult`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use orderwatch_core::OrderRecord;

/// Orders as of the last successful cycle.
///
/// Immutable once built; cloning shares the same backing slice, so readers
/// holding an older snapshot never observe a later cycle.
#[derive(Debug)]
pub struct Snapshot<T> {
    orders: Arc<[T]>,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            orders: Arc::clone(&self.orders),
        }
    }
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            orders: Arc::from(Vec::new()),
        }
    }
}

impl<T: OrderRecord> Snapshot<T> {
    /// Build a snapshot from a raw batch, collapsing duplicate ids.
    ///
    /// The last occurrence of an id wins and keeps its own position.
    pub fn from_batch(incoming: Vec<T>) -> Self {
        let mut last_index = HashMap::with_capacity(incoming.len());
        for (index, order) in incoming.iter().enumerate() {
            last_index.insert(order.id(), index);
        }
        if last_index.len() == incoming.len() {
            return Self {
                orders: Arc::from(incoming),
            };
        }

        tracing::debug!(
            "collapsing {} duplicate order id(s) in batch",
            incoming.len() - last_index.len()
        );
        let orders: Vec<T> = incoming
            .into_iter()
            .enumerate()
            .filter(|(index, order)| last_index.get(&order.id()) == Some(index))
            .map(|(_, order)| order)
            .collect();
        Self {
            orders: Arc::from(orders),
        }
    }

    pub fn get(&self, id: &T::Id) -> Option<&T> {
        self.orders.iter().find(|order| &order.id() == id)
    }
}

impl<T> Snapshot<T> {
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.orders.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.orders
    }

    /// Whether two snapshots share the same backing storage.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.orders, &other.orders)
    }
}

impl<'a, T> IntoIterator for &'a Snapshot<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.orders.iter()
    }
}

/// What changed between two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffResult<T> {
    pub added: Vec<T>,
    pub changed: Vec<T>,
    pub removed_count: usize,
}

impl<T> Default for DiffResult<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            changed: Vec::new(),
            removed_count: 0,
        }
    }
}

impl<T> DiffResult<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed_count == 0
    }
}

/// Compare `incoming` against `previous` and produce the next snapshot.
///
/// `previous == None` means no baseline exists yet: the batch becomes the
/// baseline and the diff is empty regardless of its size.
pub fn reconcile<T: OrderRecord>(
    previous: Option<&Snapshot<T>>,
    incoming: Vec<T>,
) -> (Snapshot<T>, DiffResult<T>) {
    let next = Snapshot::from_batch(incoming);
    let Some(previous) = previous else {
        return (next, DiffResult::default());
    };

    let before: HashMap<T::Id, &T> = previous.iter().map(|order| (order.id(), order)).collect();

    let mut diff = DiffResult::default();
    let mut seen = HashSet::with_capacity(next.len());
    for order in next.iter() {
        let id = order.id();
        match before.get(&id) {
            None => diff.added.push(order.clone()),
            Some(old) if *old != order => diff.changed.push(order.clone()),
            Some(_) => {}
        }
        seen.insert(id);
    }
    diff.removed_count = before.keys().filter(|id| !seen.contains(*id)).count();

    (next, diff)
}
