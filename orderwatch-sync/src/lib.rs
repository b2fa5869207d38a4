//! # orderwatch-sync
//!
//! Transport-independent pieces of order synchronization.
//!
//! - [`diff`]: [`reconcile`] a fresh batch against the previous [`Snapshot`]
//! - [`lifecycle`]: the Stopped/Active/Paused state machine
//! - [`notify`]: unseen counting, callbacks, and transient notices

pub mod diff;
pub mod error;
pub mod lifecycle;
pub mod notify;

pub use diff::{reconcile, DiffResult, Snapshot};
pub use error::{ErrorKind, NotifyError, SyncError};
pub use lifecycle::{Effect, Lifecycle, LifecycleState, Transition};
pub use notify::{Notice, NoticeLevel, NotificationPolicy, NotificationSink, NoopSink};
