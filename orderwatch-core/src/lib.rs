//! orderwatch core library: order types, watch configuration, errors.
//!
//! - [`types`]: order record contract and the concrete [`Order`]
//! - [`config`]: [`WatchConfig`] load / save / validate
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{SourceConfig, TransportKind, WatchConfig};
pub use error::ConfigError;
pub use types::{Order, OrderId, OrderRecord, OwnerId};
