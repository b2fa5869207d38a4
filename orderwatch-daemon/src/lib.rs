//! Order sync runtime: transports, sources, the engine actor, and the
//! control socket.

pub mod engine;
mod error;
pub mod feed;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod source;
pub mod transport;

pub use engine::{EngineHandle, EngineOptions, EngineView};
pub use error::DaemonError;
pub use feed::{ChannelFeed, DirectoryFeed};
pub use protocol::{
    request_command, request_event, request_orders, request_status, request_stop,
    request_visibility, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{build_transport, run, start_blocking};
pub use source::{DirectoryOrderSource, HttpOrderSource};
pub use transport::{
    BatchSink, ChangeEvent, ChangeFeed, ChangeKind, ChannelStatus, FetchOrigin, FetchToken,
    OrderSource, PollingTransport, PushTransport, Subscription, SubscriptionFilter,
    SubscriptionGuard, Transport, TransportEvent,
};
