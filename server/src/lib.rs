//! # Cmdchan Server
//! Hosts per-client command channels. Each channel splits across two
//! contexts: a [`MessageFilter`] on the transport context that answers sync
//! point requests and decides when to preempt sibling channels, and a
//! [`Channel`] on the processing context that queues messages and
//! dispatches them to [`Stub`]s in order.

#![deny(
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces
)]

pub mod shared {
    pub use cmdchan_shared::{
        ChannelId, ClientId, Clock, Message, MessageKind, MessageNumber, PreemptionFlag,
        PreemptionTiming, Reply, RequestId, RouteId, StubConfig, SyncPointError, SyncPointId,
        SyncPointManager, SyncPointToken, SystemClock, CONTROL_ROUTE_ID, DEFAULT_VSYNC_INTERVAL,
    };
}

mod channel;
mod error;
mod filter;
mod io_endpoint;
mod service;
mod stub;
mod tasks;
pub mod transport;

pub use channel::{Channel, ChannelConfig, DeferredQueue};
pub use error::ChannelError;
pub use filter::{MessageFilter, PreemptionEvent, PreemptionState, PreemptionStateMachine};
pub use io_endpoint::IoEndpoint;
pub use service::{ChannelManager, ServiceConfig};
pub use stub::{Stub, StubFactory, StubHandle};
pub use tasks::{FilterTask, ProcessingTask};
