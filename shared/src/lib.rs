//! # Cmdchan Shared
//! Types shared between command-channel clients and the cmdchan service:
//! messages and replies, sync points, the cross-channel preemption flag and
//! the clock abstraction the preemption timers run on.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

#[macro_use]
extern crate cfg_if;

mod clock;
mod message;
mod preemption_flag;
mod reply;
mod sync_point;
mod timing;
mod types;

cfg_if! {
    if #[cfg(any(test, feature = "test_utils"))] {
        mod manual_clock;
        pub use manual_clock::ManualClock;
    }
}

pub use clock::{Clock, SystemClock};
pub use message::{Message, MessageKind, StubConfig};
pub use preemption_flag::PreemptionFlag;
pub use reply::Reply;
pub use sync_point::{SyncPointError, SyncPointId, SyncPointManager, SyncPointToken};
pub use timing::{PreemptionTiming, DEFAULT_VSYNC_INTERVAL};
pub use types::{ChannelId, ClientId, MessageNumber, RequestId, RouteId, CONTROL_ROUTE_ID};
