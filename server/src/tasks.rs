use std::sync::Arc;

use cmdchan_shared::{Message, MessageNumber, PreemptionFlag, RouteId, SyncPointToken};

/// Work posted to a channel's processing context.
#[derive(Debug)]
pub enum ProcessingTask {
    /// A client message the filter did not handle itself.
    Message(Message),
    /// Binds a freshly issued sync point to the stub at `route_id`.
    InsertSyncPoint {
        route_id: RouteId,
        sync_point: SyncPointToken,
    },
    /// One dispatch pass over the deferred queue.
    HandleMessages,
    /// A stub reports that it became scheduled or descheduled.
    StubSchedulingChanged { route_id: RouteId, scheduled: bool },
    /// The transport failed; the channel must be removed.
    ChannelError,
}

/// Work posted to a channel's transport context.
#[derive(Debug)]
pub enum FilterTask {
    MessageProcessed(MessageNumber),
    SetPreemptingFlag {
        flag: Arc<PreemptionFlag>,
        a_stub_is_descheduled: bool,
    },
    UpdateStubSchedulingState { a_stub_is_descheduled: bool },
}
