use crate::{
    sync_point::SyncPointId,
    types::{RequestId, RouteId},
};

/// Outbound traffic from the service back to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// Answer to an `InsertSyncPoint` request, written from the transport
    /// context before the processing context has seen the request.
    SyncPointInserted {
        route_id: RouteId,
        request_id: Option<RequestId>,
        sync_point: SyncPointId,
    },
    StubCreated {
        route_id: RouteId,
        request_id: RequestId,
        succeeded: bool,
    },
    StubDestroyed {
        route_id: RouteId,
        request_id: RequestId,
    },
    /// Reply produced by a stub while executing a command.
    Stub {
        route_id: RouteId,
        request_id: Option<RequestId>,
        payload: Box<[u8]>,
    },
    /// Synthesized for a synchronous message that could not be routed, so
    /// the caller is never left waiting.
    Error {
        route_id: RouteId,
        request_id: RequestId,
    },
}

impl Reply {
    pub fn route_id(&self) -> RouteId {
        match self {
            Reply::SyncPointInserted { route_id, .. }
            | Reply::StubCreated { route_id, .. }
            | Reply::StubDestroyed { route_id, .. }
            | Reply::Stub { route_id, .. }
            | Reply::Error { route_id, .. } => *route_id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error { .. })
    }
}
