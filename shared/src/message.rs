use crate::{
    sync_point::SyncPointId,
    types::{RequestId, RouteId, CONTROL_ROUTE_ID},
};

/// Parameters a client supplies when asking a channel to create a stub.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StubConfig {
    /// Route of an existing stub whose resources the new stub shares.
    pub share_group: Option<RouteId>,
    /// Opaque attribute list handed to the stub factory.
    pub attributes: Vec<i32>,
    /// Free-form label used in diagnostics.
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Opaque command for the stub's interpreter.
    Command,
    /// Blocks the client until the stub's token reaches a range.
    WaitForToken,
    /// Blocks the client until the stub's read offset reaches a range.
    WaitForGetOffset,
    /// Acknowledgment-only request, cheap to service.
    Ack,
    /// Asks for a new sync point bound to the addressed stub.
    InsertSyncPoint,
    /// Retires a sync point once the stub reaches it. Service-internal.
    RetireSyncPoint(SyncPointId),
    /// Resumes a stub that still had commands to process. Service-internal.
    Rescheduled,
    /// Control: create a stub at `route_id`.
    CreateStub { route_id: RouteId, config: StubConfig },
    /// Control: destroy the stub at `route_id`.
    DestroyStub { route_id: RouteId },
}

impl MessageKind {
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Command => "Command",
            MessageKind::WaitForToken => "WaitForToken",
            MessageKind::WaitForGetOffset => "WaitForGetOffset",
            MessageKind::Ack => "Ack",
            MessageKind::InsertSyncPoint => "InsertSyncPoint",
            MessageKind::RetireSyncPoint(_) => "RetireSyncPoint",
            MessageKind::Rescheduled => "Rescheduled",
            MessageKind::CreateStub { .. } => "CreateStub",
            MessageKind::DestroyStub { .. } => "DestroyStub",
        }
    }
}

/// A single inbound message: a route, a kind, an opaque payload and, for
/// synchronous messages, the id the reply must carry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    route_id: RouteId,
    kind: MessageKind,
    payload: Box<[u8]>,
    request_id: Option<RequestId>,
}

impl Message {
    pub fn new(route_id: RouteId, kind: MessageKind) -> Self {
        Self {
            route_id,
            kind,
            payload: Box::new([]),
            request_id: None,
        }
    }

    pub fn command(route_id: RouteId, payload: &[u8]) -> Self {
        Self::new(route_id, MessageKind::Command).with_payload(payload)
    }

    pub fn control(kind: MessageKind) -> Self {
        Self::new(CONTROL_ROUTE_ID, kind)
    }

    pub fn retire_sync_point(route_id: RouteId, sync_point: SyncPointId) -> Self {
        Self::new(route_id, MessageKind::RetireSyncPoint(sync_point))
    }

    pub fn rescheduled(route_id: RouteId) -> Self {
        Self::new(route_id, MessageKind::Rescheduled)
    }

    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.into();
        self
    }

    /// Marks the message as synchronous: the sender waits for a reply
    /// carrying `request_id`.
    pub fn expecting_reply(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn route_id(&self) -> RouteId {
        self.route_id
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    pub fn is_sync(&self) -> bool {
        self.request_id.is_some()
    }

    pub fn is_control(&self) -> bool {
        self.route_id == CONTROL_ROUTE_ID
    }

    /// Blocking waits jump the deferred queue so a client that is waiting
    /// is not held behind unrelated work.
    pub fn is_blocking_wait(&self) -> bool {
        matches!(
            self.kind,
            MessageKind::WaitForToken | MessageKind::WaitForGetOffset
        )
    }

    pub fn is_ack(&self) -> bool {
        matches!(self.kind, MessageKind::Ack)
    }

    /// Kinds the service synthesizes itself and must never accept from a client.
    pub fn is_service_internal(&self) -> bool {
        matches!(
            self.kind,
            MessageKind::RetireSyncPoint(_) | MessageKind::Rescheduled
        )
    }
}
