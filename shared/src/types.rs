/// Key of a stub inside one channel.
pub type RouteId = i32;
/// Identifier the client attaches to a message that expects a reply.
pub type RequestId = u32;
/// Sequence number of a message forwarded from the filter to its channel.
pub type MessageNumber = u64;
/// Opaque identifier of the client process that owns a channel.
pub type ClientId = i32;

/// Messages on this route are addressed to the channel itself, not to a stub.
pub const CONTROL_ROUTE_ID: RouteId = RouteId::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub fn to_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel#{}", self.0)
    }
}
