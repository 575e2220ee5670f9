use thiserror::Error;

use cmdchan_shared::{ChannelId, RouteId};

/// Errors surfaced by channel and registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// A stub is already bound to the route
    #[error("Route {route_id} is already bound to a stub. Destroy the existing stub before reusing its route id")]
    RouteConflict { route_id: RouteId },

    /// No stub is bound to the route
    #[error("No stub is bound to route {route_id}. It was never created or has already been destroyed")]
    UnknownRoute { route_id: RouteId },

    /// The route id is reserved for control messages
    #[error("Route {route_id} is reserved for channel control messages and cannot host a stub")]
    ReservedRoute { route_id: RouteId },

    /// The processing side of the channel is gone
    #[error("{channel_id} is disconnected. Its processing context has been torn down")]
    Disconnected { channel_id: ChannelId },

    /// The registry holds no channel with this id
    #[error("{channel_id} is not registered. It was never established or has already been removed")]
    UnknownChannel { channel_id: ChannelId },
}
