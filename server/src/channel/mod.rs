mod channel;
mod channel_config;
mod deferred_queue;
mod route_table;

pub use channel::Channel;
pub use channel_config::ChannelConfig;
pub use deferred_queue::DeferredQueue;
