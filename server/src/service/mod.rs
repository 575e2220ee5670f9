mod channel_manager;
mod service_config;

pub use channel_manager::ChannelManager;
pub use service_config::ServiceConfig;
