use std::{collections::HashMap, sync::Arc};

use log::{info, warn};
use smol::channel;

use cmdchan_shared::{ChannelId, ClientId, Clock, SyncPointManager, SystemClock};

use crate::{
    channel::Channel, error::ChannelError, filter::MessageFilter, io_endpoint::IoEndpoint,
    service::service_config::ServiceConfig, stub::StubFactory, transport::ReplySender,
};

/// Registry of every channel on the processing context.
pub struct ChannelManager {
    config: ServiceConfig,
    sync_point_manager: Arc<SyncPointManager>,
    clock: Arc<dyn Clock>,
    channels: HashMap<ChannelId, Channel>,
    next_channel_id: u64,
}

impl ChannelManager {
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ServiceConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            sync_point_manager: Arc::new(SyncPointManager::new()),
            clock,
            channels: HashMap::new(),
            next_channel_id: 1,
        }
    }

    /// Creates a channel for `client_id` and returns its transport end,
    /// which the caller moves to the transport context.
    pub fn establish_channel(
        &mut self,
        client_id: ClientId,
        stub_factory: Box<dyn StubFactory>,
        reply_sender: Box<dyn ReplySender>,
    ) -> IoEndpoint {
        let channel_id = ChannelId::from_u64(self.next_channel_id);
        self.next_channel_id += 1;

        let (processing_sender, processing_receiver) = channel::unbounded();
        let (filter_sender, filter_receiver) = channel::unbounded();

        let filter = MessageFilter::new(
            channel_id,
            self.config.preemption,
            self.sync_point_manager.clone(),
            self.clock.clone(),
            reply_sender.clone(),
            processing_sender.clone(),
        );
        let channel = Channel::new(
            channel_id,
            client_id,
            self.config.channel.clone(),
            stub_factory,
            reply_sender,
            (processing_sender.clone(), processing_receiver),
            filter_sender,
        );
        self.channels.insert(channel_id, channel);
        info!("{}: established for client {}", channel_id, client_id);

        IoEndpoint::new(filter, processing_sender, filter_receiver)
    }

    /// Tears down and forgets a channel. Returns false if it was not registered.
    pub fn remove_channel(&mut self, channel_id: ChannelId) -> bool {
        let Some(mut channel) = self.channels.remove(&channel_id) else {
            return false;
        };
        channel.destroy();
        info!("{}: removed", channel_id);
        true
    }

    /// Runs each channel's pending tasks once, then removes channels whose
    /// transport failed. Must be called regularly.
    pub fn pump(&mut self) -> usize {
        let mut ran = 0;
        for channel in self.channels.values_mut() {
            ran += channel.run_pending_tasks();
        }

        let errored: Vec<ChannelId> = self
            .channels
            .values()
            .filter(|channel| channel.is_errored())
            .map(Channel::channel_id)
            .collect();
        for channel_id in errored {
            warn!("{}: removing after transport error", channel_id);
            self.remove_channel(channel_id);
        }
        ran
    }

    /// Makes the stubs of `preempted` yield whenever `preempting` asks for it.
    pub fn set_preemption(
        &mut self,
        preempting: ChannelId,
        preempted: ChannelId,
    ) -> Result<(), ChannelError> {
        if !self.channels.contains_key(&preempted) {
            return Err(ChannelError::UnknownChannel {
                channel_id: preempted,
            });
        }
        let flag = self
            .channels
            .get_mut(&preempting)
            .ok_or(ChannelError::UnknownChannel {
                channel_id: preempting,
            })?
            .preempting_flag();
        if let Some(channel) = self.channels.get_mut(&preempted) {
            channel.set_preempt_by_flag(Some(flag));
        }
        Ok(())
    }

    pub fn lose_all_contexts(&mut self) {
        for channel in self.channels.values_mut() {
            channel.lose_all_contexts();
        }
    }

    /// Memory reported by every stub on every channel.
    pub fn memory_usage(&self) -> u64 {
        self.channels.values().map(Channel::memory_usage).sum()
    }

    pub fn channel(&self, channel_id: ChannelId) -> Option<&Channel> {
        self.channels.get(&channel_id)
    }

    pub fn channel_mut(&mut self, channel_id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(&channel_id)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn sync_point_manager(&self) -> &Arc<SyncPointManager> {
        &self.sync_point_manager
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}
