use std::default::Default;

use cmdchan_shared::PreemptionTiming;

use crate::channel::ChannelConfig;

/// Contains Config properties which will be used by the ChannelManager
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Applied to every channel the manager establishes
    pub channel: ChannelConfig,
    /// Budgets for each channel's preemption state machine
    pub preemption: PreemptionTiming,
}
