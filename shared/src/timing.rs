use std::time::Duration;

/// Nominal display refresh interval the preemption budgets are derived from.
pub const DEFAULT_VSYNC_INTERVAL: Duration = Duration::from_millis(17);

/// Durations that drive a channel's preemption state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreemptionTiming {
    /// How old the oldest pending message must be before the channel
    /// considers preempting its siblings.
    pub wait: Duration,
    /// Longest stretch the channel may keep its siblings preempted.
    pub max_preempt: Duration,
    /// Preemption stops once the oldest pending message is younger than this.
    pub stop_threshold: Duration,
}

impl PreemptionTiming {
    pub fn from_vsync_interval(vsync_interval: Duration) -> Self {
        Self {
            wait: vsync_interval * 2,
            max_preempt: vsync_interval,
            stop_threshold: vsync_interval,
        }
    }
}

impl Default for PreemptionTiming {
    fn default() -> Self {
        Self::from_vsync_interval(DEFAULT_VSYNC_INTERVAL)
    }
}
