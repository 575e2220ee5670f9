use std::default::Default;

/// Contains Config properties which will be used by every Channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Logs every message the channel receives at debug level.
    pub log_messages: bool,
    /// Lets a dispatch pass keep going while the next message is an
    /// acknowledgment for a stub that can take it right away.
    pub fast_track_acks: bool,
    /// Upper bound on messages fast-tracked after the first one in a pass.
    pub max_fast_track_run: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            log_messages: false,
            fast_track_acks: true,
            max_fast_track_run: 8,
        }
    }
}
