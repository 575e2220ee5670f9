use thiserror::Error;

use cmdchan_shared::Reply;

mod channel;
pub use channel::{ReplyChannel, ReplyReceiver};

/// The reply transport is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("reply transport is disconnected")]
pub struct SendError;

/// Every reply sender is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("reply transport is closed")]
pub struct RecvError;

/// Writes replies back to the client that owns a channel.
///
/// Both contexts hold one: the filter writes sync point replies from the
/// transport context, the channel writes everything else.
pub trait ReplySender: Send + Sync {
    fn send(&self, reply: Reply) -> Result<(), SendError>;
    /// Creates a new boxed clone of the trait object.
    fn box_clone(&self) -> Box<dyn ReplySender>;
}

impl Clone for Box<dyn ReplySender> {
    fn clone(&self) -> Box<dyn ReplySender> {
        ReplySender::box_clone(self.as_ref())
    }
}
