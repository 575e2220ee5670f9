use smol::channel::{self, Receiver, Sender, TryRecvError};

use cmdchan_shared::Reply;

use super::{RecvError, ReplySender, SendError};

/// In-process reply transport backed by an unbounded channel.
pub struct ReplyChannel;

impl ReplyChannel {
    pub fn unbounded() -> (Box<dyn ReplySender>, ReplyReceiver) {
        let (reply_sender, reply_receiver) = channel::unbounded();
        (Box::new(reply_sender), ReplyReceiver::new(reply_receiver))
    }
}

impl ReplySender for Sender<Reply> {
    fn send(&self, reply: Reply) -> Result<(), SendError> {
        self.try_send(reply).map_err(|_| SendError)
    }

    fn box_clone(&self) -> Box<dyn ReplySender> {
        Box::new(self.clone())
    }
}

/// Client end of a [`ReplyChannel`].
#[derive(Clone)]
pub struct ReplyReceiver {
    receiver: Receiver<Reply>,
}

impl ReplyReceiver {
    fn new(receiver: Receiver<Reply>) -> Self {
        Self { receiver }
    }

    /// Returns the next reply, `Ok(None)` if none is waiting.
    pub fn receive(&self) -> Result<Option<Reply>, RecvError> {
        match self.receiver.try_recv() {
            Ok(reply) => Ok(Some(reply)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err(RecvError),
        }
    }

    /// Blocks until a reply arrives or every sender is gone.
    pub fn receive_blocking(&self) -> Option<Reply> {
        self.receiver.recv_blocking().ok()
    }

    pub fn drain(&self) -> Vec<Reply> {
        let mut replies = Vec::new();
        while let Ok(reply) = self.receiver.try_recv() {
            replies.push(reply);
        }
        replies
    }

    /// Closing the receiver makes every subsequent send fail.
    pub fn close(&self) {
        self.receiver.close();
    }
}
