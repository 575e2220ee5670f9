use std::collections::VecDeque;

use cmdchan_shared::Message;

/// Messages waiting for dispatch, in arrival order except that blocking
/// waits go to the front.
#[derive(Debug, Default)]
pub struct DeferredQueue {
    messages: VecDeque<Message>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        if message.is_blocking_wait() {
            self.messages.push_front(message);
        } else {
            self.messages.push_back(message);
        }
    }

    pub fn push_front(&mut self, message: Message) {
        self.messages.push_front(message);
    }

    pub fn front(&self) -> Option<&Message> {
        self.messages.front()
    }

    pub fn pop_front(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
