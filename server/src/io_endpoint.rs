use std::time::Instant;

use log::{info, warn};
use smol::{
    channel::{Receiver, Sender},
    future::{self, FutureExt},
    Timer,
};

use cmdchan_shared::{ChannelId, Message};

use crate::{
    error::ChannelError,
    filter::{MessageFilter, PreemptionState},
    tasks::{FilterTask, ProcessingTask},
};

enum IoEvent {
    Inbound(Option<Message>),
    Filter(Option<FilterTask>),
    TimerFired,
}

/// The transport-context end of one channel.
///
/// Inbound messages pass through the [`MessageFilter`] first; whatever it
/// does not handle is posted to the channel's processing context.
pub struct IoEndpoint {
    channel_id: ChannelId,
    filter: MessageFilter,
    processing_tasks: Sender<ProcessingTask>,
    filter_tasks: Receiver<FilterTask>,
}

impl IoEndpoint {
    pub(crate) fn new(
        filter: MessageFilter,
        processing_tasks: Sender<ProcessingTask>,
        filter_tasks: Receiver<FilterTask>,
    ) -> Self {
        Self {
            channel_id: filter.channel_id(),
            filter,
            processing_tasks,
            filter_tasks,
        }
    }

    /// Accepts one message from the client transport.
    pub fn receive(&mut self, message: Message) -> Result<(), ChannelError> {
        if self.filter.on_message_received(&message) {
            return Ok(());
        }
        self.processing_tasks
            .try_send(ProcessingTask::Message(message))
            .map_err(|_| ChannelError::Disconnected {
                channel_id: self.channel_id,
            })
    }

    /// Applies everything the channel has posted back and fires due
    /// preemption timers. Must be called regularly.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(task) = self.filter_tasks.try_recv() {
            self.filter.handle_task(task);
            handled += 1;
        }
        handled + self.filter.fire_timers()
    }

    /// The client transport failed; the registry removes the channel on its
    /// next pump.
    pub fn on_channel_error(&mut self) {
        if self
            .processing_tasks
            .try_send(ProcessingTask::ChannelError)
            .is_err()
        {
            info!("{}: transport error after teardown", self.channel_id);
        }
    }

    /// Serves `inbound` on the current thread until the client closes it,
    /// then reports a channel error.
    pub fn run(&mut self, inbound: Receiver<Message>) {
        let filter_tasks = self.filter_tasks.clone();
        smol::block_on(async {
            loop {
                self.pump();
                let deadline = self.next_timer_deadline();

                let event = async { IoEvent::Inbound(inbound.recv().await.ok()) }
                    .or(async { IoEvent::Filter(filter_tasks.recv().await.ok()) })
                    .or(async {
                        match deadline {
                            Some(deadline) => {
                                Timer::at(deadline).await;
                            }
                            None => future::pending::<()>().await,
                        }
                        IoEvent::TimerFired
                    })
                    .await;

                match event {
                    IoEvent::Inbound(Some(message)) => {
                        if let Err(err) = self.receive(message) {
                            warn!("{}", err);
                            break;
                        }
                    }
                    IoEvent::Inbound(None) => break,
                    IoEvent::Filter(Some(task)) => self.filter.handle_task(task),
                    IoEvent::Filter(None) => break,
                    IoEvent::TimerFired => {
                        self.filter.fire_timers();
                    }
                }
            }
        });
        self.on_channel_error();
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn filter(&self) -> &MessageFilter {
        &self.filter
    }

    pub fn preemption_state(&self) -> PreemptionState {
        self.filter.preemption_state()
    }

    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.filter.next_timer_deadline()
    }

    pub fn is_connected(&self) -> bool {
        !self.processing_tasks.is_closed()
    }
}
