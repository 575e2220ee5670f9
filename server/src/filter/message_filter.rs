use std::{collections::VecDeque, sync::Arc, time::Instant};

use log::{info, warn};
use smol::channel::Sender;

use cmdchan_shared::{
    ChannelId, Clock, Message, MessageKind, MessageNumber, PreemptionFlag, PreemptionTiming,
    Reply, SyncPointManager, SyncPointToken,
};

use crate::{
    filter::preemption::{PreemptionEvent, PreemptionState, PreemptionStateMachine},
    tasks::{FilterTask, ProcessingTask},
    transport::ReplySender,
};

// a zero-length timing configuration could otherwise re-arm forever
const MAX_TIMER_FIRINGS_PER_PUMP: usize = 16;

/// A message forwarded to the channel and not yet reported as processed.
#[derive(Clone, Copy, Debug)]
struct PendingMessage {
    message_number: MessageNumber,
    time_received: Instant,
}

/// Sees every inbound message on the transport context before the channel
/// does, answers sync point requests on the spot and runs the preemption
/// state machine.
pub struct MessageFilter {
    channel_id: ChannelId,
    sync_point_manager: Arc<SyncPointManager>,
    clock: Arc<dyn Clock>,
    reply_sender: Box<dyn ReplySender>,
    processing_tasks: Sender<ProcessingTask>,
    messages_forwarded_to_channel: MessageNumber,
    pending_messages: VecDeque<PendingMessage>,
    preemption: PreemptionStateMachine,
}

impl MessageFilter {
    pub fn new(
        channel_id: ChannelId,
        timing: PreemptionTiming,
        sync_point_manager: Arc<SyncPointManager>,
        clock: Arc<dyn Clock>,
        reply_sender: Box<dyn ReplySender>,
        processing_tasks: Sender<ProcessingTask>,
    ) -> Self {
        Self {
            channel_id,
            sync_point_manager,
            clock,
            reply_sender,
            processing_tasks,
            messages_forwarded_to_channel: 0,
            pending_messages: VecDeque::new(),
            preemption: PreemptionStateMachine::new(channel_id, timing),
        }
    }

    /// Returns true if the filter consumed the message; false means the
    /// channel must dispatch it.
    pub fn on_message_received(&mut self, message: &Message) -> bool {
        if message.is_service_internal() {
            warn!(
                "{}: rejected {} on route {}, clients may not send it",
                self.channel_id,
                message.kind().name(),
                message.route_id()
            );
            return true;
        }

        if let MessageKind::InsertSyncPoint = message.kind() {
            self.insert_sync_point(message);
            return true;
        }

        self.message_forwarded();
        false
    }

    /// The channel has finished `messages_processed` messages in total.
    pub fn message_processed(&mut self, messages_processed: MessageNumber) {
        while let Some(pending) = self.pending_messages.front() {
            if pending.message_number > messages_processed {
                break;
            }
            self.pending_messages.pop_front();
        }
        self.update_preemption_state(PreemptionEvent::MessagesProcessed);
    }

    pub fn set_preempting_flag_and_scheduling_state(
        &mut self,
        flag: Arc<PreemptionFlag>,
        a_stub_is_descheduled: bool,
    ) {
        self.preemption.attach_flag(flag, a_stub_is_descheduled);
    }

    pub fn update_stub_scheduling_state(&mut self, a_stub_is_descheduled: bool) {
        self.update_preemption_state(PreemptionEvent::StubSchedulingChanged {
            a_stub_is_descheduled,
        });
    }

    pub fn handle_task(&mut self, task: FilterTask) {
        if self.detach_if_channel_closed() {
            return;
        }
        match task {
            FilterTask::MessageProcessed(messages_processed) => {
                self.message_processed(messages_processed)
            }
            FilterTask::SetPreemptingFlag {
                flag,
                a_stub_is_descheduled,
            } => self.set_preempting_flag_and_scheduling_state(flag, a_stub_is_descheduled),
            FilterTask::UpdateStubSchedulingState {
                a_stub_is_descheduled,
            } => self.update_stub_scheduling_state(a_stub_is_descheduled),
        }
    }

    /// Fires the preemption timer if its deadline has passed. Returns the
    /// number of expirations handled.
    pub fn fire_timers(&mut self) -> usize {
        if self.detach_if_channel_closed() {
            return 0;
        }
        let mut fired = 0;
        while fired < MAX_TIMER_FIRINGS_PER_PUMP {
            let Some(deadline) = self.preemption.next_deadline() else {
                break;
            };
            if deadline > self.clock.now() {
                break;
            }
            self.update_preemption_state(PreemptionEvent::TimerExpired);
            fired += 1;
        }
        fired
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn preemption_state(&self) -> PreemptionState {
        self.preemption.state()
    }

    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.preemption.next_deadline()
    }

    pub fn messages_forwarded_to_channel(&self) -> MessageNumber {
        self.messages_forwarded_to_channel
    }

    pub fn pending_len(&self) -> usize {
        self.pending_messages.len()
    }

    fn insert_sync_point(&mut self, message: &Message) {
        let route_id = message.route_id();
        let sync_point = SyncPointToken::generate(&self.sync_point_manager);
        let reply = Reply::SyncPointInserted {
            route_id,
            request_id: message.request_id(),
            sync_point: sync_point.id(),
        };
        if self.reply_sender.send(reply).is_err() {
            warn!(
                "{}: could not reply with sync point {}, transport is disconnected",
                self.channel_id,
                sync_point.id()
            );
        }

        // the channel processes exactly one message for this request
        self.message_forwarded();

        let task = ProcessingTask::InsertSyncPoint {
            route_id,
            sync_point,
        };
        if let Err(err) = self.processing_tasks.try_send(task) {
            warn!(
                "{}: processing context is gone, retiring sync point immediately",
                self.channel_id
            );
            // the token inside the rejected task retires on drop
            drop(err);
        }
    }

    /// The channel behind this filter is gone: nothing pending will ever be
    /// processed, so stop tracking it and release the preempting flag.
    pub fn detach(&mut self) {
        if self.preemption.has_flag() || !self.pending_messages.is_empty() {
            info!(
                "{}: channel closed, dropping {} pending messages and the preempting flag",
                self.channel_id,
                self.pending_messages.len()
            );
        }
        self.pending_messages.clear();
        self.preemption.detach_flag();
    }

    pub fn is_channel_closed(&self) -> bool {
        self.processing_tasks.is_closed()
    }

    fn detach_if_channel_closed(&mut self) -> bool {
        if !self.is_channel_closed() {
            return false;
        }
        self.detach();
        true
    }

    fn message_forwarded(&mut self) {
        self.messages_forwarded_to_channel += 1;
        if self.detach_if_channel_closed() {
            return;
        }
        if self.preemption.has_flag() {
            self.pending_messages.push_back(PendingMessage {
                message_number: self.messages_forwarded_to_channel,
                time_received: self.clock.now(),
            });
            self.update_preemption_state(PreemptionEvent::MessageArrived);
        }
    }

    fn update_preemption_state(&mut self, event: PreemptionEvent) {
        let now = self.clock.now();
        let oldest_pending = self
            .pending_messages
            .front()
            .map(|pending| pending.time_received);
        self.preemption.transition(event, now, oldest_pending);
    }
}
