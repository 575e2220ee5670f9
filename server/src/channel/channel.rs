use std::sync::Arc;

use log::{debug, info, warn};
use smol::channel::{Receiver, Sender};

use cmdchan_shared::{
    ChannelId, ClientId, Message, MessageKind, MessageNumber, PreemptionFlag, Reply, RouteId,
    StubConfig, SyncPointToken, CONTROL_ROUTE_ID,
};

use crate::{
    channel::{channel_config::ChannelConfig, deferred_queue::DeferredQueue, route_table::RouteTable},
    error::ChannelError,
    stub::{Stub, StubFactory, StubHandle},
    tasks::{FilterTask, ProcessingTask},
    transport::ReplySender,
};

/// Per-client scheduling and routing unit, owned by the processing context.
///
/// Every message the filter forwards lands in the deferred queue; dispatch
/// happens in passes posted as [`ProcessingTask::HandleMessages`], never
/// inline, so one busy channel cannot monopolize the processing context.
pub struct Channel {
    channel_id: ChannelId,
    client_id: ClientId,
    config: ChannelConfig,
    stub_factory: Box<dyn StubFactory>,
    reply_sender: Box<dyn ReplySender>,
    stubs: RouteTable,
    deferred_messages: DeferredQueue,
    tasks: Sender<ProcessingTask>,
    inbox: Receiver<ProcessingTask>,
    filter_tasks: Sender<FilterTask>,
    handle_messages_scheduled: bool,
    messages_processed: MessageNumber,
    num_stubs_descheduled: usize,
    // drives this channel's filter; other channels' stubs read it
    preempting_flag: Option<Arc<PreemptionFlag>>,
    // set by another channel; read by this channel's stubs
    preempted_flag: Option<Arc<PreemptionFlag>>,
    errored: bool,
    destroyed: bool,
}

impl Channel {
    pub fn new(
        channel_id: ChannelId,
        client_id: ClientId,
        config: ChannelConfig,
        stub_factory: Box<dyn StubFactory>,
        reply_sender: Box<dyn ReplySender>,
        tasks: (Sender<ProcessingTask>, Receiver<ProcessingTask>),
        filter_tasks: Sender<FilterTask>,
    ) -> Self {
        let (tasks, inbox) = tasks;
        Self {
            channel_id,
            client_id,
            config,
            stub_factory,
            reply_sender,
            stubs: RouteTable::new(),
            deferred_messages: DeferredQueue::new(),
            tasks,
            inbox,
            filter_tasks,
            handle_messages_scheduled: false,
            messages_processed: 0,
            num_stubs_descheduled: 0,
            preempting_flag: None,
            preempted_flag: None,
            errored: false,
            destroyed: false,
        }
    }

    /// Runs the tasks queued when the call starts. Tasks they post wait for
    /// the next call. Returns how many tasks ran.
    pub fn run_pending_tasks(&mut self) -> usize {
        if self.destroyed {
            return 0;
        }
        let budget = self.inbox.len();
        let mut ran = 0;
        while ran < budget {
            let Ok(task) = self.inbox.try_recv() else {
                break;
            };
            ran += 1;
            self.run_task(task);
        }
        ran
    }

    pub fn run_task(&mut self, task: ProcessingTask) {
        match task {
            ProcessingTask::Message(message) => self.on_message_arrived(message),
            ProcessingTask::InsertSyncPoint {
                route_id,
                sync_point,
            } => self.insert_sync_point(route_id, sync_point),
            ProcessingTask::HandleMessages => self.handle_message(),
            ProcessingTask::StubSchedulingChanged {
                route_id,
                scheduled,
            } => self.stub_scheduling_changed(route_id, scheduled),
            ProcessingTask::ChannelError => self.on_channel_error(),
        }
    }

    // Incoming messages

    pub fn on_message_arrived(&mut self, message: Message) {
        if self.config.log_messages {
            debug!(
                "{}: received {} on route {}",
                self.channel_id,
                message.kind().name(),
                message.route_id()
            );
        }
        self.deferred_messages.push(message);
        self.on_scheduled();
    }

    /// Posts a dispatch pass unless one is already pending. The deferred
    /// queue is left untouched, so later arrivals keep queueing behind it.
    fn on_scheduled(&mut self) {
        if self.handle_messages_scheduled || self.destroyed {
            return;
        }
        if self.tasks.try_send(ProcessingTask::HandleMessages).is_ok() {
            self.handle_messages_scheduled = true;
        }
    }

    /// One dispatch pass over the head of the deferred queue.
    pub fn handle_message(&mut self) {
        self.handle_messages_scheduled = false;
        let mut fast_tracked = 0;

        loop {
            let Some(route_id) = self.deferred_messages.front().map(Message::route_id) else {
                return;
            };

            if let Some(entry) = self.stubs.get(route_id) {
                if !entry.stub.is_scheduled() {
                    // resumed by stub_scheduling_changed(route_id, true)
                    self.stub_scheduling_changed(route_id, false);
                    return;
                }
                if entry.stub.is_preempted() {
                    self.on_scheduled();
                    return;
                }
            }

            let Some(message) = self.deferred_messages.pop_front() else {
                return;
            };
            if self.dispatch(message) {
                self.message_processed();
            }

            // keep going while the next message is an acknowledgment the
            // same stub can take right now
            if !self.should_fast_track(route_id, fast_tracked) {
                break;
            }
            fast_tracked += 1;
        }

        if !self.deferred_messages.is_empty() {
            self.on_scheduled();
        }
    }

    fn should_fast_track(&self, dispatched_route: RouteId, fast_tracked: usize) -> bool {
        if !self.config.fast_track_acks || fast_tracked >= self.config.max_fast_track_run {
            return false;
        }
        let Some(next) = self.deferred_messages.front() else {
            return false;
        };
        next.is_ack()
            && next.route_id() == dispatched_route
            && self
                .stubs
                .get(dispatched_route)
                .map_or(false, |entry| entry.stub.is_scheduled())
    }

    /// Routes one message. Returns false when the message's completion is
    /// handed to a synthesized `Rescheduled` message instead.
    fn dispatch(&mut self, message: Message) -> bool {
        let route_id = message.route_id();
        let handled = if message.is_control() {
            self.on_control_message_received(&message)
        } else {
            match self.stubs.get_mut(route_id) {
                Some(entry) => match message.kind() {
                    MessageKind::RetireSyncPoint(sync_point) => {
                        entry.complete_sync_point(*sync_point);
                        true
                    }
                    _ => entry
                        .stub
                        .on_message_received(&message, self.reply_sender.as_ref()),
                },
                None => false,
            }
        };

        if !handled {
            match message.request_id() {
                Some(request_id) => {
                    // the sender is blocked on this reply
                    self.send(Reply::Error {
                        route_id,
                        request_id,
                    });
                }
                None if message.is_service_internal() => {
                    debug!(
                        "{}: dropped {} for departed route {}",
                        self.channel_id,
                        message.kind().name(),
                        route_id
                    );
                }
                None => {
                    warn!(
                        "{}: dropped {} for route {}, no stub handled it",
                        self.channel_id,
                        message.kind().name(),
                        route_id
                    );
                }
            }
            return true;
        }

        if message.is_control() {
            return true;
        }

        let Some(scheduled) = self.stubs.get(route_id).map(|entry| entry.stub.is_scheduled())
        else {
            return true;
        };
        self.stub_scheduling_changed(route_id, scheduled);

        let has_unprocessed_commands = self
            .stubs
            .get(route_id)
            .map_or(false, |entry| entry.stub.has_unprocessed_commands());
        if has_unprocessed_commands {
            self.deferred_messages
                .push_front(Message::rescheduled(route_id));
            return false;
        }
        true
    }

    fn on_control_message_received(&mut self, message: &Message) -> bool {
        match message.kind() {
            MessageKind::CreateStub { route_id, config } => {
                let result = self.create_stub(*route_id, config.clone());
                if let Err(err) = &result {
                    warn!("{}: {}", self.channel_id, err);
                }
                if let Some(request_id) = message.request_id() {
                    self.send(Reply::StubCreated {
                        route_id: *route_id,
                        request_id,
                        succeeded: result.is_ok(),
                    });
                }
                true
            }
            MessageKind::DestroyStub { route_id } => {
                if let Err(err) = self.destroy_stub(*route_id) {
                    warn!("{}: {}", self.channel_id, err);
                }
                if let Some(request_id) = message.request_id() {
                    self.send(Reply::StubDestroyed {
                        route_id: *route_id,
                        request_id,
                    });
                }
                true
            }
            other => {
                warn!(
                    "{}: unexpected control message {}",
                    self.channel_id,
                    other.name()
                );
                false
            }
        }
    }

    fn message_processed(&mut self) {
        self.messages_processed += 1;
        if self.preempting_flag.is_some() {
            self.post_to_filter(FilterTask::MessageProcessed(self.messages_processed));
        }
    }

    // Scheduling

    pub fn stub_scheduling_changed(&mut self, route_id: RouteId, scheduled: bool) {
        let a_stub_was_descheduled = self.num_stubs_descheduled > 0;
        {
            let Some(entry) = self.stubs.get_mut(route_id) else {
                return;
            };
            if entry.descheduled != scheduled {
                // already accounted for
                return;
            }
            entry.descheduled = !scheduled;
        }

        if scheduled {
            self.num_stubs_descheduled -= 1;
            self.on_scheduled();
        } else {
            self.num_stubs_descheduled += 1;
        }
        debug_assert!(self.num_stubs_descheduled <= self.stubs.len());

        let a_stub_is_descheduled = self.num_stubs_descheduled > 0;
        if a_stub_is_descheduled != a_stub_was_descheduled && self.preempting_flag.is_some() {
            self.post_to_filter(FilterTask::UpdateStubSchedulingState {
                a_stub_is_descheduled,
            });
        }
    }

    /// Returns the flag this channel's filter drives, creating it on first
    /// use and handing it to the filter.
    pub fn preempting_flag(&mut self) -> Arc<PreemptionFlag> {
        if let Some(flag) = &self.preempting_flag {
            return flag.clone();
        }
        let flag = Arc::new(PreemptionFlag::new());
        self.preempting_flag = Some(flag.clone());
        self.post_to_filter(FilterTask::SetPreemptingFlag {
            flag: flag.clone(),
            a_stub_is_descheduled: self.num_stubs_descheduled > 0,
        });
        flag
    }

    /// Makes every stub on this channel, current and future, yield while
    /// `flag` is set.
    pub fn set_preempt_by_flag(&mut self, flag: Option<Arc<PreemptionFlag>>) {
        self.preempted_flag = flag;
        for entry in self.stubs.entries_mut() {
            entry.stub.set_preempt_by_flag(self.preempted_flag.clone());
        }
    }

    // Stubs

    pub fn create_stub(
        &mut self,
        route_id: RouteId,
        config: StubConfig,
    ) -> Result<StubHandle, ChannelError> {
        if route_id == CONTROL_ROUTE_ID {
            return Err(ChannelError::ReservedRoute { route_id });
        }
        if self.stubs.contains(route_id) {
            return Err(ChannelError::RouteConflict { route_id });
        }

        let handle = StubHandle::new(self.channel_id, route_id, self.tasks.clone());
        let mut stub = self
            .stub_factory
            .create_stub(route_id, &config, handle.clone());
        if let Some(flag) = &self.preempted_flag {
            stub.set_preempt_by_flag(Some(flag.clone()));
        }
        let scheduled = stub.is_scheduled();
        self.stubs.insert(route_id, stub)?;
        info!(
            "{}: created stub on route {} ({})",
            self.channel_id, route_id, config.label
        );

        if !scheduled {
            self.stub_scheduling_changed(route_id, false);
        }
        Ok(handle)
    }

    pub fn destroy_stub(&mut self, route_id: RouteId) -> Result<(), ChannelError> {
        let Some(entry) = self.stubs.get(route_id) else {
            return Err(ChannelError::UnknownRoute { route_id });
        };
        if entry.descheduled {
            // a dispatch pass may be parked on this stub; it will never
            // reschedule itself now
            self.stub_scheduling_changed(route_id, true);
        }
        if let Some(entry) = self.stubs.remove(route_id) {
            let retired = entry.pending_sync_points();
            drop(entry);
            info!(
                "{}: destroyed stub on route {}, retired {} sync points",
                self.channel_id, route_id, retired
            );
        }
        Ok(())
    }

    /// Binds a sync point issued by the filter to the stub at `route_id`.
    /// Whatever happens, the sync point is retired exactly once.
    pub fn insert_sync_point(&mut self, route_id: RouteId, sync_point: SyncPointToken) {
        if self.destroyed {
            // dropping the token retires it
            return;
        }
        match self.stubs.get_mut(route_id) {
            Some(entry) => {
                let id = sync_point.id();
                entry.stub.add_sync_point(id);
                entry.bind_sync_point(sync_point);
                self.on_message_arrived(Message::retire_sync_point(route_id, id));
            }
            None => {
                warn!(
                    "{}: no stub on route {} for sync point {}, retiring it now",
                    self.channel_id,
                    route_id,
                    sync_point.id()
                );
                if let Err(err) = sync_point.retire() {
                    warn!("{}: {}", self.channel_id, err);
                }
                // the filter counted this request as forwarded
                self.message_processed();
            }
        }
    }

    pub fn lookup_stub(&self, route_id: RouteId) -> Option<&dyn Stub> {
        self.stubs.get(route_id).map(|entry| entry.stub.as_ref())
    }

    pub fn memory_usage(&self) -> u64 {
        self.stubs
            .entries()
            .map(|entry| entry.stub.memory_usage())
            .sum()
    }

    pub fn lose_all_contexts(&mut self) {
        for entry in self.stubs.entries_mut() {
            entry.stub.mark_context_lost();
        }
        info!("{}: marked {} contexts lost", self.channel_id, self.stubs.len());
    }

    // Outgoing

    /// Sends a reply to the client. Returns false if the transport is gone.
    pub fn send(&self, reply: Reply) -> bool {
        if self.destroyed {
            return false;
        }
        match self.reply_sender.send(reply) {
            Ok(()) => true,
            Err(err) => {
                warn!("{}: {}", self.channel_id, err);
                false
            }
        }
    }

    fn post_to_filter(&self, task: FilterTask) {
        if self.filter_tasks.try_send(task).is_err() {
            debug!("{}: filter is gone", self.channel_id);
        }
    }

    // Lifecycle

    fn on_channel_error(&mut self) {
        warn!("{}: transport failed", self.channel_id);
        self.errored = true;
    }

    /// Releases every stub and queued task. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        // nothing can be posted after close; whatever is already queued is
        // dropped here, which retires any sync point tokens inside it
        self.inbox.close();
        while let Ok(task) = self.inbox.try_recv() {
            drop(task);
        }

        self.deferred_messages.clear();
        self.stubs.clear();
        self.num_stubs_descheduled = 0;
        self.handle_messages_scheduled = false;

        if let Some(flag) = &self.preempting_flag {
            flag.reset();
        }
        info!("{}: destroyed", self.channel_id);
    }

    // Introspection

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn messages_processed(&self) -> MessageNumber {
        self.messages_processed
    }

    pub fn num_stubs_descheduled(&self) -> usize {
        self.num_stubs_descheduled
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred_messages.len()
    }

    pub fn stub_count(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_handle_messages_scheduled(&self) -> bool {
        self.handle_messages_scheduled
    }

    pub fn is_errored(&self) -> bool {
        self.errored
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.destroy();
    }
}
