use std::sync::Arc;

use smol::channel::Sender;

use cmdchan_shared::{
    ChannelId, Message, PreemptionFlag, RouteId, StubConfig, SyncPointId,
};

use crate::{tasks::ProcessingTask, transport::ReplySender};

/// One command-processing unit bound to a route inside a channel.
///
/// The channel only drives scheduling; executing commands is entirely up to
/// the implementation. A stub that changes its scheduling state outside of
/// [`Stub::on_message_received`] must report it through its [`StubHandle`],
/// otherwise a channel paused on it is never resumed.
pub trait Stub: Send {
    /// Handles a message addressed to this stub. Returns false if the message
    /// kind is not understood.
    fn on_message_received(&mut self, message: &Message, replies: &dyn ReplySender) -> bool;

    fn is_scheduled(&self) -> bool;

    /// True while a sibling channel asks this stub to yield.
    fn is_preempted(&self) -> bool;

    fn has_unprocessed_commands(&self) -> bool;

    /// The stub will reach `sync_point` once it has processed everything
    /// queued before it. The channel owns the sync point and retires it.
    fn add_sync_point(&mut self, sync_point: SyncPointId);

    /// The stub reached `sync_point` and the channel retired it. Anything the
    /// stub recorded in [`Stub::add_sync_point`] can be dropped.
    fn sync_point_retired(&mut self, _sync_point: SyncPointId) {}

    fn mark_context_lost(&mut self);

    fn memory_usage(&self) -> u64;

    /// Installs (or clears) the flag [`Stub::is_preempted`] should follow.
    fn set_preempt_by_flag(&mut self, flag: Option<Arc<PreemptionFlag>>);
}

/// Builds stubs for a channel's `CreateStub` requests.
pub trait StubFactory: Send {
    fn create_stub(
        &mut self,
        route_id: RouteId,
        config: &StubConfig,
        handle: StubHandle,
    ) -> Box<dyn Stub>;
}

/// Lets a stub, or anything acting for it, talk back to its channel.
#[derive(Clone, Debug)]
pub struct StubHandle {
    channel_id: ChannelId,
    route_id: RouteId,
    tasks: Sender<ProcessingTask>,
}

impl StubHandle {
    pub(crate) fn new(
        channel_id: ChannelId,
        route_id: RouteId,
        tasks: Sender<ProcessingTask>,
    ) -> Self {
        Self {
            channel_id,
            route_id,
            tasks,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn route_id(&self) -> RouteId {
        self.route_id
    }

    /// Posts a scheduling change to the channel. Returns false once the
    /// channel has been torn down.
    pub fn scheduling_changed(&self, scheduled: bool) -> bool {
        self.tasks
            .try_send(ProcessingTask::StubSchedulingChanged {
                route_id: self.route_id,
                scheduled,
            })
            .is_ok()
    }
}
