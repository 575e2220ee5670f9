use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use log::trace;

use cmdchan_shared::{ChannelId, PreemptionFlag, PreemptionTiming};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreemptionState {
    /// Nothing pending, or no flag attached.
    Idle,
    /// Messages are pending; waiting one `wait` period before looking at them.
    Waiting,
    /// Measuring how long the oldest pending message has been waiting.
    Checking,
    /// The flag is set and sibling channels yield.
    Preempting,
    /// Would preempt, but a stub on this channel cannot make progress.
    WouldPreemptDescheduled,
}

/// The only inputs that move the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreemptionEvent {
    MessageArrived,
    MessagesProcessed,
    StubSchedulingChanged { a_stub_is_descheduled: bool },
    TimerExpired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimerAction {
    TransitionToChecking,
    Recheck,
    TransitionToIdle,
}

#[derive(Clone, Copy, Debug)]
struct Timer {
    deadline: Instant,
    action: TimerAction,
}

/// Decides when a channel should ask its siblings to yield.
///
/// The machine owns a single one-shot timer, modelled as a deadline; the
/// caller reports expiry with [`PreemptionEvent::TimerExpired`]. Time is
/// always passed in, so every transition can be driven without a real clock.
pub struct PreemptionStateMachine {
    channel_id: ChannelId,
    timing: PreemptionTiming,
    state: PreemptionState,
    flag: Option<Arc<PreemptionFlag>>,
    a_stub_is_descheduled: bool,
    timer: Option<Timer>,
    max_preemption_time: Duration,
}

impl PreemptionStateMachine {
    pub fn new(channel_id: ChannelId, timing: PreemptionTiming) -> Self {
        Self {
            channel_id,
            timing,
            state: PreemptionState::Idle,
            flag: None,
            a_stub_is_descheduled: false,
            timer: None,
            max_preemption_time: timing.max_preempt,
        }
    }

    /// Attaches the flag this machine drives. Does not re-evaluate: nothing
    /// can be pending before a flag exists.
    pub fn attach_flag(&mut self, flag: Arc<PreemptionFlag>, a_stub_is_descheduled: bool) {
        self.flag = Some(flag);
        self.a_stub_is_descheduled = a_stub_is_descheduled;
    }

    /// Drops the flag, leaving it reset, and goes back to IDLE. Nothing moves
    /// the machine again until a new flag is attached.
    pub fn detach_flag(&mut self) {
        if let Some(flag) = self.flag.take() {
            flag.reset();
        }
        self.timer = None;
        self.a_stub_is_descheduled = false;
        self.max_preemption_time = self.timing.max_preempt;
        if self.state != PreemptionState::Idle {
            self.set_state(PreemptionState::Idle);
        }
    }

    pub fn has_flag(&self) -> bool {
        self.flag.is_some()
    }

    pub fn state(&self) -> PreemptionState {
        self.state
    }

    pub fn a_stub_is_descheduled(&self) -> bool {
        self.a_stub_is_descheduled
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.map(|timer| timer.deadline)
    }

    /// Preemption budget left for the next stretch in PREEMPTING.
    pub fn max_preemption_time(&self) -> Duration {
        self.max_preemption_time
    }

    /// Applies `event` at time `now`. `oldest_pending` is the receive time of
    /// the oldest message the channel has not processed yet.
    pub fn transition(
        &mut self,
        event: PreemptionEvent,
        now: Instant,
        oldest_pending: Option<Instant>,
    ) -> PreemptionState {
        match event {
            PreemptionEvent::MessageArrived | PreemptionEvent::MessagesProcessed => {
                self.update(now, oldest_pending);
            }
            PreemptionEvent::StubSchedulingChanged {
                a_stub_is_descheduled,
            } => {
                self.a_stub_is_descheduled = a_stub_is_descheduled;
                self.update(now, oldest_pending);
            }
            PreemptionEvent::TimerExpired => {
                let Some(timer) = self.timer else {
                    return self.state;
                };
                if timer.deadline > now {
                    return self.state;
                }
                self.timer = None;
                match timer.action {
                    TimerAction::TransitionToChecking => {
                        self.transition_to_checking(now, oldest_pending)
                    }
                    TimerAction::Recheck => self.update(now, oldest_pending),
                    TimerAction::TransitionToIdle => self.transition_to_idle(now, oldest_pending),
                }
            }
        }
        self.state
    }

    fn update(&mut self, now: Instant, oldest_pending: Option<Instant>) {
        match self.state {
            PreemptionState::Idle => {
                if self.flag.is_some() && oldest_pending.is_some() {
                    self.transition_to_waiting(now);
                }
            }
            PreemptionState::Waiting => {
                // the TransitionToChecking timer moves us on
            }
            PreemptionState::Checking => {
                let Some(time_received) = oldest_pending else {
                    return;
                };
                let time_elapsed = now.saturating_duration_since(time_received);
                if time_elapsed < self.timing.wait {
                    // check again once the oldest message may have gone long
                    self.arm(now + (self.timing.wait - time_elapsed), TimerAction::Recheck);
                } else if self.a_stub_is_descheduled {
                    self.transition_to_would_preempt_descheduled(now, oldest_pending);
                } else {
                    self.transition_to_preempting(now, oldest_pending);
                }
            }
            PreemptionState::Preempting => {
                if self.a_stub_is_descheduled {
                    self.transition_to_would_preempt_descheduled(now, oldest_pending);
                } else {
                    self.transition_to_idle_if_caught_up(now, oldest_pending);
                }
            }
            PreemptionState::WouldPreemptDescheduled => {
                if !self.a_stub_is_descheduled {
                    self.transition_to_preempting(now, oldest_pending);
                } else {
                    self.transition_to_idle_if_caught_up(now, oldest_pending);
                }
            }
        }
    }

    fn transition_to_idle_if_caught_up(&mut self, now: Instant, oldest_pending: Option<Instant>) {
        match oldest_pending {
            None => self.transition_to_idle(now, oldest_pending),
            Some(time_received) => {
                if now.saturating_duration_since(time_received) < self.timing.stop_threshold {
                    self.transition_to_idle(now, oldest_pending);
                }
            }
        }
    }

    fn transition_to_idle(&mut self, now: Instant, oldest_pending: Option<Instant>) {
        self.timer = None;
        self.set_state(PreemptionState::Idle);
        if let Some(flag) = &self.flag {
            flag.reset();
        }
        self.update(now, oldest_pending);
    }

    fn transition_to_waiting(&mut self, now: Instant) {
        self.set_state(PreemptionState::Waiting);
        self.arm(now + self.timing.wait, TimerAction::TransitionToChecking);
    }

    fn transition_to_checking(&mut self, now: Instant, oldest_pending: Option<Instant>) {
        self.set_state(PreemptionState::Checking);
        self.max_preemption_time = self.timing.max_preempt;
        self.update(now, oldest_pending);
    }

    fn transition_to_preempting(&mut self, now: Instant, oldest_pending: Option<Instant>) {
        // drops a pending recheck from CHECKING
        self.timer = None;
        self.set_state(PreemptionState::Preempting);
        if let Some(flag) = &self.flag {
            flag.set();
        }
        self.arm(now + self.max_preemption_time, TimerAction::TransitionToIdle);
        self.update(now, oldest_pending);
    }

    fn transition_to_would_preempt_descheduled(
        &mut self,
        now: Instant,
        oldest_pending: Option<Instant>,
    ) {
        if self.state == PreemptionState::Preempting {
            // carry whatever is left of the preemption budget
            let remaining = self
                .timer
                .take()
                .and_then(|timer| timer.deadline.checked_duration_since(now));
            match remaining {
                Some(remaining) => self.max_preemption_time = remaining,
                None => {
                    self.transition_to_idle(now, oldest_pending);
                    return;
                }
            }
        } else {
            self.timer = None;
        }
        self.set_state(PreemptionState::WouldPreemptDescheduled);
        if let Some(flag) = &self.flag {
            flag.reset();
        }
        self.update(now, oldest_pending);
    }

    fn arm(&mut self, deadline: Instant, action: TimerAction) {
        self.timer = Some(Timer { deadline, action });
    }

    fn set_state(&mut self, state: PreemptionState) {
        trace!(
            "{}: preemption {:?} -> {:?}",
            self.channel_id,
            self.state,
            state
        );
        self.state = state;
    }
}
