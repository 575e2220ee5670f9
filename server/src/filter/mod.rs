mod message_filter;
mod preemption;

pub use message_filter::MessageFilter;
pub use preemption::{PreemptionEvent, PreemptionState, PreemptionStateMachine};
