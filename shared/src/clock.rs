use std::time::Instant;

/// Source of monotonic time for timestamps and timer deadlines.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Reads the operating system's monotonic clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
