use std::sync::atomic::{AtomicBool, Ordering};

/// Cross-channel signal asking sibling channels to yield.
///
/// Only the owning channel's filter writes it; any number of stubs on other
/// channels read it.
#[derive(Debug, Default)]
pub struct PreemptionFlag {
    flag: AtomicBool,
}

impl PreemptionFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
