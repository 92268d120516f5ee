use crate::hal::reset::{ResetCause, ResetFlags};

pub struct FakeResetFlags {
    pub cause: ResetCause,
    pub cleared: bool,
}

impl FakeResetFlags {
    pub fn new(cause: ResetCause) -> Self { Self { cause, cleared: false } }
}

impl ResetFlags for FakeResetFlags {
    fn reset_cause(&self) -> ResetCause {
        if self.cleared {
            ResetCause::Normal
        } else {
            self.cause
        }
    }
    fn clear(&mut self) { self.cleared = true; }
}
