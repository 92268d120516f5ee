//! Reset cause reporting.

/// Why the MCU last came out of reset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub enum ResetCause {
    /// No flag set; e.g. flags were cleared by a previous boot and a
    /// debugger reset the core.
    Normal,
    PowerOn,
    Pin,
    Software,
    WatchdogTimeout,
    WindowWatchdog,
    LowPower,
    OptionByteLoader,
}

pub trait ResetFlags {
    fn reset_cause(&self) -> ResetCause;
    /// Clears the latched flags so the next boot reports a fresh cause.
    fn clear(&mut self);
}
