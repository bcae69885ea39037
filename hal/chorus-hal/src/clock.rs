//! Clock and timestamp sources

/// Core clock frequency query
pub trait SystemClock {
    /// Current CPU clock frequency in Hz
    fn cpu_frequency(&self) -> u32;
}

/// Microseconds within the current second
///
/// The system timer counts microseconds up to one second and then rolls
/// back to zero, so values are always in `0..USEC_PER_SECOND`.
pub trait MicrosecondClock {
    /// Read the current microsecond count
    fn now_us(&mut self) -> u32;
}

/// Rollover period of [`MicrosecondClock::now_us`]
pub const USEC_PER_SECOND: u32 = 1_000_000;
