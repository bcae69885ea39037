//! Bus stall detection
//!
//! Tracks the time of the last observed master bus activity. The time
//! source counts microseconds within the current second, so the elapsed
//! time is folded back into one period.

use chorus_hal::clock::USEC_PER_SECOND;

/// Time without bus activity after which the bus counts as stalled
pub const BUS_RESET_TIMEOUT_US: u32 = 500_000;

/// Result of a stall check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusHealth {
    Ok,
    Stalled,
}

/// Watchdog over master bus activity
#[derive(Debug, Clone, Default)]
pub struct StallMonitor {
    /// Microsecond timestamp of the last activity
    last_activity_us: u32,
}

impl StallMonitor {
    pub const fn new() -> Self {
        Self {
            last_activity_us: 0,
        }
    }

    /// Record bus activity at `now_us`
    pub fn touch(&mut self, now_us: u32) {
        self.last_activity_us = now_us;
    }

    pub fn last_activity(&self) -> u32 {
        self.last_activity_us
    }

    /// Microseconds since the last activity
    ///
    /// A timestamp that went backwards means the counter rolled over since
    /// the last activity, which is reported as a full timeout.
    pub fn elapsed_us(&self, now_us: u32) -> u32 {
        let mut delta = i64::from(now_us) - i64::from(self.last_activity_us);
        if delta < 0 {
            delta = i64::from(BUS_RESET_TIMEOUT_US);
        }
        if delta >= i64::from(USEC_PER_SECOND) {
            delta -= i64::from(USEC_PER_SECOND);
        }
        delta as u32
    }

    /// Check for a stall at `now_us`
    pub fn check(&self, now_us: u32) -> BusHealth {
        if self.elapsed_us(now_us) >= BUS_RESET_TIMEOUT_US {
            BusHealth::Stalled
        } else {
            BusHealth::Ok
        }
    }
}
