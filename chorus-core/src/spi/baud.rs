//! SPI clock prescaler selection
//!
//! The peripheral divides the CPU clock by 4, 16, 64 or 128, and a master
//! can double the result. The requested rate is rounded down to the nearest
//! rate the hardware produces.

use chorus_hal::spi::Prescaler;

use super::Role;
use crate::error::SpiError;

/// Prescaler setting and the rate it produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiTiming {
    pub prescaler: Prescaler,
    pub clk2x: bool,
    /// Resulting clock frequency in Hz
    pub actual: u32,
}

/// Fastest clock the role supports
pub const fn max_baud(cpu_hz: u32, role: Role) -> u32 {
    match role {
        Role::Master => cpu_hz >> 1,
        Role::Slave => cpu_hz >> 2,
    }
}

/// Slowest clock the peripheral produces
pub const fn min_baud(cpu_hz: u32) -> u32 {
    cpu_hz >> 7
}

/// Pick the prescaler for `baud`
pub fn select(cpu_hz: u32, baud: u32, role: Role) -> Result<SpiTiming, SpiError> {
    if baud < min_baud(cpu_hz) || baud > max_baud(cpu_hz, role) {
        return Err(SpiError::InvalidBaudRate);
    }

    let timing = if baud < cpu_hz >> 6 {
        SpiTiming {
            prescaler: Prescaler::Div128,
            clk2x: false,
            actual: cpu_hz >> 7,
        }
    } else if baud < cpu_hz >> 4 {
        SpiTiming {
            prescaler: Prescaler::Div64,
            clk2x: false,
            actual: cpu_hz >> 6,
        }
    } else if baud < cpu_hz >> 2 {
        SpiTiming {
            prescaler: Prescaler::Div16,
            clk2x: false,
            actual: cpu_hz >> 4,
        }
    } else if baud < cpu_hz >> 1 {
        SpiTiming {
            prescaler: Prescaler::Div4,
            clk2x: false,
            actual: cpu_hz >> 2,
        }
    } else {
        // Only reachable by a master asking for half the CPU clock.
        let master = role == Role::Master;
        SpiTiming {
            prescaler: Prescaler::Div4,
            clk2x: master,
            actual: if master { cpu_hz >> 1 } else { cpu_hz >> 2 },
        }
    };

    Ok(timing)
}
