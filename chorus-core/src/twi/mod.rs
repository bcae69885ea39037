//! TWI (I2C) transaction engine
//!
//! A TWI instance is either a master or a slave, never both, so one
//! [`TwiChannel`] record carries the state of whichever role it was
//! configured for.
//!
//! The master is software-stepped: [`BusManager::twi_master_write`] and
//! [`BusManager::twi_master_read`] arm a transaction and drive the step
//! function from the calling thread until the bus goes idle, watched by a
//! [`StallMonitor`]. A stalled bus is recovered by re-enabling the master
//! and the transaction is retried a bounded number of times. The same
//! transaction can be driven one poll at a time through
//! [`MasterTransaction`], which is how the shared bus keeps interrupts
//! running during the wait.
//!
//! The slave is interrupt-driven. Every received byte, every requested
//! byte and the final stop are reported through the channel's
//! [`TwiCallback`].
//!
//! [`BusManager::twi_master_write`]: crate::manager::BusManager::twi_master_write
//! [`BusManager::twi_master_read`]: crate::manager::BusManager::twi_master_read

pub mod channel;
pub mod master;
pub mod monitor;
pub mod slave;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use channel::TwiChannel;
pub use master::MasterTransaction;
pub use monitor::{BusHealth, StallMonitor, BUS_RESET_TIMEOUT_US};

use crate::error::TwiError;
use crate::registry::Handle;

/// Maximum requested TWI channels
pub const MAX_TWI_CHANNELS: usize = 4;

/// Highest 7-bit slave address
pub const MAX_SLAVE_ADDRESS: u8 = 127;

/// Handle to a requested TWI channel
pub type TwiHandle = Handle<TwiChannel>;

/// Slave transaction callback
///
/// Called with [`TwiStatus::SlaveWrite`] and each byte the master wrote,
/// with [`TwiStatus::SlaveRead`] when the master wants a byte (the return
/// value is sent), and with [`TwiStatus::TransComplete`] on stop. Bus
/// errors and collisions are reported with their status. The return value
/// is ignored except for `SlaveRead`.
pub type TwiCallback = fn(status: TwiStatus, data: u8) -> u8;

/// TWI instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TwiId {
    Twi1,
    Twi2,
    Twi3,
    Twi4,
}

impl TwiId {
    /// Zero-based instance index
    pub const fn index(self) -> usize {
        match self {
            TwiId::Twi1 => 0,
            TwiId::Twi2 => 1,
            TwiId::Twi3 => 2,
            TwiId::Twi4 => 3,
        }
    }

    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(TwiId::Twi1),
            1 => Some(TwiId::Twi2),
            2 => Some(TwiId::Twi3),
            3 => Some(TwiId::Twi4),
            _ => None,
        }
    }
}

/// Role a TWI channel is configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TwiRole {
    Master,
    Slave,
}

impl TwiRole {
    /// Decode the byte-level role value (0 master, 1 slave)
    pub const fn from_raw(role: u8) -> Result<Self, TwiError> {
        match role {
            0 => Ok(TwiRole::Master),
            1 => Ok(TwiRole::Slave),
            _ => Err(TwiError::InvalidMode),
        }
    }
}

/// Transaction status of a TWI channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TwiStatus {
    Idle,
    TransactionBusy,
    NackReceived,
    BusError,
    ArbLost,
    TransComplete,
    BusBusy,
    /// Master wrote a byte to this slave
    SlaveWrite,
    /// Master is reading a byte from this slave
    SlaveRead,
    Collision,
    /// Bus stalled and the master was reset
    BusLocked,
    Unknown,
}

/// TWI channel configuration
#[derive(Debug, Clone, Copy)]
pub struct TwiConfig {
    pub role: TwiRole,
    /// Master bus frequency in Hz
    pub baud: u32,
    /// 7-bit slave address
    pub address: u8,
    /// Slave transaction callback
    pub callback: Option<TwiCallback>,
}

impl TwiConfig {
    /// Master at `baud` Hz
    pub const fn master(baud: u32) -> Self {
        Self {
            role: TwiRole::Master,
            baud,
            address: 0,
            callback: None,
        }
    }

    /// Slave answering on `address`
    pub const fn slave(address: u8, callback: Option<TwiCallback>) -> Self {
        Self {
            role: TwiRole::Slave,
            baud: 0,
            address,
            callback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_raw() {
        assert_eq!(TwiRole::from_raw(0), Ok(TwiRole::Master));
        assert_eq!(TwiRole::from_raw(1), Ok(TwiRole::Slave));
        assert_eq!(TwiRole::from_raw(2), Err(TwiError::InvalidMode));
    }

    #[test]
    fn test_slave_config_has_no_baud() {
        let config = TwiConfig::slave(0x42, None);
        assert_eq!(config.role, TwiRole::Slave);
        assert_eq!(config.baud, 0);
        assert!(config.callback.is_none());
    }
}
