//! SPI transaction engine
//!
//! One [`SpiChannel`] record exists per configured SPI instance and one
//! [`SpiUser`] per attached chip-select. Users share the channel through a
//! single-owner bus lock: a transfer takes the lock, the interrupt or DMA
//! completion path invokes the user's callback and then drops the lock.
//!
//! Transfers are asynchronous. `read_block`, `write_block` and
//! `read_write_block` return as soon as the first byte is on its way; the
//! callback reports the received bytes and the transferred count.

pub mod arbiter;
pub mod baud;
pub mod channel;
pub mod transfer;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use chorus_hal::gpio::{PinId, Port};
pub use chorus_hal::spi::Mode;

pub use baud::SpiTiming;
pub use channel::{SpiChannel, SpiUser};

use crate::error::SpiError;
use crate::registry::Handle;

/// Maximum configured SPI channels
pub const MAX_SPI_CHANNELS: usize = 4;

/// Maximum attached SPI users across all channels
pub const MAX_SPI_USERS: usize = 8;

/// Maximum bytes in one block transfer
pub const MAX_TRANSFER_LEN: usize = 256;

/// Byte clocked out when the caller supplied no transmit data
pub const FILLER: u8 = 0xFF;

/// Handle to a configured SPI channel
pub type SpiChannelHandle = Handle<SpiChannel>;

/// Handle to an attached SPI user
pub type SpiUserHandle = Handle<SpiUser>;

/// Completion callback: received bytes (empty when receive was not
/// requested) and the number of bytes exchanged
pub type SpiCallback = fn(rx: &[u8], count: u16);

/// SPI instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SpiId {
    Spi1,
    Spi2,
    Spi3,
    Spi4,
}

impl SpiId {
    /// Zero-based instance index
    pub const fn index(self) -> usize {
        match self {
            SpiId::Spi1 => 0,
            SpiId::Spi2 => 1,
            SpiId::Spi3 => 2,
            SpiId::Spi4 => 3,
        }
    }

    /// Look up an instance by index, as found in stored configuration
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(SpiId::Spi1),
            1 => Some(SpiId::Spi2),
            2 => Some(SpiId::Spi3),
            3 => Some(SpiId::Spi4),
            _ => None,
        }
    }
}

/// Which side of the bus drives the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Role {
    #[default]
    Master,
    Slave,
}

/// Bit order on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BitOrder {
    LsbFirst,
    #[default]
    MsbFirst,
}

/// Manual chip-select command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChipSelect {
    /// Drive chip-select low and hold the bus
    Assert,
    /// Drive chip-select high and release the bus
    Deassert,
}

/// SPI channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpiConfig {
    /// Clock polarity and phase
    pub mode: Mode,
    /// Master or slave
    pub role: Role,
    /// Bit order
    pub order: BitOrder,
    /// Requested clock frequency in Hz
    pub baud: u32,
    /// Move blocks with DMA instead of per-byte interrupts
    pub dma: bool,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Mode0,
            role: Role::Master,
            order: BitOrder::MsbFirst,
            baud: 1_000_000, // 1 MHz
            dma: false,
        }
    }
}

impl SpiConfig {
    /// Build a configuration from the numeric values of the byte-level API
    ///
    /// Role is 0 for master and 1 for slave; order is 0 for LSB first and 1
    /// for MSB first.
    pub fn from_raw(
        mode: u8,
        role: u8,
        order: u8,
        baud: u32,
        dma: bool,
    ) -> Result<Self, SpiError> {
        let mode = Mode::from_bits(mode).ok_or(SpiError::InvalidMode)?;
        let role = match role {
            0 => Role::Master,
            1 => Role::Slave,
            _ => return Err(SpiError::InvalidOp),
        };
        let order = match order {
            0 => BitOrder::LsbFirst,
            1 => BitOrder::MsbFirst,
            _ => return Err(SpiError::InvalidOrder),
        };
        Ok(Self {
            mode,
            role,
            order,
            baud,
            dma,
        })
    }
}

/// Chip-select location from numeric port and pin indices
pub fn chip_select_pin(port: u8, pin: u8) -> Result<PinId, SpiError> {
    let port = Port::from_index(port).ok_or(SpiError::InvalidPort)?;
    PinId::new(port, pin).ok_or(SpiError::InvalidPin)
}
