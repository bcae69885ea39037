//! Board bus configuration
//!
//! Describes which SPI and TWI channels a board brings up at startup. The
//! description is stored as postcard binary data and applied in one call
//! with [`BusManager::apply`].

use heapless::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use chorus_hal::Board;

use crate::error::{SpiError, TwiError};
use crate::manager::BusManager;
use crate::spi::{SpiChannelHandle, SpiConfig, SpiId, MAX_SPI_CHANNELS};
use crate::twi::{TwiConfig, TwiHandle, TwiId, TwiRole, MAX_TWI_CHANNELS};

/// One SPI channel to configure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpiEntry {
    /// Zero-based SPI instance
    pub id: u8,
    pub config: SpiConfig,
}

/// One TWI channel to request and configure
///
/// Slave callbacks are code, not data: a slave comes up without one and
/// gets its callback from a later [`BusManager::configure_twi`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TwiEntry {
    /// Zero-based TWI instance
    pub id: u8,
    pub role: TwiRole,
    /// Master bus frequency in Hz
    pub baud: u32,
    /// 7-bit slave address
    pub address: u8,
}

impl TwiEntry {
    fn to_config(self) -> TwiConfig {
        match self.role {
            TwiRole::Master => TwiConfig::master(self.baud),
            TwiRole::Slave => TwiConfig::slave(self.address, None),
        }
    }
}

/// Bus channels of a board
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoardConfig {
    pub spi: Vec<SpiEntry, MAX_SPI_CHANNELS>,
    pub twi: Vec<TwiEntry, MAX_TWI_CHANNELS>,
}

/// Configuration load or apply errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Stored data is not a valid configuration
    Deserialize,
    /// Output buffer too small
    Serialize,
    /// SPI entry at `index` was rejected
    Spi { index: usize, error: SpiError },
    /// TWI entry at `index` was rejected
    Twi { index: usize, error: TwiError },
}

#[cfg(feature = "serde")]
impl BoardConfig {
    /// Decode a postcard-encoded configuration
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        postcard::from_bytes(bytes).map_err(|_| ConfigError::Deserialize)
    }

    /// Encode into `buf`, returning the used part
    pub fn to_slice<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8], ConfigError> {
        postcard::to_slice(self, buf).map_err(|_| ConfigError::Serialize)
    }
}

/// Handles of the channels a configuration brought up, in entry order
#[derive(Debug, Default)]
pub struct AppliedConfig {
    pub spi: Vec<SpiChannelHandle, MAX_SPI_CHANNELS>,
    pub twi: Vec<TwiHandle, MAX_TWI_CHANNELS>,
}

impl<B: Board> BusManager<B> {
    /// Bring up every channel in `config`
    ///
    /// Stops at the first rejected entry; channels configured before it stay
    /// configured.
    pub fn apply(&mut self, config: &BoardConfig) -> Result<AppliedConfig, ConfigError> {
        let mut applied = AppliedConfig::default();

        for (index, entry) in config.spi.iter().enumerate() {
            let spi = |error| ConfigError::Spi { index, error };
            let id = SpiId::from_index(entry.id).ok_or(spi(SpiError::InvalidModule))?;
            let handle = self.configure_spi(id, entry.config).map_err(spi)?;
            applied
                .spi
                .push(handle)
                .map_err(|_| spi(SpiError::OutOfHeap))?;
        }

        for (index, entry) in config.twi.iter().enumerate() {
            let twi = |error| ConfigError::Twi { index, error };
            let id = TwiId::from_index(entry.id).ok_or(twi(TwiError::InvalidChannel))?;
            let handle = self.request_twi(id).map_err(twi)?;
            if let Err(error) = self.configure_twi(handle, entry.to_config()) {
                let _ = self.release_twi(handle);
                return Err(twi(error));
            }
            applied
                .twi
                .push(handle)
                .map_err(|_| twi(TwiError::OutOfHeap))?;
        }

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spi::{BitOrder, Mode, Role};
    use crate::testing::manager;
    use crate::twi::TwiStatus;

    fn board() -> BoardConfig {
        let mut config = BoardConfig::default();
        config
            .spi
            .push(SpiEntry {
                id: 0,
                config: SpiConfig {
                    mode: Mode::Mode3,
                    role: Role::Master,
                    order: BitOrder::LsbFirst,
                    baud: 4_000_000,
                    dma: true,
                },
            })
            .unwrap();
        config
            .twi
            .push(TwiEntry {
                id: 1,
                role: TwiRole::Slave,
                baud: 0,
                address: 0x20,
            })
            .unwrap();
        config
    }

    #[test]
    fn test_apply_brings_up_channels() {
        let (mut bus, probes) = manager();
        let applied = bus.apply(&board()).unwrap();

        assert_eq!(applied.spi.len(), 1);
        assert_eq!(bus.find_spi(SpiId::Spi1), Some(applied.spi[0]));
        assert!(bus.spi_channel(applied.spi[0]).unwrap().dma().is_some());

        assert_eq!(bus.find_twi(TwiId::Twi2), Some(applied.twi[0]));
        assert_eq!(bus.twi_status(applied.twi[0]), TwiStatus::Idle);
        assert_eq!(probes.twi[1].slave_address(), Some(0x40));
    }

    #[test]
    fn test_apply_reports_entry() {
        let (mut bus, _probes) = manager();
        let mut config = board();
        config.spi[0].id = 7;
        assert_eq!(
            bus.apply(&config).unwrap_err(),
            ConfigError::Spi {
                index: 0,
                error: SpiError::InvalidModule
            }
        );

        let mut config = board();
        config
            .twi
            .push(TwiEntry {
                id: 2,
                role: TwiRole::Master,
                baud: 10_000_000,
                address: 0,
            })
            .unwrap();
        assert_eq!(
            bus.apply(&config).unwrap_err(),
            ConfigError::Twi {
                index: 1,
                error: TwiError::InvalidBaudRate
            }
        );
        // The rejected channel was handed back.
        assert!(bus.find_twi(TwiId::Twi3).is_none());
    }

    #[test]
    fn test_apply_twice_conflicts() {
        let (mut bus, _probes) = manager();
        bus.apply(&board()).unwrap();
        assert_eq!(
            bus.apply(&board()).unwrap_err(),
            ConfigError::Spi {
                index: 0,
                error: SpiError::ModuleConfigured
            }
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_postcard_round_trip() {
        let config = board();
        let mut buf = [0u8; 64];
        let used = config.to_slice(&mut buf).unwrap().len();
        assert_eq!(BoardConfig::from_bytes(&buf[..used]).unwrap(), config);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_truncated_data_rejected() {
        let mut buf = [0u8; 64];
        let used = board().to_slice(&mut buf).unwrap().len();
        assert_eq!(
            BoardConfig::from_bytes(&buf[..used - 3]),
            Err(ConfigError::Deserialize)
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_small_buffer_rejected() {
        let mut buf = [0u8; 2];
        assert_eq!(board().to_slice(&mut buf), Err(ConfigError::Serialize));
    }
}
