//! Error types
//!
//! Every error maps to the signed status code of the byte-level API
//! through `code()`. Success is `0`; errors are negative.

use chorus_hal::dma::DmaError;
use chorus_hal::gpio::GpioError;

/// Status code returned for success
pub const PASSED: i16 = 0;

/// Handle registry failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    /// Every slot is occupied
    OutOfHeap,
    /// Handle is not a member of the registry
    InvalidLink,
    /// Handle is already linked
    LinkMapped,
}

impl RegistryError {
    pub const fn code(self) -> i16 {
        match self {
            RegistryError::OutOfHeap => -1,
            RegistryError::InvalidLink => -2,
            RegistryError::LinkMapped => -4,
        }
    }
}

/// Interrupt routing table failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventError {
    /// No room for another route
    TableFull,
    /// The (peripheral, event) pair already has a route
    AlreadyRouted,
}

/// SPI engine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiError {
    /// No record memory left
    OutOfHeap,
    /// Handle is not a live channel or user
    InvalidHandle,
    /// Channel has not been configured
    NoConfig,
    /// Baud rate outside the range the role supports
    InvalidBaudRate,
    /// Channel id out of range
    InvalidModule,
    /// Clock mode out of range
    InvalidMode,
    /// Role out of range
    InvalidOp,
    /// Data order out of range
    InvalidOrder,
    /// Chip-select pin out of range
    InvalidPin,
    /// Chip-select port out of range
    InvalidPort,
    /// Channel is already configured
    ModuleConfigured,
    /// Bus is locked by another user
    Busy,
    /// Slave channels accept a single user
    OnlyOneSlave,
    /// Peripheral did not respond
    HalFailed,
    /// No DMA channel left
    NoDma,
    /// Transfer length is zero or exceeds the buffer capacity
    InvalidLength,
}

impl SpiError {
    pub const fn code(self) -> i16 {
        match self {
            SpiError::OutOfHeap => -1,
            SpiError::InvalidHandle => -2,
            SpiError::NoConfig => -3,
            SpiError::InvalidBaudRate => -4,
            SpiError::InvalidModule => -5,
            SpiError::InvalidMode => -6,
            SpiError::InvalidOp => -7,
            SpiError::InvalidOrder => -8,
            SpiError::InvalidPin => -9,
            SpiError::InvalidPort => -10,
            SpiError::ModuleConfigured => -11,
            SpiError::Busy => -12,
            SpiError::OnlyOneSlave => -13,
            SpiError::HalFailed => -14,
            SpiError::NoDma => -15,
            SpiError::InvalidLength => -17,
        }
    }
}

impl From<RegistryError> for SpiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::OutOfHeap => SpiError::OutOfHeap,
            RegistryError::InvalidLink | RegistryError::LinkMapped => SpiError::InvalidHandle,
        }
    }
}

impl From<DmaError> for SpiError {
    fn from(e: DmaError) -> Self {
        match e {
            DmaError::NoChannelsOpen => SpiError::NoDma,
            DmaError::OutOfHeap => SpiError::OutOfHeap,
            DmaError::InvalidChannel => SpiError::HalFailed,
        }
    }
}

impl From<GpioError> for SpiError {
    fn from(e: GpioError) -> Self {
        match e {
            GpioError::InvalidPin => SpiError::InvalidPin,
            // A chip-select interrupt that cannot be armed leaves the
            // channel unusable for the slave user.
            GpioError::OutOfHeap | GpioError::InterruptsMapped | GpioError::InvalidHandle => {
                SpiError::NoConfig
            }
        }
    }
}

impl From<EventError> for SpiError {
    fn from(e: EventError) -> Self {
        match e {
            EventError::TableFull => SpiError::OutOfHeap,
            EventError::AlreadyRouted => SpiError::ModuleConfigured,
        }
    }
}

/// TWI engine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TwiError {
    /// No record memory left
    OutOfHeap,
    /// Handle is not a live channel
    InvalidHandle,
    /// Channel is already requested
    ChannelUnavailable,
    /// Baud register would fall outside 1..=255
    InvalidBaudRate,
    /// Channel id out of range
    InvalidChannel,
    /// Role out of range
    InvalidMode,
    /// Slave address above 127
    InvalidSlaveAddress,
    /// Operation requires a master channel
    NotMaster,
    /// Peripheral did not respond
    OperationFailed,
    /// Transfer length is zero or exceeds the buffer capacity
    InvalidLength,
}

impl TwiError {
    pub const fn code(self) -> i16 {
        match self {
            TwiError::OutOfHeap => -1,
            TwiError::InvalidHandle => -2,
            TwiError::ChannelUnavailable => -3,
            TwiError::InvalidBaudRate => -4,
            TwiError::InvalidChannel => -5,
            TwiError::InvalidMode => -6,
            TwiError::InvalidSlaveAddress => -7,
            TwiError::NotMaster => -8,
            TwiError::OperationFailed => -9,
            TwiError::InvalidLength => -10,
        }
    }
}

impl From<RegistryError> for TwiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::OutOfHeap => TwiError::OutOfHeap,
            RegistryError::InvalidLink | RegistryError::LinkMapped => TwiError::InvalidHandle,
        }
    }
}

impl From<EventError> for TwiError {
    fn from(e: EventError) -> Self {
        match e {
            EventError::TableFull => TwiError::OutOfHeap,
            EventError::AlreadyRouted => TwiError::ChannelUnavailable,
        }
    }
}

/// Collapse an operation result into the byte-level status code
pub trait StatusCode {
    /// `0` on success, the error's negative code otherwise
    fn status_code(&self) -> i16;
}

impl<T> StatusCode for Result<T, SpiError> {
    fn status_code(&self) -> i16 {
        match self {
            Ok(_) => PASSED,
            Err(e) => e.code(),
        }
    }
}

impl<T> StatusCode for Result<T, TwiError> {
    fn status_code(&self) -> i16 {
        match self {
            Ok(_) => PASSED,
            Err(e) => e.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spi_codes_are_negative_and_distinct() {
        let all = [
            SpiError::OutOfHeap,
            SpiError::InvalidHandle,
            SpiError::NoConfig,
            SpiError::InvalidBaudRate,
            SpiError::InvalidModule,
            SpiError::InvalidMode,
            SpiError::InvalidOp,
            SpiError::InvalidOrder,
            SpiError::InvalidPin,
            SpiError::InvalidPort,
            SpiError::ModuleConfigured,
            SpiError::Busy,
            SpiError::OnlyOneSlave,
            SpiError::HalFailed,
            SpiError::NoDma,
            SpiError::InvalidLength,
        ];
        for (i, a) in all.iter().enumerate() {
            assert!(a.code() < 0);
            for b in &all[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }

    #[test]
    fn test_status_code() {
        let ok: Result<(), SpiError> = Ok(());
        let busy: Result<(), SpiError> = Err(SpiError::Busy);
        assert_eq!(ok.status_code(), PASSED);
        assert_eq!(busy.status_code(), -12);

        let nack: Result<(), TwiError> = Err(TwiError::NotMaster);
        assert_eq!(nack.status_code(), -8);
    }

    #[test]
    fn test_dma_error_mapping() {
        assert_eq!(SpiError::from(DmaError::NoChannelsOpen), SpiError::NoDma);
        assert_eq!(SpiError::from(DmaError::OutOfHeap), SpiError::OutOfHeap);
    }
}
