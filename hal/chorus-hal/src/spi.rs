//! SPI register interface
//!
//! The engine talks to an SPI instance only through [`SpiRegisters`]: a
//! control word, an interrupt level, a status word and the data register.

use bitflags::bitflags;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dma::DmaTrigger;
use crate::gpio::Port;
use crate::InterruptLevel;

/// SPI clock polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    /// Clock idles low (CPOL=0)
    IdleLow,
    /// Clock idles high (CPOL=1)
    IdleHigh,
}

/// SPI clock phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Data captured on first clock transition (CPHA=0)
    CaptureOnFirstTransition,
    /// Data captured on second clock transition (CPHA=1)
    CaptureOnSecondTransition,
}

/// SPI mode (combined polarity and phase)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Mode {
    /// Mode 0: CPOL=0, CPHA=0
    #[default]
    Mode0,
    /// Mode 1: CPOL=0, CPHA=1
    Mode1,
    /// Mode 2: CPOL=1, CPHA=0
    Mode2,
    /// Mode 3: CPOL=1, CPHA=1
    Mode3,
}

impl Mode {
    /// Mode number as written to the control register
    pub const fn bits(self) -> u8 {
        match self {
            Mode::Mode0 => 0,
            Mode::Mode1 => 1,
            Mode::Mode2 => 2,
            Mode::Mode3 => 3,
        }
    }

    /// Decode a mode number
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Mode::Mode0),
            1 => Some(Mode::Mode1),
            2 => Some(Mode::Mode2),
            3 => Some(Mode::Mode3),
            _ => None,
        }
    }
}

impl From<Mode> for (Polarity, Phase) {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Mode0 => (Polarity::IdleLow, Phase::CaptureOnFirstTransition),
            Mode::Mode1 => (Polarity::IdleLow, Phase::CaptureOnSecondTransition),
            Mode::Mode2 => (Polarity::IdleHigh, Phase::CaptureOnFirstTransition),
            Mode::Mode3 => (Polarity::IdleHigh, Phase::CaptureOnSecondTransition),
        }
    }
}

impl From<Mode> for embedded_hal::spi::Mode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Mode0 => embedded_hal::spi::MODE_0,
            Mode::Mode1 => embedded_hal::spi::MODE_1,
            Mode::Mode2 => embedded_hal::spi::MODE_2,
            Mode::Mode3 => embedded_hal::spi::MODE_3,
        }
    }
}

/// Clock prescaler applied to the CPU clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Prescaler {
    #[default]
    Div4,
    Div16,
    Div64,
    Div128,
}

impl Prescaler {
    /// Division factor
    pub const fn divisor(self) -> u32 {
        match self {
            Prescaler::Div4 => 4,
            Prescaler::Div16 => 16,
            Prescaler::Div64 => 64,
            Prescaler::Div128 => 128,
        }
    }
}

/// Contents of the SPI control register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiControl {
    /// Peripheral enabled
    pub enabled: bool,
    /// Master role selected
    pub master: bool,
    /// Least significant bit shifted first
    pub lsb_first: bool,
    /// Clock polarity and phase
    pub mode: Mode,
    /// Clock prescaler
    pub prescaler: Prescaler,
    /// Double the prescaled clock (master only)
    pub clk2x: bool,
}

bitflags! {
    /// SPI status register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SpiStatus: u8 {
        /// A byte finished shifting
        const TRANSFER_COMPLETE = 1 << 7;
        /// Data register written while a transfer was in progress
        const WRITE_COLLISION = 1 << 6;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SpiStatus {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "SpiStatus({=u8:#x})", self.bits())
    }
}

/// Register block of one SPI instance
///
/// Reading [`read_data`](SpiRegisters::read_data) after the transfer
/// complete flag was observed clears the flag, as on the hardware.
pub trait SpiRegisters {
    /// Port carrying the SS/MOSI/MISO/SCK pins (bits 4..=7)
    fn port(&self) -> Port;

    /// Write the control register
    fn write_control(&mut self, control: SpiControl);

    /// Read back the control register
    fn control(&self) -> SpiControl;

    /// Set the transfer complete interrupt level
    fn set_interrupt_level(&mut self, level: InterruptLevel);

    /// Current interrupt level
    fn interrupt_level(&self) -> InterruptLevel;

    /// Read the status register
    fn status(&self) -> SpiStatus;

    /// Read the data register
    fn read_data(&mut self) -> u8;

    /// Write the data register; on a master this starts a transfer
    fn write_data(&mut self, byte: u8);

    /// Bus address of the data register, used as a DMA endpoint
    fn data_address(&self) -> usize;

    /// DMA trigger raised when a byte finished shifting
    fn dma_trigger(&self) -> DmaTrigger;
}
