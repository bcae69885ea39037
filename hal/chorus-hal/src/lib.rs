//! Chorus Hardware Abstraction Layer
//!
//! This crate defines the register interfaces and collaborator traits that
//! the Chorus transaction engine drives. A chip-specific crate implements
//! them on top of its memory-mapped peripherals; the mock crate implements
//! them in software for host tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Application / device drivers           │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  chorus-core (registry, arbiter,        │
//! │  transfer engine, state machines)       │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  chorus-hal (this crate - traits)       │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │  chip HAL     │       │ chorus-hal-   │
//! │  (registers)  │       │    mock       │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`spi::SpiRegisters`] - SPI peripheral registers
//! - [`twi::TwiRegisters`] - TWI (I2C) master and slave registers
//! - [`gpio::Gpio`] - Pin control and edge interrupts
//! - [`dma::DmaController`] - Single-shot DMA block transfers
//! - [`clock::SystemClock`], [`clock::MicrosecondClock`] - Time sources
//! - [`Board`] - Bundles one implementation of each for a target

#![no_std]
#![deny(unsafe_code)]

pub mod clock;
pub mod dma;
pub mod gpio;
pub mod spi;
pub mod twi;

// Re-export key traits at crate root for convenience
pub use clock::{MicrosecondClock, SystemClock};
pub use dma::DmaController;
pub use gpio::Gpio;
pub use spi::SpiRegisters;
pub use twi::TwiRegisters;

/// Interrupt priority level of a peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InterruptLevel {
    /// Interrupts disabled
    #[default]
    Off,
    /// Low priority
    Low,
    /// Medium priority
    Medium,
    /// High priority
    High,
}

/// The set of hardware implementations a bus manager runs on
///
/// Each associated type is one collaborator. The SPI and TWI types are
/// per-instance: the manager owns one value for every channel id.
pub trait Board {
    /// SPI register block of one instance
    type Spi: SpiRegisters;
    /// TWI register block of one instance
    type Twi: TwiRegisters;
    /// GPIO subsystem
    type Gpio: Gpio;
    /// DMA controller
    type Dma: DmaController;
    /// Core clock frequency source
    type Clock: SystemClock;
    /// Microsecond timestamp source
    type Timer: MicrosecondClock;
}
