//! Peripheral transaction engine
//!
//! Shared, interrupt-safe access to SPI and TWI buses on a single-core
//! microcontroller:
//!
//! - Handle registry for channel and user records
//! - Single-owner bus lock per SPI channel
//! - Byte-stepped and DMA transfer paths, master and slave
//! - TWI master and slave state machines with stall recovery
//! - Interrupt routing table behind one entry point
//! - Board bus configuration
//!
//! Everything lives in a [`BusManager`](manager::BusManager) built from the
//! board's peripherals. Foreground code and interrupt handlers share it
//! through [`SharedBus`](shared::SharedBus).

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod event;
pub mod manager;
pub mod registry;
pub mod shared;
pub mod spi;
pub mod twi;

#[cfg(test)]
mod testing;

pub use error::{SpiError, StatusCode, TwiError};
pub use event::Interrupt;
pub use manager::{BusManager, Peripherals};
pub use shared::SharedBus;
