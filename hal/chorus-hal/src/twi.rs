//! TWI (I2C) register interface
//!
//! A TWI instance carries a master and a slave register block. Only one of
//! them is configured at a time; [`TwiRegisters`] exposes both so that the
//! engine can reset the unused one.

use bitflags::bitflags;

use crate::gpio::Port;
use crate::InterruptLevel;

/// Standard mode bus frequency (100 kHz)
pub const STANDARD_MODE_HZ: u32 = 100_000;

/// Fast mode bus frequency (400 kHz)
pub const FAST_MODE_HZ: u32 = 400_000;

/// Fast mode plus bus frequency (1 MHz)
pub const FAST_MODE_PLUS_HZ: u32 = 1_000_000;

bitflags! {
    /// Master status register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MasterStatus: u8 {
        /// A byte was received
        const READ_INTERRUPT = 1 << 7;
        /// A byte (or the address) was sent
        const WRITE_INTERRUPT = 1 << 6;
        /// Master is holding SCL low
        const CLOCK_HOLD = 1 << 5;
        /// Last byte was not acknowledged
        const RX_NACK = 1 << 4;
        /// Another master won arbitration
        const ARBITRATION_LOST = 1 << 3;
        /// Illegal bus condition detected
        const BUS_ERROR = 1 << 2;
    }
}

bitflags! {
    /// Slave status register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlaveStatus: u8 {
        /// A data byte was shifted in or out
        const DATA_INTERRUPT = 1 << 7;
        /// Address match or stop condition
        const ADDRESS_STOP_INTERRUPT = 1 << 6;
        /// Slave is holding SCL low
        const CLOCK_HOLD = 1 << 5;
        /// Master did not acknowledge the last byte
        const RX_NACK = 1 << 4;
        /// Slave lost a data collision
        const COLLISION = 1 << 3;
        /// Illegal bus condition detected
        const BUS_ERROR = 1 << 2;
        /// Master is reading from the slave
        const READ = 1 << 1;
        /// The address interrupt was an address match, not a stop
        const ADDRESS_MATCH = 1 << 0;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for MasterStatus {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "MasterStatus({=u8:#x})", self.bits())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SlaveStatus {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "SlaveStatus({=u8:#x})", self.bits())
    }
}

/// Bus state as tracked by the master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    Unknown,
    Idle,
    /// This master owns the bus
    Owner,
    /// Another master owns the bus
    Busy,
}

/// Acknowledge action for the next byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Acknowledge {
    Ack,
    Nack,
}

/// Master command register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MasterCommand {
    /// Issue a repeated start
    RepeatedStart,
    /// Acknowledge and receive the next byte
    ReceiveNext,
    /// Issue a stop condition
    Stop,
}

/// Slave command register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlaveCommand {
    /// Finish the transaction and wait for a new start
    Complete,
    /// Respond to the pending address or data interrupt
    Response,
}

/// Register blocks of one TWI instance
pub trait TwiRegisters {
    /// Port carrying SDA (bit 0) and SCL (bit 1)
    fn port(&self) -> Port;

    // Master register block

    /// Clear every master register
    fn master_reset(&mut self);

    /// Set the master enable bit
    fn set_master_enabled(&mut self, enabled: bool);

    /// Read the master enable bit
    fn master_enabled(&self) -> bool;

    /// Write the baud register
    fn set_baud_register(&mut self, value: u8);

    /// Read the master status register
    fn master_status(&self) -> MasterStatus;

    /// Clear master status flags (write-one-to-clear)
    fn clear_master_flags(&mut self, flags: MasterStatus);

    /// Read the bus state field
    fn bus_state(&self) -> BusState;

    /// Force the bus state field
    fn set_bus_state(&mut self, state: BusState);

    /// Write the address register, which issues a start condition
    fn write_address(&mut self, address_rw: u8);

    /// Write the master data register
    fn master_write(&mut self, byte: u8);

    /// Read the master data register
    fn master_read(&mut self) -> u8;

    /// Issue a master command
    fn master_command(&mut self, ack: Acknowledge, command: MasterCommand);

    // Slave register block

    /// Clear every slave register
    fn slave_reset(&mut self);

    /// Enable the slave on `address_register` (address << 1)
    ///
    /// Data, address and stop interrupts are enabled at `level`.
    fn enable_slave(&mut self, address_register: u8, level: InterruptLevel);

    /// Read the slave status register
    fn slave_status(&self) -> SlaveStatus;

    /// Clear slave status flags (write-one-to-clear)
    fn clear_slave_flags(&mut self, flags: SlaveStatus);

    /// Read the slave data register
    fn slave_read(&mut self) -> u8;

    /// Write the slave data register
    fn slave_write(&mut self, byte: u8);

    /// Issue a slave command
    fn slave_command(&mut self, ack: Acknowledge, command: SlaveCommand);
}
