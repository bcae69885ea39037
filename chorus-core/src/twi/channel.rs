//! TWI channel record and lifecycle

use heapless::Vec;

use chorus_hal::gpio::{Gpio, PinId, PinMode};
use chorus_hal::twi::{BusState, TwiRegisters};
use chorus_hal::{Board, InterruptLevel, SystemClock};

use super::{
    StallMonitor, TwiCallback, TwiConfig, TwiHandle, TwiId, TwiRole, TwiStatus,
    MAX_SLAVE_ADDRESS,
};
use crate::error::TwiError;
use crate::event::{Interrupt, Route};
use crate::manager::BusManager;
use crate::registry::Position;
use crate::spi::MAX_TRANSFER_LEN;

const PIN_SDA: u8 = 0;
const PIN_SCL: u8 = 1;

/// One requested TWI instance
#[derive(Debug)]
pub struct TwiChannel {
    pub(crate) id: TwiId,
    /// Unset until the channel is configured
    pub(crate) role: Option<TwiRole>,
    pub(crate) baud: u32,
    pub(crate) address: u8,
    pub(crate) status: TwiStatus,
    pub(crate) callback: Option<TwiCallback>,
    /// Master transaction buffer
    pub(crate) data: Vec<u8, MAX_TRANSFER_LEN>,
    pub(crate) length: u16,
    pub(crate) index: u16,
    pub(crate) monitor: StallMonitor,
}

impl TwiChannel {
    pub(crate) fn new(id: TwiId) -> Self {
        Self {
            id,
            role: None,
            baud: 0,
            address: 0,
            status: TwiStatus::Idle,
            callback: None,
            data: Vec::new(),
            length: 0,
            index: 0,
            monitor: StallMonitor::new(),
        }
    }

    pub fn id(&self) -> TwiId {
        self.id
    }

    pub fn role(&self) -> Option<TwiRole> {
        self.role
    }

    pub fn status(&self) -> TwiStatus {
        self.status
    }

    /// Slave address, when configured as a slave
    pub fn address(&self) -> u8 {
        self.address
    }
}

/// Master baud register for `baud` at `cpu_hz`
pub fn baud_register(cpu_hz: u32, baud: u32) -> Result<u8, TwiError> {
    if baud == 0 {
        return Err(TwiError::InvalidBaudRate);
    }
    let value = i64::from(cpu_hz) / (2 * i64::from(baud)) - 5;
    u8::try_from(value)
        .ok()
        .filter(|v| *v >= 1)
        .ok_or(TwiError::InvalidBaudRate)
}

/// Bus frequency a baud register value produces
pub fn actual_baud(cpu_hz: u32, register: u8) -> u32 {
    cpu_hz / (2 * (u32::from(register) + 5))
}

impl<B: Board> BusManager<B> {
    /// Claim a TWI instance; configure it before use
    pub fn request_twi(&mut self, id: TwiId) -> Result<TwiHandle, TwiError> {
        if self.find_twi(id).is_some() {
            return Err(TwiError::ChannelUnavailable);
        }
        Ok(self.twi_channels.add(TwiChannel::new(id), Position::Tail)?)
    }

    /// Configure a requested channel as master or slave
    ///
    /// Reconfiguring replaces the previous role.
    pub fn configure_twi(&mut self, handle: TwiHandle, config: TwiConfig) -> Result<(), TwiError> {
        if config.role == TwiRole::Slave && config.address > MAX_SLAVE_ADDRESS {
            return Err(TwiError::InvalidSlaveAddress);
        }

        let cpu_hz = self.clock.cpu_frequency();
        let channel = self
            .twi_channels
            .get_mut(handle)
            .ok_or(TwiError::InvalidHandle)?;
        let register = match config.role {
            TwiRole::Master => Some(baud_register(cpu_hz, config.baud)?),
            TwiRole::Slave => None,
        };

        let id = channel.id;
        let regs = &mut self.twi_ports[id.index()];
        regs.master_reset();
        regs.slave_reset();
        self.events.unregister_route(Route::TwiMaster(handle));
        self.events.unregister_route(Route::TwiSlave(handle));

        let port = regs.port();
        let pin_mode = match config.role {
            TwiRole::Master => PinMode::Output,
            TwiRole::Slave => PinMode::InputPullUp,
        };
        for pin in [PIN_SDA, PIN_SCL] {
            self.gpio.configure(PinId { port, pin }, pin_mode);
        }

        match register {
            Some(register) => {
                regs.set_baud_register(register);
                regs.set_master_enabled(true);
                regs.set_bus_state(BusState::Idle);
                channel.baud = actual_baud(cpu_hz, register);
                channel.callback = None;
                self.events
                    .register(Interrupt::twi_master(id), Route::TwiMaster(handle))?;
            }
            None => {
                regs.enable_slave(config.address << 1, InterruptLevel::High);
                channel.baud = 0;
                channel.address = config.address;
                channel.callback = config.callback;
                self.events
                    .register(Interrupt::twi_slave(id), Route::TwiSlave(handle))?;
            }
        }

        channel.role = Some(config.role);
        channel.status = TwiStatus::Idle;
        Ok(())
    }

    /// Reset both register blocks and drop the record
    pub fn release_twi(&mut self, handle: TwiHandle) -> Result<(), TwiError> {
        let channel = self.twi_channels.destroy(handle)?;

        let regs = &mut self.twi_ports[channel.id.index()];
        regs.master_reset();
        regs.slave_reset();
        self.events.unregister_route(Route::TwiMaster(handle));
        self.events.unregister_route(Route::TwiSlave(handle));
        Ok(())
    }

    /// Bus frequency of a master channel
    pub fn twi_baud_rate(&self, handle: TwiHandle) -> Result<u32, TwiError> {
        self.twi_channels
            .get(handle)
            .map(|c| c.baud)
            .ok_or(TwiError::InvalidHandle)
    }

    /// Transaction status, [`TwiStatus::Unknown`] for a stale handle
    pub fn twi_status(&self, handle: TwiHandle) -> TwiStatus {
        self.twi_channels
            .get(handle)
            .map_or(TwiStatus::Unknown, |c| c.status)
    }

    pub fn find_twi(&self, id: TwiId) -> Option<TwiHandle> {
        self.twi_channels.find(|c| c.id == id)
    }

    pub fn twi_channel(&self, handle: TwiHandle) -> Option<&TwiChannel> {
        self.twi_channels.get(handle)
    }
}
