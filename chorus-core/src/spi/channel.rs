//! SPI channel and user records, and their lifecycle
//!
//! A channel is configured once per instance and stays until released.
//! Users attach to a configured channel with their own chip-select pin.
//! Master channels take any number of users; a slave channel takes exactly
//! one, whose chip-select edge interrupt signals the end of a transfer.

use chorus_hal::dma::{DmaChannel, DmaController, DmaEvent};
use chorus_hal::gpio::{Edge, EdgeInterrupt, Gpio, PinId, PinMode, Port};
use chorus_hal::spi::{SpiControl, SpiRegisters};
use chorus_hal::{Board, InterruptLevel, SystemClock};

use super::transfer::Transfer;
use super::{
    baud, BitOrder, Mode, Role, SpiCallback, SpiChannelHandle, SpiConfig, SpiId, SpiTiming,
    SpiUserHandle,
};
use crate::error::SpiError;
use crate::event::{Interrupt, Route};
use crate::manager::BusManager;
use crate::registry::Position;

/// Slave-select pin of the peripheral port
const PIN_SS: u8 = 4;
const PIN_MOSI: u8 = 5;
const PIN_MISO: u8 = 6;
const PIN_SCK: u8 = 7;

/// DMA channels owned by a channel for its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaPair {
    /// Peripheral to memory; always the higher-priority channel
    pub rx: DmaChannel,
    /// Memory to peripheral
    pub tx: DmaChannel,
}

/// One configured SPI instance
#[derive(Debug)]
pub struct SpiChannel {
    pub(crate) id: SpiId,
    pub(crate) role: Role,
    pub(crate) mode: Mode,
    pub(crate) order: BitOrder,
    pub(crate) timing: SpiTiming,
    pub(crate) users: u8,
    pub(crate) dma: Option<DmaPair>,
    pub(crate) locked: bool,
    pub(crate) owner: Option<SpiUserHandle>,
    /// Fixed DMA endpoint standing in for a missing buffer
    pub(crate) scratch: u8,
}

impl SpiChannel {
    pub(crate) fn new(id: SpiId, config: &SpiConfig, timing: SpiTiming) -> Self {
        Self {
            id,
            role: config.role,
            mode: config.mode,
            order: config.order,
            timing,
            users: 0,
            dma: None,
            locked: false,
            owner: None,
            scratch: super::FILLER,
        }
    }

    pub fn id(&self) -> SpiId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Clock frequency the prescaler actually produces
    pub fn baud(&self) -> u32 {
        self.timing.actual
    }

    /// Number of attached users
    pub fn users(&self) -> u8 {
        self.users
    }

    pub fn dma(&self) -> Option<DmaPair> {
        self.dma
    }

    pub(crate) fn control(&self, enabled: bool) -> SpiControl {
        SpiControl {
            enabled,
            master: self.role == Role::Master,
            lsb_first: self.order == BitOrder::LsbFirst,
            mode: self.mode,
            prescaler: self.timing.prescaler,
            clk2x: self.timing.clk2x,
        }
    }
}

/// One chip-select attached to a channel
#[derive(Debug)]
pub struct SpiUser {
    pub(crate) channel: SpiChannelHandle,
    pub(crate) cs: PinId,
    pub(crate) callback: Option<SpiCallback>,
    pub(crate) transfer: Transfer,
    pub(crate) cs_interrupt: Option<EdgeInterrupt>,
}

impl SpiUser {
    pub(crate) fn new(channel: SpiChannelHandle, cs: PinId, callback: Option<SpiCallback>) -> Self {
        Self {
            channel,
            cs,
            callback,
            transfer: Transfer::new(),
            cs_interrupt: None,
        }
    }

    pub fn channel(&self) -> SpiChannelHandle {
        self.channel
    }

    pub fn chip_select(&self) -> PinId {
        self.cs
    }

    /// Bytes exchanged by the current or last transfer
    pub fn index(&self) -> u16 {
        self.transfer.index
    }

    /// Length of the current or last transfer
    pub fn length(&self) -> u16 {
        self.transfer.length
    }
}

impl<B: Board> BusManager<B> {
    /// Configure an SPI instance and return its channel handle
    ///
    /// With `config.dma` set, an RX/TX DMA pair is allocated and held until
    /// [`release_spi`](Self::release_spi).
    pub fn configure_spi(
        &mut self,
        id: SpiId,
        config: SpiConfig,
    ) -> Result<SpiChannelHandle, SpiError> {
        if self.find_spi(id).is_some() {
            return Err(SpiError::ModuleConfigured);
        }

        let timing = baud::select(self.clock.cpu_frequency(), config.baud, config.role)?;
        let handle = self
            .spi_channels
            .add(SpiChannel::new(id, &config, timing), Position::Tail)?;

        if let Err(e) = self.attach_spi_resources(handle, id, &config) {
            self.teardown_spi(handle);
            return Err(e);
        }

        let Some(channel) = self.spi_channels.get(handle) else {
            return Err(SpiError::InvalidHandle);
        };
        let regs = &mut self.spi_ports[id.index()];
        let port = regs.port();

        let (out_mode, in_mode) = match config.role {
            Role::Master => (PinMode::Output, PinMode::Input),
            Role::Slave => (PinMode::Input, PinMode::Output),
        };
        for pin in [PIN_SS, PIN_MOSI, PIN_SCK] {
            self.gpio.configure(PinId { port, pin }, out_mode);
        }
        self.gpio.configure(PinId { port, pin: PIN_MISO }, in_mode);

        regs.write_control(channel.control(false));
        regs.set_interrupt_level(if config.dma {
            InterruptLevel::Off
        } else {
            InterruptLevel::High
        });
        self.gpio.set_high(PinId { port, pin: PIN_SS });
        regs.write_control(channel.control(true));

        Ok(handle)
    }

    fn attach_spi_resources(
        &mut self,
        handle: SpiChannelHandle,
        id: SpiId,
        config: &SpiConfig,
    ) -> Result<(), SpiError> {
        self.events
            .register(Interrupt::spi(id), Route::SpiTransfer(handle))?;

        if !config.dma {
            return Ok(());
        }

        let rx = self.dma.request().inspect_err(|_e| {
            #[cfg(feature = "defmt")]
            defmt::warn!("SPI {} DMA request failed: {:?}", id, _e);
        })?;
        let tx = match self.dma.request() {
            Ok(tx) => tx,
            Err(e) => {
                let _ = self.dma.release(rx);
                return Err(e.into());
            }
        };

        // The receive side must win arbitration so no byte is overwritten
        // before it is read.
        let pair = if rx < tx {
            DmaPair { rx, tx }
        } else {
            DmaPair { rx: tx, tx: rx }
        };

        if let Some(channel) = self.spi_channels.get_mut(handle) {
            channel.dma = Some(pair);
        }

        if config.role == Role::Master {
            self.events.register(
                Interrupt::dma(pair.rx, DmaEvent::TransferComplete),
                Route::SpiMasterDma(handle),
            )?;
            self.dma
                .set_interrupt(pair.rx, DmaEvent::TransferComplete, true)?;
        }

        Ok(())
    }

    /// Free everything a channel record owns and drop the record
    fn teardown_spi(&mut self, handle: SpiChannelHandle) -> Option<SpiChannel> {
        let channel = self.spi_channels.destroy(handle).ok()?;

        if let Some(pair) = channel.dma {
            let _ = self.dma.set_interrupt(pair.rx, DmaEvent::TransferComplete, false);
            let _ = self.dma.disable(pair.rx);
            let _ = self.dma.disable(pair.tx);
            let _ = self.dma.release(pair.rx);
            let _ = self.dma.release(pair.tx);
        }
        self.events.unregister_route(Route::SpiTransfer(handle));
        self.events.unregister_route(Route::SpiMasterDma(handle));

        Some(channel)
    }

    /// Release a channel: detach its users, free its DMA pair, reset the
    /// control register
    pub fn release_spi(&mut self, handle: SpiChannelHandle) -> Result<(), SpiError> {
        if !self.spi_channels.contains(handle) {
            return Err(SpiError::InvalidHandle);
        }

        while let Some(user) = self.spi_users.find(|u| u.channel == handle) {
            self.detach_spi_user(user);
        }

        let channel = self.teardown_spi(handle).ok_or(SpiError::InvalidHandle)?;
        let regs = &mut self.spi_ports[channel.id.index()];
        regs.set_interrupt_level(InterruptLevel::Off);
        regs.write_control(SpiControl::default());

        Ok(())
    }

    /// Attach a user to a configured channel
    ///
    /// On a master channel the chip-select becomes an output driven high.
    /// On a slave channel it becomes an input whose rising edge completes a
    /// transfer; only one user is accepted.
    pub fn request_spi(
        &mut self,
        id: SpiId,
        callback: Option<SpiCallback>,
        cs_port: Port,
        cs_pin: u8,
    ) -> Result<SpiUserHandle, SpiError> {
        let cs = PinId::new(cs_port, cs_pin).ok_or(SpiError::InvalidPin)?;
        let channel_handle = self.find_spi(id).ok_or(SpiError::NoConfig)?;
        let Some(channel) = self.spi_channels.get(channel_handle) else {
            return Err(SpiError::NoConfig);
        };

        let role = channel.role;
        if role == Role::Slave && channel.users > 0 {
            return Err(SpiError::OnlyOneSlave);
        }

        let user = self
            .spi_users
            .add(SpiUser::new(channel_handle, cs, callback), Position::Tail)?;

        match role {
            Role::Slave => {
                self.gpio.configure(cs, PinMode::Input);
                let edge = match self.gpio.request_edge_interrupt(cs, Edge::Rising) {
                    Ok(edge) => edge,
                    Err(e) => {
                        let _ = self.spi_users.destroy(user);
                        return Err(e.into());
                    }
                };
                if let Err(e) = self
                    .events
                    .register(Interrupt::rising_edge(cs), Route::SpiChipSelect(user))
                {
                    let _ = self.gpio.release_edge_interrupt(edge);
                    let _ = self.spi_users.destroy(user);
                    return Err(e.into());
                }
                if let Some(u) = self.spi_users.get_mut(user) {
                    u.cs_interrupt = Some(edge);
                }
            }
            Role::Master => {
                self.gpio.configure(cs, PinMode::Output);
                self.gpio.set_high(cs);
            }
        }

        if let Some(channel) = self.spi_channels.get_mut(channel_handle) {
            channel.users += 1;
        }

        Ok(user)
    }

    /// Detach a user; the channel is released with its last user
    pub fn release_spi_user(&mut self, user: SpiUserHandle) -> Result<(), SpiError> {
        let channel = self
            .spi_users
            .get(user)
            .map(|u| u.channel)
            .ok_or(SpiError::InvalidHandle)?;

        self.detach_spi_user(user);

        let remaining = self.spi_channels.get(channel).map(|c| c.users);
        if remaining == Some(0) {
            self.release_spi(channel)?;
        }
        Ok(())
    }

    fn detach_spi_user(&mut self, user: SpiUserHandle) {
        let Ok(record) = self.spi_users.destroy(user) else {
            return;
        };

        if let Some(edge) = record.cs_interrupt {
            self.events.unregister(Interrupt::rising_edge(edge.pin));
            let _ = self.gpio.release_edge_interrupt(edge);
        }

        if let Some(channel) = self.spi_channels.get_mut(record.channel) {
            if channel.owner == Some(user) {
                channel.release_lock();
            }
            channel.users = channel.users.saturating_sub(1);
        }
    }

    /// Handle of the configured channel for `id`
    pub fn find_spi(&self, id: SpiId) -> Option<SpiChannelHandle> {
        self.spi_channels.find(|c| c.id == id)
    }

    /// Borrow a channel record
    pub fn spi_channel(&self, handle: SpiChannelHandle) -> Option<&SpiChannel> {
        self.spi_channels.get(handle)
    }

    /// Borrow a user record
    pub fn spi_user(&self, handle: SpiUserHandle) -> Option<&SpiUser> {
        self.spi_users.get(handle)
    }
}
