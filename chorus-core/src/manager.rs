//! Bus manager
//!
//! Owns every peripheral the engine drives and every record it keeps. One
//! manager is built at startup from the board's [`Peripherals`] and handed
//! to whoever needs bus access, usually inside a
//! [`SharedBus`](crate::shared::SharedBus).

use chorus_hal::Board;

use crate::event::{EventTable, Interrupt, Route};
use crate::registry::Registry;
use crate::spi::{SpiChannel, SpiUser, MAX_SPI_CHANNELS, MAX_SPI_USERS};
use crate::twi::{TwiChannel, MAX_TWI_CHANNELS};

/// Hardware a bus manager is built from
pub struct Peripherals<B: Board> {
    /// SPI register blocks, indexed by [`SpiId::index`](crate::spi::SpiId::index)
    pub spi: [B::Spi; MAX_SPI_CHANNELS],
    /// TWI register blocks, indexed by [`TwiId::index`](crate::twi::TwiId::index)
    pub twi: [B::Twi; MAX_TWI_CHANNELS],
    pub gpio: B::Gpio,
    pub dma: B::Dma,
    pub clock: B::Clock,
    pub timer: B::Timer,
}

/// Owned context of the transaction engine
pub struct BusManager<B: Board> {
    pub(crate) spi_ports: [B::Spi; MAX_SPI_CHANNELS],
    pub(crate) twi_ports: [B::Twi; MAX_TWI_CHANNELS],
    pub(crate) gpio: B::Gpio,
    pub(crate) dma: B::Dma,
    pub(crate) clock: B::Clock,
    pub(crate) timer: B::Timer,

    pub(crate) spi_channels: Registry<SpiChannel, MAX_SPI_CHANNELS>,
    pub(crate) spi_users: Registry<SpiUser, MAX_SPI_USERS>,
    pub(crate) twi_channels: Registry<TwiChannel, MAX_TWI_CHANNELS>,
    pub(crate) events: EventTable,
}

impl<B: Board> BusManager<B> {
    pub fn new(peripherals: Peripherals<B>) -> Self {
        Self {
            spi_ports: peripherals.spi,
            twi_ports: peripherals.twi,
            gpio: peripherals.gpio,
            dma: peripherals.dma,
            clock: peripherals.clock,
            timer: peripherals.timer,
            spi_channels: Registry::new(),
            spi_users: Registry::new(),
            twi_channels: Registry::new(),
            events: EventTable::new(),
        }
    }

    /// Interrupt entry point
    ///
    /// Every vector of every peripheral the engine owns funnels into this
    /// call. Interrupts nobody registered for are dropped.
    pub fn on_interrupt(&mut self, interrupt: Interrupt) {
        let Some(route) = self.events.lookup(interrupt) else {
            #[cfg(feature = "defmt")]
            defmt::warn!("Unrouted interrupt {}", interrupt);
            return;
        };

        match route {
            Route::SpiTransfer(channel) => self.spi_byte_step(channel),
            Route::SpiMasterDma(channel) => self.spi_master_dma(channel),
            Route::SpiChipSelect(user) => self.spi_chip_select_edge(user),
            Route::TwiMaster(channel) => self.twi_master_interrupt(channel),
            Route::TwiSlave(channel) => self.twi_slave_interrupt(channel),
        }
    }

    /// Routing table, for inspection
    pub fn events(&self) -> &EventTable {
        &self.events
    }

    pub fn gpio(&self) -> &B::Gpio {
        &self.gpio
    }

    pub fn gpio_mut(&mut self) -> &mut B::Gpio {
        &mut self.gpio
    }
}
