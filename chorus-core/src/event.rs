//! Interrupt routing table
//!
//! Every hardware interrupt reaches the engine through one entry point,
//! [`BusManager::on_interrupt`](crate::manager::BusManager::on_interrupt),
//! as an [`Interrupt`]: the peripheral instance that raised it and the kind
//! of event. The table maps that pair to the engine routine that owns it.
//! Configuring a channel registers its routes; releasing it removes them.

use heapless::FnvIndexMap;

use chorus_hal::dma::{DmaChannel, DmaEvent};
use chorus_hal::gpio::PinId;

use crate::error::EventError;
use crate::spi::{SpiChannelHandle, SpiId, SpiUserHandle};
use crate::twi::{TwiHandle, TwiId};

/// Maximum number of routes (power of two for the index map)
pub const MAX_ROUTES: usize = 32;

/// Peripheral instance that raised an interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Peripheral {
    Spi(SpiId),
    Twi(TwiId),
    Dma(DmaChannel),
    Pin(PinId),
}

/// Kind of event a peripheral signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventKind {
    /// SPI byte shifted, or DMA block finished
    TransferComplete,
    /// DMA bus error
    TransferError,
    /// TWI master register block
    TwiMaster,
    /// TWI slave register block
    TwiSlave,
    /// Pin-change on a rising edge
    RisingEdge,
}

impl From<DmaEvent> for EventKind {
    fn from(event: DmaEvent) -> Self {
        match event {
            DmaEvent::TransferComplete => EventKind::TransferComplete,
            DmaEvent::TransferError => EventKind::TransferError,
        }
    }
}

/// One interrupt as delivered to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Interrupt {
    pub peripheral: Peripheral,
    pub kind: EventKind,
}

impl Interrupt {
    /// SPI transfer complete
    pub const fn spi(id: SpiId) -> Self {
        Self {
            peripheral: Peripheral::Spi(id),
            kind: EventKind::TransferComplete,
        }
    }

    /// TWI master interrupt
    pub const fn twi_master(id: TwiId) -> Self {
        Self {
            peripheral: Peripheral::Twi(id),
            kind: EventKind::TwiMaster,
        }
    }

    /// TWI slave interrupt
    pub const fn twi_slave(id: TwiId) -> Self {
        Self {
            peripheral: Peripheral::Twi(id),
            kind: EventKind::TwiSlave,
        }
    }

    /// DMA channel interrupt
    pub fn dma(channel: DmaChannel, event: DmaEvent) -> Self {
        Self {
            peripheral: Peripheral::Dma(channel),
            kind: event.into(),
        }
    }

    /// Rising edge on a pin
    pub const fn rising_edge(pin: PinId) -> Self {
        Self {
            peripheral: Peripheral::Pin(pin),
            kind: EventKind::RisingEdge,
        }
    }
}

/// Engine routine an interrupt is delivered to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Route {
    /// Byte-stepped SPI transfer of a channel
    SpiTransfer(SpiChannelHandle),
    /// RX DMA completion of a master SPI channel
    SpiMasterDma(SpiChannelHandle),
    /// Chip-select release seen by a slave SPI user
    SpiChipSelect(SpiUserHandle),
    /// TWI master state machine
    TwiMaster(TwiHandle),
    /// TWI slave state machine
    TwiSlave(TwiHandle),
}

/// Mapping of `(peripheral, event kind)` to [`Route`]
pub struct EventTable {
    routes: FnvIndexMap<Interrupt, Route, MAX_ROUTES>,
}

impl Default for EventTable {
    fn default() -> Self {
        Self::new()
    }
}

impl EventTable {
    pub fn new() -> Self {
        Self {
            routes: FnvIndexMap::new(),
        }
    }

    /// Route `interrupt` to `route`
    ///
    /// A pair can only be routed once; release the previous owner first.
    pub fn register(&mut self, interrupt: Interrupt, route: Route) -> Result<(), EventError> {
        if self.routes.contains_key(&interrupt) {
            return Err(EventError::AlreadyRouted);
        }
        self.routes
            .insert(interrupt, route)
            .map(|_| ())
            .map_err(|_| EventError::TableFull)
    }

    /// Remove the route of `interrupt`, returning it
    pub fn unregister(&mut self, interrupt: Interrupt) -> Option<Route> {
        self.routes.remove(&interrupt)
    }

    /// Remove every route that points at `route`
    pub fn unregister_route(&mut self, route: Route) {
        let stale: heapless::Vec<Interrupt, MAX_ROUTES> = self
            .routes
            .iter()
            .filter(|(_, r)| **r == route)
            .map(|(irq, _)| *irq)
            .collect();
        for irq in stale {
            self.routes.remove(&irq);
        }
    }

    /// Look up the routine for `interrupt`
    pub fn lookup(&self, interrupt: Interrupt) -> Option<Route> {
        self.routes.get(&interrupt).copied()
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
