//! Mock-board fixture and callback recorders shared by the unit tests

use std::cell::RefCell;
use std::collections::VecDeque;

use chorus_hal::gpio::Port;
use chorus_hal::spi::{SpiRegisters, SpiStatus};
use chorus_hal_mock::{MockBoard, MockClock, MockDma, MockGpio, MockSpi, MockTimer, MockTwi};

use crate::event::Interrupt;
use crate::manager::{BusManager, Peripherals};
use crate::spi::SpiId;
use crate::twi::TwiStatus;

pub const CPU_HZ: u32 = 32_000_000;

const PORTS: [Port; 4] = [Port::C, Port::D, Port::E, Port::F];

/// Test-side handles onto the mocks the manager owns
pub struct Probes {
    pub spi: [MockSpi; 4],
    pub twi: [MockTwi; 4],
    pub gpio: MockGpio,
    pub dma: MockDma,
    pub timer: MockTimer,
}

pub fn manager() -> (BusManager<MockBoard>, Probes) {
    manager_with_dma(4)
}

pub fn manager_with_dma(dma_channels: u8) -> (BusManager<MockBoard>, Probes) {
    let spi: [MockSpi; 4] =
        core::array::from_fn(|i| MockSpi::new(PORTS[i], 0x08C3 + 0x100 * i, 0x4A + i as u8));
    let twi: [MockTwi; 4] = core::array::from_fn(|i| MockTwi::new(PORTS[i]));
    let gpio = MockGpio::new();
    let dma = MockDma::new(dma_channels);
    let timer = MockTimer::default();

    let probes = Probes {
        spi: spi.clone(),
        twi: twi.clone(),
        gpio: gpio.clone(),
        dma: dma.clone(),
        timer: timer.clone(),
    };
    let bus = BusManager::new(Peripherals {
        spi,
        twi,
        gpio,
        dma,
        clock: MockClock::new(CPU_HZ),
        timer,
    });
    (bus, probes)
}

/// Deliver transfer-complete interrupts until the register goes quiet
pub fn pump_spi(bus: &mut BusManager<MockBoard>, probe: &MockSpi, id: SpiId) -> usize {
    let mut steps = 0;
    while probe.status().contains(SpiStatus::TRANSFER_COMPLETE) {
        bus.on_interrupt(Interrupt::spi(id));
        steps += 1;
        assert!(steps <= 1024, "transfer never finished");
    }
    steps
}

thread_local! {
    static SPI_DONE: RefCell<Vec<(Vec<u8>, u16)>> = const { RefCell::new(Vec::new()) };
    static SLAVE_DONE: RefCell<Vec<(Vec<u8>, u16)>> = const { RefCell::new(Vec::new()) };
    static TWI_EVENTS: RefCell<Vec<(TwiStatus, u8)>> = const { RefCell::new(Vec::new()) };
    static TWI_REPLIES: RefCell<VecDeque<u8>> = const { RefCell::new(VecDeque::new()) };
}

pub fn on_spi_done(rx: &[u8], count: u16) {
    SPI_DONE.with(|cell| cell.borrow_mut().push((rx.to_vec(), count)));
}

pub fn on_slave_done(rx: &[u8], count: u16) {
    SLAVE_DONE.with(|cell| cell.borrow_mut().push((rx.to_vec(), count)));
}

pub fn take_spi_done() -> Vec<(Vec<u8>, u16)> {
    SPI_DONE.with(|cell| cell.take())
}

pub fn take_slave_done() -> Vec<(Vec<u8>, u16)> {
    SLAVE_DONE.with(|cell| cell.take())
}

pub fn on_twi(status: TwiStatus, data: u8) -> u8 {
    TWI_EVENTS.with(|cell| cell.borrow_mut().push((status, data)));
    TWI_REPLIES.with(|cell| cell.borrow_mut().pop_front().unwrap_or(0))
}

pub fn queue_twi_replies(bytes: &[u8]) {
    TWI_REPLIES.with(|cell| cell.borrow_mut().extend(bytes.iter().copied()));
}

pub fn take_twi_events() -> Vec<(TwiStatus, u8)> {
    TWI_EVENTS.with(|cell| cell.take())
}
