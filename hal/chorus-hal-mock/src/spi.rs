//! Mock SPI register block
//!
//! A master write completes at once with the next queued reply byte unless
//! auto-complete is turned off, in which case the test plays the slave and
//! finishes the byte with [`MockSpi::complete`]. As a slave, the block
//! holds whatever the engine wrote until the master clocks it out with
//! [`MockSpi::exchange`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use chorus_hal::dma::DmaTrigger;
use chorus_hal::gpio::Port;
use chorus_hal::spi::{SpiControl, SpiRegisters, SpiStatus};
use chorus_hal::InterruptLevel;

#[derive(Debug)]
struct SpiState {
    port: Port,
    control: SpiControl,
    control_writes: Vec<SpiControl>,
    level: InterruptLevel,
    status: SpiStatus,
    data_in: u8,
    /// Byte waiting in the data register to be shifted out
    outgoing: Option<u8>,
    written: Vec<u8>,
    replies: VecDeque<u8>,
    auto_complete: bool,
    stuck: bool,
    data_address: usize,
    trigger: DmaTrigger,
}

#[derive(Debug, Clone)]
pub struct MockSpi {
    state: Rc<RefCell<SpiState>>,
}

impl MockSpi {
    /// Register block for the instance whose pins live on `port`
    pub fn new(port: Port, data_address: usize, trigger: u8) -> Self {
        Self {
            state: Rc::new(RefCell::new(SpiState {
                port,
                control: SpiControl::default(),
                control_writes: Vec::new(),
                level: InterruptLevel::Off,
                status: SpiStatus::empty(),
                data_in: 0,
                outgoing: None,
                written: Vec::new(),
                replies: VecDeque::new(),
                auto_complete: true,
                stuck: false,
                data_address,
                trigger: DmaTrigger(trigger),
            })),
        }
    }

    /// Queue bytes a slave returns to master writes
    pub fn queue_replies(&self, bytes: &[u8]) {
        self.state.borrow_mut().replies.extend(bytes.iter().copied());
    }

    pub fn set_auto_complete(&self, enabled: bool) {
        self.state.borrow_mut().auto_complete = enabled;
    }

    /// Never raise transfer complete
    pub fn set_stuck(&self, stuck: bool) {
        self.state.borrow_mut().stuck = stuck;
    }

    /// Take the byte waiting in the data register
    pub fn take_outgoing(&self) -> Option<u8> {
        self.state.borrow_mut().outgoing.take()
    }

    /// Finish a byte: `incoming` lands in the data register
    pub fn complete(&self, incoming: u8) {
        let mut state = self.state.borrow_mut();
        state.data_in = incoming;
        state.status.insert(SpiStatus::TRANSFER_COMPLETE);
    }

    /// Clock one byte through a slave, returning what it shifted out
    pub fn exchange(&self, incoming: u8) -> u8 {
        let outgoing = self.take_outgoing().unwrap_or(0xFF);
        self.complete(incoming);
        outgoing
    }

    /// Every byte written to the data register
    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().written.clone()
    }

    pub fn control_writes(&self) -> Vec<SpiControl> {
        self.state.borrow().control_writes.clone()
    }

    pub fn level(&self) -> InterruptLevel {
        self.state.borrow().level
    }
}

impl SpiRegisters for MockSpi {
    fn port(&self) -> Port {
        self.state.borrow().port
    }

    fn write_control(&mut self, control: SpiControl) {
        let mut state = self.state.borrow_mut();
        state.control = control;
        state.control_writes.push(control);
    }

    fn control(&self) -> SpiControl {
        self.state.borrow().control
    }

    fn set_interrupt_level(&mut self, level: InterruptLevel) {
        self.state.borrow_mut().level = level;
    }

    fn interrupt_level(&self) -> InterruptLevel {
        self.state.borrow().level
    }

    fn status(&self) -> SpiStatus {
        self.state.borrow().status
    }

    fn read_data(&mut self) -> u8 {
        let mut state = self.state.borrow_mut();
        state.status.remove(SpiStatus::TRANSFER_COMPLETE);
        state.data_in
    }

    fn write_data(&mut self, byte: u8) {
        let mut state = self.state.borrow_mut();
        state.written.push(byte);
        state.outgoing = Some(byte);
        if state.control.master && state.auto_complete && !state.stuck {
            state.outgoing = None;
            state.data_in = state.replies.pop_front().unwrap_or(0);
            state.status.insert(SpiStatus::TRANSFER_COMPLETE);
        }
    }

    fn data_address(&self) -> usize {
        self.state.borrow().data_address
    }

    fn dma_trigger(&self) -> DmaTrigger {
        self.state.borrow().trigger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master() -> MockSpi {
        let mut spi = MockSpi::new(Port::C, 0x08C3, 0x4A);
        spi.write_control(SpiControl {
            enabled: true,
            master: true,
            ..SpiControl::default()
        });
        spi
    }

    #[test]
    fn test_master_write_completes() {
        let mut spi = master();
        spi.queue_replies(&[0x5A]);
        spi.write_data(0x01);
        assert!(spi.status().contains(SpiStatus::TRANSFER_COMPLETE));
        assert_eq!(spi.read_data(), 0x5A);
        assert!(spi.status().is_empty());
        assert_eq!(spi.written(), vec![0x01]);
    }

    #[test]
    fn test_slave_exchange() {
        let mut spi = MockSpi::new(Port::D, 0x09C3, 0x6A);
        spi.write_data(0x42);
        assert!(spi.status().is_empty());
        assert_eq!(spi.exchange(0x99), 0x42);
        assert_eq!(spi.read_data(), 0x99);
        // Nothing preloaded: the line floats high.
        assert_eq!(spi.exchange(0x00), 0xFF);
    }

    #[test]
    fn test_stuck_never_completes() {
        let mut spi = master();
        spi.set_stuck(true);
        spi.write_data(0x01);
        assert!(!spi.status().contains(SpiStatus::TRANSFER_COMPLETE));
    }
}
