//! Mock TWI register blocks
//!
//! The master block talks to simulated devices attached with
//! [`MockTwi::attach`]. The slave block is driven by the test acting as a
//! remote master through [`MockTwi::address_match`], [`MockTwi::receive`],
//! [`MockTwi::master_reads`] and [`MockTwi::stop`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use chorus_hal::gpio::Port;
use chorus_hal::twi::{
    Acknowledge, BusState, MasterCommand, MasterStatus, SlaveCommand, SlaveStatus, TwiRegisters,
};
use chorus_hal::InterruptLevel;

/// How a simulated device answers its address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceBehaviour {
    Ack,
    Nack,
    /// Holds the bus without ever answering
    Stuck,
}

#[derive(Debug)]
struct Device {
    address: u8,
    behaviour: DeviceBehaviour,
    received: Vec<u8>,
    replies: VecDeque<u8>,
}

#[derive(Debug)]
struct TwiState {
    port: Port,

    master_enabled: bool,
    enable_log: Vec<bool>,
    baud_register: u8,
    bus: BusState,
    master_status: MasterStatus,
    master_data: u8,
    addresses: Vec<u8>,
    commands: Vec<(Acknowledge, MasterCommand)>,
    devices: Vec<Device>,
    /// Device index of the running transaction
    target: Option<usize>,

    slave_address: Option<u8>,
    slave_level: InterruptLevel,
    slave_status: SlaveStatus,
    slave_data: u8,
    slave_sent: Vec<u8>,
    slave_commands: Vec<(Acknowledge, SlaveCommand)>,
}

#[derive(Debug, Clone)]
pub struct MockTwi {
    state: Rc<RefCell<TwiState>>,
}

impl MockTwi {
    pub fn new(port: Port) -> Self {
        Self {
            state: Rc::new(RefCell::new(TwiState {
                port,
                master_enabled: false,
                enable_log: Vec::new(),
                baud_register: 0,
                bus: BusState::Unknown,
                master_status: MasterStatus::empty(),
                master_data: 0,
                addresses: Vec::new(),
                commands: Vec::new(),
                devices: Vec::new(),
                target: None,
                slave_address: None,
                slave_level: InterruptLevel::Off,
                slave_status: SlaveStatus::empty(),
                slave_data: 0,
                slave_sent: Vec::new(),
                slave_commands: Vec::new(),
            })),
        }
    }

    /// Put a device on the bus at 7-bit `address`
    pub fn attach(&self, address: u8, behaviour: DeviceBehaviour, replies: &[u8]) {
        self.state.borrow_mut().devices.push(Device {
            address,
            behaviour,
            received: Vec::new(),
            replies: replies.iter().copied().collect(),
        });
    }

    /// Bytes a device received from the master
    pub fn device_received(&self, address: u8) -> Vec<u8> {
        self.state
            .borrow()
            .devices
            .iter()
            .find(|d| d.address == address)
            .map(|d| d.received.clone())
            .unwrap_or_default()
    }

    /// Raise master status flags, as a faulty bus would
    pub fn inject_master_flags(&self, flags: MasterStatus) {
        self.state.borrow_mut().master_status.insert(flags);
    }

    /// Force the bus state, as another master would
    pub fn force_bus(&self, bus: BusState) {
        self.state.borrow_mut().bus = bus;
    }

    /// Every value written to the address register
    pub fn addresses(&self) -> Vec<u8> {
        self.state.borrow().addresses.clone()
    }

    /// Every write to the master enable bit
    pub fn enable_log(&self) -> Vec<bool> {
        self.state.borrow().enable_log.clone()
    }

    pub fn master_commands(&self) -> Vec<(Acknowledge, MasterCommand)> {
        self.state.borrow().commands.clone()
    }

    pub fn baud_register(&self) -> u8 {
        self.state.borrow().baud_register
    }

    pub fn bus(&self) -> BusState {
        self.state.borrow().bus
    }

    /// Slave address register, if the slave is enabled
    pub fn slave_address(&self) -> Option<u8> {
        self.state.borrow().slave_address
    }

    pub fn slave_level(&self) -> InterruptLevel {
        self.state.borrow().slave_level
    }

    /// A remote master addressed this slave
    pub fn address_match(&self, read: bool) {
        let mut state = self.state.borrow_mut();
        state.slave_status = SlaveStatus::ADDRESS_STOP_INTERRUPT | SlaveStatus::ADDRESS_MATCH;
        state.slave_status.set(SlaveStatus::READ, read);
    }

    /// A remote master wrote `byte`
    pub fn receive(&self, byte: u8) {
        let mut state = self.state.borrow_mut();
        state.slave_data = byte;
        state.slave_status = SlaveStatus::DATA_INTERRUPT;
    }

    /// A remote master wants a byte; `nack` reports it refused the last one
    pub fn master_reads(&self, nack: bool) {
        let mut state = self.state.borrow_mut();
        state.slave_status = SlaveStatus::DATA_INTERRUPT | SlaveStatus::READ;
        state.slave_status.set(SlaveStatus::RX_NACK, nack);
    }

    /// A remote master issued a stop
    pub fn stop(&self) {
        self.state.borrow_mut().slave_status = SlaveStatus::ADDRESS_STOP_INTERRUPT;
    }

    /// Raise slave status flags
    pub fn inject_slave_flags(&self, flags: SlaveStatus) {
        self.state.borrow_mut().slave_status.insert(flags);
    }

    pub fn slave_status_now(&self) -> SlaveStatus {
        self.state.borrow().slave_status
    }

    /// Bytes the slave handed to the remote master
    pub fn slave_sent(&self) -> Vec<u8> {
        self.state.borrow().slave_sent.clone()
    }

    pub fn slave_commands(&self) -> Vec<(Acknowledge, SlaveCommand)> {
        self.state.borrow().slave_commands.clone()
    }
}

impl TwiState {
    fn load_reply(&mut self) {
        let byte = self
            .target
            .and_then(|i| self.devices.get_mut(i))
            .and_then(|d| d.replies.pop_front())
            .unwrap_or(0xFF);
        self.master_data = byte;
        self.master_status = MasterStatus::READ_INTERRUPT | MasterStatus::CLOCK_HOLD;
    }
}

impl TwiRegisters for MockTwi {
    fn port(&self) -> Port {
        self.state.borrow().port
    }

    fn master_reset(&mut self) {
        let mut state = self.state.borrow_mut();
        state.master_enabled = false;
        state.baud_register = 0;
        state.master_status = MasterStatus::empty();
        state.bus = BusState::Unknown;
        state.target = None;
    }

    fn set_master_enabled(&mut self, enabled: bool) {
        let mut state = self.state.borrow_mut();
        state.master_enabled = enabled;
        state.enable_log.push(enabled);
        if !enabled {
            state.master_status = MasterStatus::empty();
            state.target = None;
        }
    }

    fn master_enabled(&self) -> bool {
        self.state.borrow().master_enabled
    }

    fn set_baud_register(&mut self, value: u8) {
        self.state.borrow_mut().baud_register = value;
    }

    fn master_status(&self) -> MasterStatus {
        self.state.borrow().master_status
    }

    fn clear_master_flags(&mut self, flags: MasterStatus) {
        self.state.borrow_mut().master_status.remove(flags);
    }

    fn bus_state(&self) -> BusState {
        self.state.borrow().bus
    }

    fn set_bus_state(&mut self, state: BusState) {
        self.state.borrow_mut().bus = state;
    }

    fn write_address(&mut self, address_rw: u8) {
        let mut state = self.state.borrow_mut();
        state.addresses.push(address_rw);
        state.bus = BusState::Owner;

        let address = address_rw >> 1;
        let read = address_rw & 0x01 != 0;
        let target = state.devices.iter().position(|d| d.address == address);
        state.target = target;

        let behaviour = target.map(|i| state.devices[i].behaviour);
        match behaviour {
            Some(DeviceBehaviour::Ack) if read => state.load_reply(),
            Some(DeviceBehaviour::Ack) => {
                state.master_status = MasterStatus::WRITE_INTERRUPT | MasterStatus::CLOCK_HOLD;
            }
            Some(DeviceBehaviour::Stuck) => state.master_status = MasterStatus::empty(),
            Some(DeviceBehaviour::Nack) | None => {
                state.master_status = MasterStatus::WRITE_INTERRUPT | MasterStatus::RX_NACK;
            }
        }
    }

    fn master_write(&mut self, byte: u8) {
        let mut state = self.state.borrow_mut();
        let target = state.target;
        if let Some(device) = target.and_then(|i| state.devices.get_mut(i)) {
            device.received.push(byte);
        }
        state.master_status = MasterStatus::WRITE_INTERRUPT | MasterStatus::CLOCK_HOLD;
    }

    fn master_read(&mut self) -> u8 {
        self.state.borrow().master_data
    }

    fn master_command(&mut self, ack: Acknowledge, command: MasterCommand) {
        let mut state = self.state.borrow_mut();
        state.commands.push((ack, command));
        match command {
            MasterCommand::Stop => {
                state.master_status = MasterStatus::empty();
                state.bus = BusState::Idle;
                state.target = None;
            }
            MasterCommand::ReceiveNext => state.load_reply(),
            MasterCommand::RepeatedStart => {}
        }
    }

    fn slave_reset(&mut self) {
        let mut state = self.state.borrow_mut();
        state.slave_address = None;
        state.slave_level = InterruptLevel::Off;
        state.slave_status = SlaveStatus::empty();
    }

    fn enable_slave(&mut self, address_register: u8, level: InterruptLevel) {
        let mut state = self.state.borrow_mut();
        state.slave_address = Some(address_register);
        state.slave_level = level;
    }

    fn slave_status(&self) -> SlaveStatus {
        self.state.borrow().slave_status
    }

    fn clear_slave_flags(&mut self, flags: SlaveStatus) {
        self.state.borrow_mut().slave_status.remove(flags);
    }

    fn slave_read(&mut self) -> u8 {
        self.state.borrow().slave_data
    }

    fn slave_write(&mut self, byte: u8) {
        self.state.borrow_mut().slave_sent.push(byte);
    }

    fn slave_command(&mut self, ack: Acknowledge, command: SlaveCommand) {
        let mut state = self.state.borrow_mut();
        state.slave_commands.push((ack, command));
        // Responding or completing releases the held clock.
        state.slave_status.remove(
            SlaveStatus::DATA_INTERRUPT
                | SlaveStatus::ADDRESS_STOP_INTERRUPT
                | SlaveStatus::CLOCK_HOLD,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_to_acking_device() {
        let mut twi = MockTwi::new(Port::C);
        twi.attach(0x50, DeviceBehaviour::Ack, &[]);
        twi.write_address(0x50 << 1);
        assert!(twi.master_status().contains(MasterStatus::WRITE_INTERRUPT));
        twi.master_write(0x12);
        twi.master_command(Acknowledge::Ack, MasterCommand::Stop);
        assert_eq!(twi.device_received(0x50), vec![0x12]);
        assert_eq!(twi.bus_state(), BusState::Idle);
    }

    #[test]
    fn test_missing_device_nacks() {
        let mut twi = MockTwi::new(Port::C);
        twi.write_address(0x33 << 1);
        assert!(twi.master_status().contains(MasterStatus::RX_NACK));
    }

    #[test]
    fn test_stuck_device_holds_bus() {
        let mut twi = MockTwi::new(Port::C);
        twi.attach(0x10, DeviceBehaviour::Stuck, &[]);
        twi.write_address(0x10 << 1);
        assert!(twi.master_status().is_empty());
        assert_eq!(twi.bus_state(), BusState::Owner);
    }

    #[test]
    fn test_read_replies() {
        let mut twi = MockTwi::new(Port::C);
        twi.attach(0x20, DeviceBehaviour::Ack, &[0xA1, 0xA2]);
        twi.write_address((0x20 << 1) | 1);
        assert_eq!(twi.master_read(), 0xA1);
        twi.master_command(Acknowledge::Ack, MasterCommand::ReceiveNext);
        assert_eq!(twi.master_read(), 0xA2);
        twi.master_command(Acknowledge::Ack, MasterCommand::ReceiveNext);
        assert_eq!(twi.master_read(), 0xFF);
    }

    #[test]
    fn test_slave_response_clears_interrupt() {
        let mut twi = MockTwi::new(Port::D);
        twi.receive(0x7E);
        assert!(twi.slave_status().contains(SlaveStatus::DATA_INTERRUPT));
        twi.slave_command(Acknowledge::Ack, SlaveCommand::Response);
        assert!(twi.slave_status().is_empty());
    }
}
