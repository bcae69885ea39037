//! SPI transfer engine
//!
//! A block transfer is armed by the foreground call and completed from
//! interrupt context, either one byte per transfer-complete interrupt or by
//! a DMA pair. The completion path raises chip-select (when the transfer
//! owns it), invokes the user callback and only then drops the bus lock.
//!
//! The DMA path programs raw buffer addresses taken from the user record.
//! The [`BusManager`] must therefore stay in place while a DMA transfer is
//! armed, which holds for a manager living in a `static` [`SharedBus`].
//!
//! [`SharedBus`]: crate::shared::SharedBus

use heapless::Vec;

use chorus_hal::dma::{AddressMode, DmaController, DmaTransfer, Reload};
use chorus_hal::gpio::Gpio;
use chorus_hal::spi::{SpiRegisters, SpiStatus};
use chorus_hal::{Board, InterruptLevel, SystemClock};

use super::{
    baud, ChipSelect, Role, SpiCallback, SpiChannelHandle, SpiUserHandle, FILLER,
    MAX_TRANSFER_LEN,
};
use crate::error::SpiError;
use crate::manager::BusManager;

/// Status polls a single-byte exchange waits before giving up
const POLL_LIMIT: u32 = 10_000;

/// In-flight block transfer of one user
#[derive(Debug)]
pub struct Transfer {
    pub(crate) tx: Vec<u8, MAX_TRANSFER_LEN>,
    pub(crate) rx: Vec<u8, MAX_TRANSFER_LEN>,
    /// Caller supplied transmit data
    pub(crate) transmit: bool,
    /// Caller wants the received bytes
    pub(crate) receive: bool,
    pub(crate) length: u16,
    pub(crate) index: u16,
    /// Transfer drives chip-select itself
    pub(crate) auto_cs: bool,
    pub(crate) active: bool,
}

impl Transfer {
    pub(crate) const fn new() -> Self {
        Self {
            tx: Vec::new(),
            rx: Vec::new(),
            transmit: false,
            receive: false,
            length: 0,
            index: 0,
            auto_cs: false,
            active: false,
        }
    }

    fn load(
        &mut self,
        tx: Option<&[u8]>,
        length: usize,
        receive: bool,
        auto_cs: bool,
    ) -> Result<(), SpiError> {
        self.tx.clear();
        self.rx.clear();
        if let Some(data) = tx {
            self.tx
                .extend_from_slice(data)
                .map_err(|_| SpiError::InvalidLength)?;
        }
        self.rx
            .resize(length, 0)
            .map_err(|_| SpiError::InvalidLength)?;

        self.transmit = tx.is_some();
        self.receive = receive;
        self.length = length as u16;
        self.index = 0;
        self.auto_cs = auto_cs;
        self.active = true;
        Ok(())
    }

    /// Byte to clock out at `index`
    fn tx_byte(&self, index: u16) -> u8 {
        self.tx.get(usize::from(index)).copied().unwrap_or(FILLER)
    }

    /// Record a received byte and advance
    fn store(&mut self, byte: u8) {
        if self.index < self.length {
            if let Some(slot) = self.rx.get_mut(usize::from(self.index)) {
                *slot = byte;
            }
            self.index += 1;
        }
    }

    /// Bytes received so far, empty if receive was not requested
    pub fn received(&self, count: u16) -> &[u8] {
        if self.receive {
            let end = usize::from(count).min(self.rx.len());
            &self.rx[..end]
        } else {
            &[]
        }
    }
}

impl<B: Board> BusManager<B> {
    /// Clock in `length` bytes, transmitting the filler byte
    ///
    /// Returns once the transfer is armed; the user callback receives the
    /// bytes. With `auto_cs` the transfer lowers and raises chip-select.
    pub fn spi_read_block(
        &mut self,
        user: SpiUserHandle,
        length: usize,
        auto_cs: bool,
    ) -> Result<(), SpiError> {
        self.start_transfer(user, None, length, true, auto_cs)
    }

    /// Clock out `data`, discarding what comes back
    pub fn spi_write_block(
        &mut self,
        user: SpiUserHandle,
        data: &[u8],
        auto_cs: bool,
    ) -> Result<(), SpiError> {
        self.start_transfer(user, Some(data), data.len(), false, auto_cs)
    }

    /// Exchange `data` for the same number of received bytes
    pub fn spi_read_write_block(
        &mut self,
        user: SpiUserHandle,
        data: &[u8],
        auto_cs: bool,
    ) -> Result<(), SpiError> {
        self.start_transfer(user, Some(data), data.len(), true, auto_cs)
    }

    fn start_transfer(
        &mut self,
        user: SpiUserHandle,
        tx: Option<&[u8]>,
        length: usize,
        receive: bool,
        auto_cs: bool,
    ) -> Result<(), SpiError> {
        let channel_handle = self
            .spi_users
            .get(user)
            .map(|u| u.channel)
            .ok_or(SpiError::InvalidHandle)?;
        let channel = self
            .spi_channels
            .get_mut(channel_handle)
            .ok_or(SpiError::InvalidHandle)?;

        if length == 0 || length > MAX_TRANSFER_LEN {
            return Err(SpiError::InvalidLength);
        }

        channel.acquire(user)?;
        let role = channel.role;
        let dma = channel.dma;
        // An earlier write-only DMA transfer leaves received bytes here.
        channel.scratch = FILLER;
        let scratch = &channel.scratch as *const u8 as usize;
        let regs = &mut self.spi_ports[channel.id.index()];

        let Some(record) = self.spi_users.get_mut(user) else {
            channel.release_lock();
            return Err(SpiError::InvalidHandle);
        };
        if let Err(e) = record.transfer.load(tx, length, receive, auto_cs) {
            channel.release_lock();
            return Err(e);
        }
        let transfer = &record.transfer;
        let cs = record.cs;

        match dma {
            Some(pair) => {
                regs.set_interrupt_level(InterruptLevel::Off);

                let data = regs.data_address();
                let trigger = regs.dma_trigger();
                let (tx_base, tx_mode) = if transfer.transmit {
                    (transfer.tx.as_ptr() as usize, AddressMode::Increment)
                } else {
                    (scratch, AddressMode::Fixed)
                };
                let (rx_base, rx_mode) = if transfer.receive {
                    (transfer.rx.as_ptr() as usize, AddressMode::Increment)
                } else {
                    (scratch, AddressMode::Fixed)
                };

                // The master clocks its first byte by hand.
                let tx_offset = match role {
                    Role::Master => 1,
                    Role::Slave => 0,
                };
                let tx_block = transfer.length - tx_offset as u16;
                let tx_source = if tx_mode == AddressMode::Increment {
                    tx_base + tx_offset
                } else {
                    tx_base
                };

                let rx_transfer = DmaTransfer {
                    source: data,
                    source_mode: AddressMode::Fixed,
                    source_reload: Reload::Never,
                    destination: rx_base,
                    destination_mode: rx_mode,
                    destination_reload: Reload::EndOfBlock,
                    block_size: transfer.length,
                    trigger,
                };
                let tx_transfer = DmaTransfer {
                    source: tx_source,
                    source_mode: tx_mode,
                    source_reload: Reload::EndOfBlock,
                    destination: data,
                    destination_mode: AddressMode::Fixed,
                    destination_reload: Reload::Never,
                    block_size: tx_block,
                    trigger,
                };

                let armed = self
                    .dma
                    .configure(pair.rx, &rx_transfer)
                    .and_then(|_| self.dma.enable(pair.rx))
                    .and_then(|_| {
                        if tx_block == 0 {
                            return Ok(());
                        }
                        self.dma
                            .configure(pair.tx, &tx_transfer)
                            .and_then(|_| self.dma.enable(pair.tx))
                    });
                if let Err(e) = armed {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("SPI {} DMA arm failed: {:?}", channel.id, e);
                    let _ = self.dma.disable(pair.rx);
                    let _ = self.dma.disable(pair.tx);
                    record.transfer.active = false;
                    channel.release_lock();
                    return Err(e.into());
                }
            }
            None => regs.set_interrupt_level(InterruptLevel::High),
        }

        match role {
            Role::Master => {
                if auto_cs {
                    self.gpio.set_low(cs);
                }
                regs.write_data(transfer.tx_byte(0));
            }
            Role::Slave if dma.is_none() => {
                // Wait in the data register for the master's first clock.
                regs.write_data(transfer.tx_byte(0));
            }
            Role::Slave => {}
        }

        Ok(())
    }

    /// Exchange one byte by polling, returning the byte received
    pub fn spi_read_byte(&mut self, user: SpiUserHandle) -> Result<u8, SpiError> {
        self.polled_exchange(user, FILLER)
    }

    /// Send one byte by polling
    pub fn spi_write_byte(&mut self, user: SpiUserHandle, byte: u8) -> Result<(), SpiError> {
        self.polled_exchange(user, byte).map(|_| ())
    }

    fn polled_exchange(&mut self, user: SpiUserHandle, byte: u8) -> Result<u8, SpiError> {
        let channel_handle = self
            .spi_users
            .get(user)
            .map(|u| u.channel)
            .ok_or(SpiError::InvalidHandle)?;
        let channel = self
            .spi_channels
            .get_mut(channel_handle)
            .ok_or(SpiError::InvalidHandle)?;

        // A caller holding chip-select keeps the lock across bytes.
        let held = channel.owner() == Some(user);
        channel.acquire(user)?;

        let regs = &mut self.spi_ports[channel.id.index()];
        regs.set_interrupt_level(InterruptLevel::Off);
        regs.write_data(byte);

        let mut result = Err(SpiError::HalFailed);
        for _ in 0..POLL_LIMIT {
            if regs.status().contains(SpiStatus::TRANSFER_COMPLETE) {
                result = Ok(regs.read_data());
                break;
            }
        }

        if !held {
            channel.release_lock();
        }
        result
    }

    /// Drive chip-select by hand
    ///
    /// Asserting takes the bus lock and keeps it; deasserting hands it back.
    /// Deasserting fails with [`SpiError::Busy`] while a block transfer of
    /// the same user is still armed.
    pub fn spi_set_chip_select(
        &mut self,
        user: SpiUserHandle,
        state: ChipSelect,
    ) -> Result<(), SpiError> {
        let (channel_handle, cs, active) = self
            .spi_users
            .get(user)
            .map(|u| (u.channel, u.cs, u.transfer.active))
            .ok_or(SpiError::InvalidHandle)?;
        let channel = self
            .spi_channels
            .get_mut(channel_handle)
            .ok_or(SpiError::InvalidHandle)?;

        match state {
            ChipSelect::Assert => {
                channel.acquire(user)?;
                self.spi_ports[channel.id.index()].set_interrupt_level(InterruptLevel::Off);
                self.gpio.set_low(cs);
            }
            ChipSelect::Deassert => {
                channel.check_access(user)?;
                // The lock belongs to the armed transfer until it completes.
                if active {
                    return Err(SpiError::Busy);
                }
                self.gpio.set_high(cs);
                channel.release_lock();
            }
        }
        Ok(())
    }

    /// Change the channel clock, returning the rate actually produced
    pub fn spi_set_baud_rate(&mut self, user: SpiUserHandle, baud: u32) -> Result<u32, SpiError> {
        let channel_handle = self
            .spi_users
            .get(user)
            .map(|u| u.channel)
            .ok_or(SpiError::InvalidHandle)?;
        let cpu_hz = self.clock.cpu_frequency();
        let channel = self
            .spi_channels
            .get_mut(channel_handle)
            .ok_or(SpiError::InvalidHandle)?;

        channel.check_access(user)?;
        let timing = baud::select(cpu_hz, baud, channel.role)?;
        channel.timing = timing;

        let regs = &mut self.spi_ports[channel.id.index()];
        regs.write_control(channel.control(false));
        regs.write_control(channel.control(true));

        Ok(timing.actual)
    }

    /// Replace the completion callback of a user
    pub fn spi_set_callback(
        &mut self,
        user: SpiUserHandle,
        callback: Option<SpiCallback>,
    ) -> Result<(), SpiError> {
        let channel_handle = self
            .spi_users
            .get(user)
            .map(|u| u.channel)
            .ok_or(SpiError::InvalidHandle)?;
        let locked = self
            .spi_channels
            .get(channel_handle)
            .map(|c| c.locked)
            .ok_or(SpiError::InvalidHandle)?;
        if locked {
            return Err(SpiError::Busy);
        }

        if let Some(record) = self.spi_users.get_mut(user) {
            record.callback = callback;
        }
        Ok(())
    }

    /// Transfer-complete interrupt of a byte-stepped channel
    pub(crate) fn spi_byte_step(&mut self, channel_handle: SpiChannelHandle) {
        let Some(channel) = self.spi_channels.get(channel_handle) else {
            return;
        };
        if channel.dma.is_some() {
            return;
        }
        let role = channel.role;
        let owner = channel.owner();
        let regs = &mut self.spi_ports[channel.id.index()];

        let byte = regs.read_data();
        let record = owner.and_then(|user| self.spi_users.get_mut(user));
        let Some(record) = record.filter(|r| r.transfer.active) else {
            if role == Role::Slave {
                regs.write_data(FILLER);
            } else {
                #[cfg(feature = "defmt")]
                defmt::warn!("SPI {} byte with no transfer", channel.id);
            }
            return;
        };
        let transfer = &mut record.transfer;

        match role {
            Role::Master => {
                transfer.store(byte);
                if transfer.index < transfer.length {
                    regs.write_data(transfer.tx_byte(transfer.index));
                    return;
                }
            }
            Role::Slave => {
                // Bytes clocked while deselected belong to another slave.
                if self.gpio.is_low(record.cs) {
                    transfer.store(byte);
                    regs.write_data(transfer.tx_byte(transfer.index));
                }
                return;
            }
        }

        let count = transfer.index;
        if let Some(user) = owner {
            self.finish_spi(channel_handle, user, count);
        }
    }

    /// RX DMA completion of a master channel
    pub(crate) fn spi_master_dma(&mut self, channel_handle: SpiChannelHandle) {
        let Some(channel) = self.spi_channels.get(channel_handle) else {
            return;
        };
        let (Some(pair), Some(user)) = (channel.dma, channel.owner()) else {
            return;
        };

        let count = self.dma.transferred(pair.rx);
        let _ = self.dma.disable(pair.rx);
        let _ = self.dma.disable(pair.tx);
        self.finish_spi(channel_handle, user, count);
    }

    /// Chip-select release seen by a slave user
    ///
    /// The master decides the transfer length, so the transfer ends here.
    /// An edge with nothing exchanged leaves the transfer armed.
    pub(crate) fn spi_chip_select_edge(&mut self, user: SpiUserHandle) {
        let Some(record) = self.spi_users.get(user) else {
            return;
        };
        let channel_handle = record.channel;
        let index = record.transfer.index;
        let Some(channel) = self.spi_channels.get(channel_handle) else {
            return;
        };
        if channel.owner() != Some(user) {
            return;
        }

        let count = match channel.dma {
            Some(pair) => self.dma.transferred(pair.rx),
            None => index,
        };
        if count == 0 {
            return;
        }

        if let Some(pair) = channel.dma {
            let _ = self.dma.disable(pair.rx);
            let _ = self.dma.disable(pair.tx);
        }
        self.finish_spi(channel_handle, user, count);
        if let Some(record) = self.spi_users.get_mut(user) {
            record.transfer.index = 0;
        }
    }

    /// Raise chip-select, report to the user, then free the bus
    fn finish_spi(&mut self, channel_handle: SpiChannelHandle, user: SpiUserHandle, count: u16) {
        let Some(role) = self.spi_channels.get(channel_handle).map(|c| c.role) else {
            return;
        };
        let Some(record) = self.spi_users.get_mut(user) else {
            return;
        };

        record.transfer.active = false;
        if role == Role::Master && record.transfer.auto_cs {
            self.gpio.set_high(record.cs);
        }
        if let Some(callback) = record.callback {
            callback(record.transfer.received(count), count);
        }

        if let Some(channel) = self.spi_channels.get_mut(channel_handle) {
            channel.release_lock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_hal::dma::{DmaChannel, DmaEvent};
    use chorus_hal::gpio::{PinId, Port};
    use chorus_hal::spi::Prescaler;
    use proptest::prelude::*;

    use crate::event::Interrupt;
    use crate::spi::{SpiConfig, SpiId};
    use crate::testing::{
        manager, on_slave_done, on_spi_done, pump_spi, take_slave_done, take_spi_done, Probes,
    };
    use chorus_hal_mock::MockBoard;

    const MASTER_CS: PinId = PinId { port: Port::A, pin: 0 };
    const OTHER_CS: PinId = PinId { port: Port::A, pin: 1 };
    const SLAVE_CS: PinId = PinId { port: Port::B, pin: 3 };

    fn master(dma: bool) -> (BusManager<MockBoard>, Probes, SpiUserHandle) {
        let (mut bus, probes) = manager();
        let config = SpiConfig {
            dma,
            ..SpiConfig::default()
        };
        bus.configure_spi(SpiId::Spi1, config).unwrap();
        let user = bus
            .request_spi(SpiId::Spi1, Some(on_spi_done), Port::A, 0)
            .unwrap();
        (bus, probes, user)
    }

    fn add_slave(bus: &mut BusManager<MockBoard>, dma: bool) -> SpiUserHandle {
        let config = SpiConfig {
            role: Role::Slave,
            dma,
            ..SpiConfig::default()
        };
        bus.configure_spi(SpiId::Spi2, config).unwrap();
        bus.request_spi(SpiId::Spi2, Some(on_slave_done), Port::B, 3)
            .unwrap()
    }

    fn is_locked(bus: &BusManager<MockBoard>) -> bool {
        let handle = bus.find_spi(SpiId::Spi1).unwrap();
        bus.spi_channel(handle).unwrap().is_locked()
    }

    #[test]
    fn test_load_and_step() {
        let mut t = Transfer::new();
        t.load(Some(&[1, 2, 3]), 3, true, true).unwrap();
        assert!(t.active);
        assert_eq!(t.tx_byte(0), 1);
        assert_eq!(t.tx_byte(3), FILLER);

        for b in [0x10, 0x20, 0x30, 0x40] {
            t.store(b);
        }
        // Index stops at the length.
        assert_eq!(t.index, 3);
        assert_eq!(t.received(3), &[0x10, 0x20, 0x30]);
    }

    #[test]
    fn test_read_only_uses_filler() {
        let mut t = Transfer::new();
        t.load(None, 2, true, false).unwrap();
        assert!(!t.transmit);
        assert_eq!(t.tx_byte(0), FILLER);
        assert_eq!(t.tx_byte(1), FILLER);
    }

    #[test]
    fn test_write_only_reports_nothing() {
        let mut t = Transfer::new();
        t.load(Some(&[9]), 1, false, false).unwrap();
        t.store(0x55);
        assert!(t.received(1).is_empty());
    }

    #[test]
    fn test_reload_clears_previous() {
        let mut t = Transfer::new();
        t.load(Some(&[1, 2, 3, 4]), 4, true, false).unwrap();
        t.store(7);
        t.load(Some(&[5]), 1, true, false).unwrap();
        assert_eq!(t.index, 0);
        assert_eq!(t.tx.len(), 1);
        assert_eq!(t.rx.len(), 1);
    }

    #[test]
    fn test_master_write_block_byte_path() {
        let (mut bus, probes, user) = master(false);
        bus.spi_write_block(user, &[1, 2, 3, 4], true).unwrap();
        assert!(is_locked(&bus));
        assert!(!probes.gpio.level(MASTER_CS));

        assert_eq!(pump_spi(&mut bus, &probes.spi[0], SpiId::Spi1), 4);

        assert_eq!(take_spi_done(), vec![(vec![], 4)]);
        assert_eq!(probes.spi[0].written(), vec![1, 2, 3, 4]);
        assert!(!is_locked(&bus));
        assert!(probes.gpio.level(MASTER_CS));
    }

    #[test]
    fn test_master_read_block_reports_bytes() {
        let (mut bus, probes, user) = master(false);
        probes.spi[0].queue_replies(&[0xA0, 0xA1, 0xA2]);
        bus.spi_read_block(user, 3, true).unwrap();
        pump_spi(&mut bus, &probes.spi[0], SpiId::Spi1);

        assert_eq!(take_spi_done(), vec![(vec![0xA0, 0xA1, 0xA2], 3)]);
        assert_eq!(probes.spi[0].written(), vec![FILLER; 3]);
    }

    #[test]
    fn test_master_read_write_block() {
        let (mut bus, probes, user) = master(false);
        probes.spi[0].queue_replies(&[9, 8]);
        bus.spi_read_write_block(user, &[0x10, 0x20], false).unwrap();
        // Chip-select stays where the caller left it.
        assert!(probes.gpio.level(MASTER_CS));
        pump_spi(&mut bus, &probes.spi[0], SpiId::Spi1);

        assert_eq!(take_spi_done(), vec![(vec![9, 8], 2)]);
        assert_eq!(probes.spi[0].written(), vec![0x10, 0x20]);
    }

    #[test]
    fn test_invalid_length_does_not_lock() {
        let (mut bus, _probes, user) = master(false);
        assert_eq!(
            bus.spi_write_block(user, &[], true),
            Err(SpiError::InvalidLength)
        );
        assert_eq!(
            bus.spi_read_block(user, MAX_TRANSFER_LEN + 1, true),
            Err(SpiError::InvalidLength)
        );
        assert!(!is_locked(&bus));
    }

    #[test]
    fn test_second_user_is_busy_until_completion() {
        let (mut bus, probes, first) = master(false);
        let second = bus
            .request_spi(SpiId::Spi1, Some(on_spi_done), Port::A, 1)
            .unwrap();
        probes.spi[0].set_auto_complete(false);

        bus.spi_write_block(first, &[1, 2], true).unwrap();
        assert_eq!(bus.spi_write_block(second, &[3], true), Err(SpiError::Busy));
        assert_eq!(bus.spi_read_byte(second), Err(SpiError::Busy));
        assert_eq!(
            bus.spi_set_chip_select(second, ChipSelect::Assert),
            Err(SpiError::Busy)
        );
        assert_eq!(bus.spi_set_callback(second, None), Err(SpiError::Busy));
        assert_eq!(bus.spi_set_baud_rate(second, 4_000_000), Err(SpiError::Busy));
        // The other user's chip-select was never touched.
        assert!(probes.gpio.level(OTHER_CS));

        probes.spi[0].set_auto_complete(true);
        assert_eq!(probes.spi[0].take_outgoing(), Some(1));
        probes.spi[0].complete(0);
        pump_spi(&mut bus, &probes.spi[0], SpiId::Spi1);
        assert_eq!(take_spi_done(), vec![(vec![], 2)]);

        bus.spi_write_block(second, &[3], true).unwrap();
        pump_spi(&mut bus, &probes.spi[0], SpiId::Spi1);
        assert_eq!(take_spi_done(), vec![(vec![], 1)]);
    }

    #[test]
    fn test_owner_may_restart_while_locked() {
        let (mut bus, probes, user) = master(false);
        probes.spi[0].set_auto_complete(false);
        bus.spi_write_block(user, &[1], true).unwrap();
        // Re-acquiring by the same user is allowed.
        bus.spi_write_block(user, &[2], true).unwrap();
        assert_eq!(probes.spi[0].written(), vec![1, 2]);
    }

    #[test]
    fn test_manual_chip_select_holds_bus() {
        let (mut bus, probes, user) = master(false);
        let other = bus.request_spi(SpiId::Spi1, None, Port::A, 1).unwrap();

        bus.spi_set_chip_select(user, ChipSelect::Assert).unwrap();
        assert!(!probes.gpio.level(MASTER_CS));
        assert_eq!(probes.spi[0].level(), InterruptLevel::Off);

        bus.spi_write_byte(user, 0x9F).unwrap();
        probes.spi[0].queue_replies(&[0x42]);
        assert_eq!(bus.spi_read_byte(user), Ok(0x42));
        assert!(is_locked(&bus));
        assert_eq!(bus.spi_read_byte(other), Err(SpiError::Busy));
        assert_eq!(
            bus.spi_set_chip_select(other, ChipSelect::Deassert),
            Err(SpiError::Busy)
        );

        bus.spi_set_chip_select(user, ChipSelect::Deassert).unwrap();
        assert!(probes.gpio.level(MASTER_CS));
        assert!(!is_locked(&bus));
        assert_eq!(probes.spi[0].written(), vec![0x9F, FILLER]);
    }

    #[test]
    fn test_deassert_rejected_while_transfer_armed() {
        let (mut bus, probes, user) = master(false);
        let other = bus.request_spi(SpiId::Spi1, None, Port::A, 1).unwrap();
        probes.spi[0].set_auto_complete(false);

        bus.spi_set_chip_select(user, ChipSelect::Assert).unwrap();
        bus.spi_write_block(user, &[1, 2], false).unwrap();
        assert_eq!(
            bus.spi_set_chip_select(user, ChipSelect::Deassert),
            Err(SpiError::Busy)
        );
        assert!(!probes.gpio.level(MASTER_CS));
        assert_eq!(bus.spi_write_block(other, &[9], true), Err(SpiError::Busy));

        for _ in 0..2 {
            assert!(probes.spi[0].take_outgoing().is_some());
            probes.spi[0].complete(0);
            bus.on_interrupt(Interrupt::spi(SpiId::Spi1));
        }
        assert_eq!(take_spi_done(), vec![(vec![], 2)]);
        assert!(!is_locked(&bus));
        bus.spi_set_chip_select(user, ChipSelect::Deassert).unwrap();
        assert!(probes.gpio.level(MASTER_CS));
    }

    #[test]
    fn test_polled_byte_releases_lock() {
        let (mut bus, probes, user) = master(false);
        probes.spi[0].queue_replies(&[0x5A]);
        assert_eq!(bus.spi_read_byte(user), Ok(0x5A));
        assert!(!is_locked(&bus));
        // No callback for polled bytes.
        assert!(take_spi_done().is_empty());
    }

    #[test]
    fn test_polled_byte_times_out() {
        let (mut bus, probes, user) = master(false);
        probes.spi[0].set_stuck(true);
        assert_eq!(bus.spi_write_byte(user, 0x01), Err(SpiError::HalFailed));
        assert!(!is_locked(&bus));
    }

    #[test]
    fn test_set_baud_rate_reprograms_control() {
        let (mut bus, probes, user) = master(false);
        assert_eq!(bus.spi_set_baud_rate(user, 8_000_000), Ok(8_000_000));

        let handle = bus.find_spi(SpiId::Spi1).unwrap();
        assert_eq!(bus.spi_channel(handle).unwrap().baud(), 8_000_000);
        let last = *probes.spi[0].control_writes().last().unwrap();
        assert!(last.enabled);
        assert_eq!(last.prescaler, Prescaler::Div4);

        assert_eq!(
            bus.spi_set_baud_rate(user, 100),
            Err(SpiError::InvalidBaudRate)
        );
        assert_eq!(bus.spi_channel(handle).unwrap().baud(), 8_000_000);
    }

    #[test]
    fn test_set_callback_replaces_callback() {
        let (mut bus, probes, user) = master(false);
        bus.spi_set_callback(user, None).unwrap();
        bus.spi_write_block(user, &[1], true).unwrap();
        pump_spi(&mut bus, &probes.spi[0], SpiId::Spi1);
        assert!(take_spi_done().is_empty());
        assert!(!is_locked(&bus));
    }

    #[test]
    fn test_master_dma_programming_and_completion() {
        let (mut bus, probes, user) = master(true);
        let handle = bus.find_spi(SpiId::Spi1).unwrap();
        let pair = bus.spi_channel(handle).unwrap().dma().unwrap();

        bus.spi_write_block(user, &[1, 2, 3, 4], true).unwrap();
        assert_eq!(probes.spi[0].level(), InterruptLevel::Off);
        assert_eq!(probes.spi[0].written(), vec![1]);

        let rx = probes.dma.transfer(pair.rx).unwrap();
        assert_eq!(rx.block_size, 4);
        assert_eq!(rx.source, 0x08C3);
        assert_eq!(rx.source_mode, AddressMode::Fixed);
        // Write-only: received bytes land on the scratch byte.
        assert_eq!(rx.destination_mode, AddressMode::Fixed);

        let tx = probes.dma.transfer(pair.tx).unwrap();
        assert_eq!(tx.block_size, 3);
        assert_eq!(tx.source_mode, AddressMode::Increment);
        assert_eq!(tx.destination, 0x08C3);
        assert_eq!(tx.trigger, rx.trigger);
        assert!(probes.dma.is_enabled(pair.rx));
        assert!(probes.dma.is_enabled(pair.tx));

        // Byte interrupts are ignored on a DMA channel.
        bus.on_interrupt(Interrupt::spi(SpiId::Spi1));
        assert!(take_spi_done().is_empty());

        probes.dma.set_transferred(pair.rx, 4);
        bus.on_interrupt(Interrupt::dma(pair.rx, DmaEvent::TransferComplete));

        assert_eq!(take_spi_done(), vec![(vec![], 4)]);
        assert!(!is_locked(&bus));
        assert!(probes.gpio.level(MASTER_CS));
        assert!(!probes.dma.is_enabled(pair.rx));
        assert!(!probes.dma.is_enabled(pair.tx));
    }

    #[test]
    fn test_read_after_dma_write_sends_filler() {
        let (mut bus, probes, user) = master(true);
        let handle = bus.find_spi(SpiId::Spi1).unwrap();
        let pair = bus.spi_channel(handle).unwrap().dma().unwrap();

        bus.spi_write_block(user, &[1, 2, 3], true).unwrap();
        let sink = probes.dma.transfer(pair.rx).unwrap().destination;
        // The RX DMA parks the last MISO byte on the scratch byte.
        bus.spi_channels.get_mut(handle).unwrap().scratch = 0x42;
        probes.dma.set_transferred(pair.rx, 3);
        bus.on_interrupt(Interrupt::dma(pair.rx, DmaEvent::TransferComplete));
        assert_eq!(take_spi_done(), vec![(vec![], 3)]);

        bus.spi_read_block(user, 3, true).unwrap();
        let tx = probes.dma.transfer(pair.tx).unwrap();
        assert_eq!(tx.source, sink);
        assert_eq!(tx.source_mode, AddressMode::Fixed);
        assert_eq!(bus.spi_channel(handle).unwrap().scratch, FILLER);
    }

    #[test]
    fn test_master_dma_single_byte_skips_tx() {
        let (mut bus, probes, user) = master(true);
        let handle = bus.find_spi(SpiId::Spi1).unwrap();
        let pair = bus.spi_channel(handle).unwrap().dma().unwrap();

        bus.spi_read_block(user, 1, true).unwrap();
        let rx = probes.dma.transfer(pair.rx).unwrap();
        assert_eq!(rx.block_size, 1);
        assert_eq!(rx.destination_mode, AddressMode::Increment);
        assert!(probes.dma.transfer(pair.tx).is_none());
        assert!(!probes.dma.is_enabled(pair.tx));
        assert_eq!(probes.spi[0].written(), vec![FILLER]);
    }

    #[test]
    fn test_slave_dma_completes_on_chip_select() {
        let (mut bus, probes) = manager();
        let user = add_slave(&mut bus, true);
        let handle = bus.find_spi(SpiId::Spi2).unwrap();
        let pair = bus.spi_channel(handle).unwrap().dma().unwrap();

        bus.spi_read_block(user, 4, false).unwrap();
        // The slave never writes the data register itself.
        assert!(probes.spi[1].written().is_empty());
        let tx = probes.dma.transfer(pair.tx).unwrap();
        assert_eq!(tx.block_size, 4);
        assert_eq!(tx.source_mode, AddressMode::Fixed);

        probes.dma.set_transferred(pair.rx, 3);
        assert!(probes.gpio.drive(SLAVE_CS, true));
        bus.on_interrupt(Interrupt::rising_edge(SLAVE_CS));

        assert_eq!(take_slave_done(), vec![(vec![0, 0, 0], 3)]);
        assert!(!bus.spi_channel(handle).unwrap().is_locked());
        assert!(!probes.dma.is_enabled(pair.rx));
    }

    #[test]
    fn test_slave_edge_without_data_stays_armed() {
        let (mut bus, probes) = manager();
        let user = add_slave(&mut bus, false);
        bus.spi_read_block(user, 2, false).unwrap();

        assert!(probes.gpio.drive(SLAVE_CS, true));
        bus.on_interrupt(Interrupt::rising_edge(SLAVE_CS));

        assert!(take_slave_done().is_empty());
        let handle = bus.find_spi(SpiId::Spi2).unwrap();
        assert_eq!(bus.spi_channel(handle).unwrap().owner(), Some(user));
    }

    #[test]
    fn test_slave_ignores_bytes_while_deselected() {
        let (mut bus, probes) = manager();
        let user = add_slave(&mut bus, false);
        probes.gpio.drive(SLAVE_CS, true);
        bus.spi_read_block(user, 2, false).unwrap();

        assert_eq!(probes.spi[1].exchange(0x33), FILLER);
        bus.on_interrupt(Interrupt::spi(SpiId::Spi2));
        assert_eq!(bus.spi_user(user).unwrap().index(), 0);
    }

    #[test]
    fn test_idle_slave_answers_filler() {
        let (mut bus, probes) = manager();
        add_slave(&mut bus, false);

        probes.spi[1].complete(0x12);
        bus.on_interrupt(Interrupt::spi(SpiId::Spi2));
        assert_eq!(probes.spi[1].take_outgoing(), Some(FILLER));
    }

    #[test]
    fn test_release_while_armed_drops_lock() {
        let (mut bus, probes, user) = master(false);
        probes.spi[0].set_auto_complete(false);
        bus.spi_write_block(user, &[1, 2], true).unwrap();

        bus.release_spi_user(user).unwrap();
        assert!(bus.find_spi(SpiId::Spi1).is_none());
        // A late interrupt finds nothing to route to.
        probes.spi[0].complete(0);
        bus.on_interrupt(Interrupt::spi(SpiId::Spi1));
        assert!(take_spi_done().is_empty());
    }

    #[test]
    fn test_stale_dma_interrupt_is_dropped() {
        let (mut bus, _probes, _user) = master(true);
        bus.on_interrupt(Interrupt::dma(DmaChannel(3), DmaEvent::TransferComplete));
        assert!(take_spi_done().is_empty());
    }

    type Completions = std::vec::Vec<(std::vec::Vec<u8>, u16)>;

    fn loopback(data: &[u8]) -> (Completions, Completions) {
        let (mut bus, probes, master_user) = master(false);
        let slave_user = add_slave(&mut bus, false);
        let (mosi_port, miso_port) = (&probes.spi[0], &probes.spi[1]);
        mosi_port.set_auto_complete(false);

        bus.spi_read_block(slave_user, data.len(), false).unwrap();
        bus.spi_write_block(master_user, data, true).unwrap();
        probes.gpio.drive(SLAVE_CS, false);

        for _ in 0..data.len() {
            let mosi = mosi_port.take_outgoing().unwrap();
            let miso = miso_port.exchange(mosi);
            bus.on_interrupt(Interrupt::spi(SpiId::Spi2));
            mosi_port.complete(miso);
            bus.on_interrupt(Interrupt::spi(SpiId::Spi1));
        }

        assert!(probes.gpio.drive(SLAVE_CS, true));
        bus.on_interrupt(Interrupt::rising_edge(SLAVE_CS));
        (take_spi_done(), take_slave_done())
    }

    #[test]
    fn test_master_to_slave_loopback() {
        let (master_done, slave_done) = loopback(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(master_done, vec![(vec![], 4)]);
        assert_eq!(slave_done, vec![(vec![0xDE, 0xAD, 0xBE, 0xEF], 4)]);
    }

    proptest! {
        #[test]
        fn prop_slave_receives_master_block(
            data in proptest::collection::vec(any::<u8>(), 1..=64)
        ) {
            let (master_done, slave_done) = loopback(&data);
            prop_assert_eq!(master_done, vec![(vec![], data.len() as u16)]);
            prop_assert_eq!(slave_done, vec![(data.clone(), data.len() as u16)]);
        }
    }
}
