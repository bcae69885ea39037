//! TWI master state machine
//!
//! [`step`] reacts to one snapshot of the master status register. It runs
//! from the master interrupt and, for blocking transfers, from the polling
//! loop of the calling thread. Status bits are handled in priority order:
//! arbitration lost, bus error, NACK, write, read.

use chorus_hal::twi::{Acknowledge, BusState, MasterCommand, MasterStatus, TwiRegisters};
use chorus_hal::{Board, MicrosecondClock};

use super::{BusHealth, TwiChannel, TwiHandle, TwiRole, TwiStatus};
use crate::error::TwiError;
use crate::manager::BusManager;
use crate::spi::MAX_TRANSFER_LEN;

/// Read/write bit of the address byte
const READ: u8 = 0x01;

/// Advance the master transaction by one status snapshot
pub(crate) fn step<R, T>(channel: &mut TwiChannel, regs: &mut R, timer: &mut T)
where
    R: TwiRegisters,
    T: MicrosecondClock,
{
    let status = regs.master_status();

    if status.contains(MasterStatus::ARBITRATION_LOST) {
        regs.master_command(Acknowledge::Ack, MasterCommand::Stop);
        regs.clear_master_flags(MasterStatus::ARBITRATION_LOST);
        channel.status = TwiStatus::ArbLost;
        channel.monitor.touch(timer.now_us());
    } else if status.contains(MasterStatus::BUS_ERROR) {
        channel.monitor.touch(timer.now_us());
        regs.master_command(Acknowledge::Ack, MasterCommand::Stop);
        regs.clear_master_flags(MasterStatus::BUS_ERROR);
        channel.status = TwiStatus::BusError;
    } else if status.contains(MasterStatus::RX_NACK) {
        regs.master_command(Acknowledge::Ack, MasterCommand::Stop);
        channel.status = TwiStatus::NackReceived;
    } else if status.contains(MasterStatus::WRITE_INTERRUPT) {
        channel.monitor.touch(timer.now_us());
        if channel.index < channel.length {
            let byte = channel.data[usize::from(channel.index)];
            regs.master_write(byte);
            channel.index += 1;
        } else {
            regs.master_command(Acknowledge::Ack, MasterCommand::Stop);
            channel.status = TwiStatus::TransComplete;
        }
    } else if status.contains(MasterStatus::READ_INTERRUPT) {
        channel.monitor.touch(timer.now_us());
        if channel.index < channel.length {
            channel.data[usize::from(channel.index)] = regs.master_read();
            channel.index += 1;
            regs.master_command(Acknowledge::Ack, MasterCommand::ReceiveNext);
        } else {
            regs.master_command(Acknowledge::Nack, MasterCommand::Stop);
            channel.status = TwiStatus::TransComplete;
        }
    }
}

/// Re-enable a stalled master and force the bus idle
fn recover<R: TwiRegisters>(channel: &mut TwiChannel, regs: &mut R) {
    #[cfg(feature = "defmt")]
    defmt::warn!("TWI {} bus stalled, resetting master", channel.id);

    regs.set_master_enabled(false);
    regs.set_master_enabled(true);
    channel.status = TwiStatus::BusLocked;
    regs.set_bus_state(BusState::Idle);
}

/// Where a blocking master transaction stands between polls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Phase {
    /// Decide whether another attempt is due
    Attempt,
    /// Wait for the bus to go idle before addressing the slave
    WaitIdle,
    /// Step the transaction until the bus is idle again
    Transfer,
}

/// A master transaction armed for polling
///
/// Returned by [`BusManager::twi_master_start_write`] and
/// [`BusManager::twi_master_start_read`], then advanced with
/// [`BusManager::twi_master_poll`] until that reports a final status.
/// Each poll does a bounded amount of work, so callers sharing the manager
/// can release it between polls.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MasterTransaction {
    handle: TwiHandle,
    address_rw: u8,
    /// Attempts left after the current one
    remaining: i16,
    phase: Phase,
}

impl MasterTransaction {
    fn new(handle: TwiHandle, address_rw: u8, retries: u8) -> Self {
        Self {
            handle,
            address_rw,
            remaining: i16::from(retries),
            phase: Phase::Attempt,
        }
    }

    pub fn handle(&self) -> TwiHandle {
        self.handle
    }
}

impl<B: Board> BusManager<B> {
    /// Write `data` to the slave at `address`
    ///
    /// Blocks until the transaction completes or `retries` further attempts
    /// have failed, and returns the last status observed. An empty `data`
    /// addresses the slave without sending a byte.
    ///
    /// The whole wait happens inside this call. Through a
    /// [`SharedBus`](crate::shared::SharedBus) use its
    /// `twi_master_write` instead, which drops the lock between polls.
    pub fn twi_master_write(
        &mut self,
        handle: TwiHandle,
        data: &[u8],
        address: u8,
        retries: u8,
    ) -> Result<TwiStatus, TwiError> {
        let mut transaction = self.twi_master_start_write(handle, data, address, retries)?;
        loop {
            if let Some(status) = self.twi_master_poll(&mut transaction)? {
                return Ok(status);
            }
        }
    }

    /// Read `buf.len()` bytes from the slave at `address`
    ///
    /// Blocks like [`twi_master_write`](Self::twi_master_write). The bytes
    /// received before the last attempt ended are copied into `buf`.
    pub fn twi_master_read(
        &mut self,
        handle: TwiHandle,
        buf: &mut [u8],
        address: u8,
        retries: u8,
    ) -> Result<TwiStatus, TwiError> {
        let mut transaction = self.twi_master_start_read(handle, buf.len(), address, retries)?;
        let status = loop {
            if let Some(status) = self.twi_master_poll(&mut transaction)? {
                break status;
            }
        };
        self.twi_master_received(handle, buf);
        Ok(status)
    }

    /// Arm a write of `data` to the slave at `address`
    pub fn twi_master_start_write(
        &mut self,
        handle: TwiHandle,
        data: &[u8],
        address: u8,
        retries: u8,
    ) -> Result<MasterTransaction, TwiError> {
        let channel = self.master_channel(handle)?;
        channel.data.clear();
        channel
            .data
            .extend_from_slice(data)
            .map_err(|_| TwiError::InvalidLength)?;
        channel.length = data.len() as u16;
        channel.status = TwiStatus::TransactionBusy;

        Ok(MasterTransaction::new(handle, address << 1, retries))
    }

    /// Arm a read of `length` bytes from the slave at `address`
    pub fn twi_master_start_read(
        &mut self,
        handle: TwiHandle,
        length: usize,
        address: u8,
        retries: u8,
    ) -> Result<MasterTransaction, TwiError> {
        if length > MAX_TRANSFER_LEN {
            return Err(TwiError::InvalidLength);
        }
        let channel = self.master_channel(handle)?;
        channel.data.clear();
        channel
            .data
            .resize(length, 0)
            .map_err(|_| TwiError::InvalidLength)?;
        channel.length = length as u16;
        channel.status = TwiStatus::TransactionBusy;

        Ok(MasterTransaction::new(handle, (address << 1) | READ, retries))
    }

    /// Copy the bytes of the last master read into `buf`
    ///
    /// Returns how many bytes were received.
    pub fn twi_master_received(&self, handle: TwiHandle, buf: &mut [u8]) -> usize {
        let Some(channel) = self.twi_channels.get(handle) else {
            return 0;
        };
        let received = usize::from(channel.index)
            .min(buf.len())
            .min(channel.data.len());
        buf[..received].copy_from_slice(&channel.data[..received]);
        received
    }

    /// Advance an armed master transaction by one bounded step
    ///
    /// Returns the final status once the transaction completed or ran out
    /// of attempts, `None` while it is still in progress.
    pub fn twi_master_poll(
        &mut self,
        transaction: &mut MasterTransaction,
    ) -> Result<Option<TwiStatus>, TwiError> {
        let channel = self
            .twi_channels
            .get_mut(transaction.handle)
            .ok_or(TwiError::InvalidHandle)?;
        let regs = &mut self.twi_ports[channel.id.index()];
        let timer = &mut self.timer;

        match transaction.phase {
            Phase::Attempt => {
                if channel.status == TwiStatus::TransComplete || transaction.remaining < 0 {
                    return Ok(Some(channel.status));
                }
                channel.monitor.touch(timer.now_us());
                transaction.phase = Phase::WaitIdle;
            }
            Phase::WaitIdle => {
                if regs.bus_state() == BusState::Idle {
                    channel.index = 0;
                    channel.monitor.touch(timer.now_us());
                    regs.write_address(transaction.address_rw);
                    transaction.phase = Phase::Transfer;
                } else if channel.monitor.check(timer.now_us()) == BusHealth::Stalled {
                    recover(channel, regs);
                }
            }
            Phase::Transfer => {
                if regs.bus_state() == BusState::Idle {
                    transaction.remaining -= 1;
                    transaction.phase = Phase::Attempt;
                } else {
                    step(channel, regs, timer);
                    if channel.monitor.check(timer.now_us()) == BusHealth::Stalled {
                        recover(channel, regs);
                    }
                }
            }
        }

        Ok(None)
    }

    fn master_channel(&mut self, handle: TwiHandle) -> Result<&mut TwiChannel, TwiError> {
        let channel = self
            .twi_channels
            .get_mut(handle)
            .ok_or(TwiError::InvalidHandle)?;
        if channel.role != Some(TwiRole::Master) {
            return Err(TwiError::NotMaster);
        }
        Ok(channel)
    }

    /// Master interrupt of a TWI channel
    pub(crate) fn twi_master_interrupt(&mut self, handle: TwiHandle) {
        let Some(channel) = self.twi_channels.get_mut(handle) else {
            return;
        };
        let regs = &mut self.twi_ports[channel.id.index()];
        step(channel, regs, &mut self.timer);
    }
}
