//! TWI slave state machine

use chorus_hal::twi::{Acknowledge, SlaveCommand, SlaveStatus, TwiRegisters};
use chorus_hal::Board;

use super::{TwiChannel, TwiHandle, TwiStatus};
use crate::manager::BusManager;
use crate::spi::FILLER;

fn report(channel: &TwiChannel, status: TwiStatus, data: u8) -> Option<u8> {
    channel.callback.map(|callback| callback(status, data))
}

/// Advance the slave transaction by one status snapshot
pub(crate) fn step<R: TwiRegisters>(channel: &mut TwiChannel, regs: &mut R) {
    let status = regs.slave_status();

    if status.contains(SlaveStatus::BUS_ERROR) {
        regs.clear_slave_flags(SlaveStatus::BUS_ERROR);
        channel.status = TwiStatus::BusError;
        report(channel, channel.status, 0);
    } else if status.contains(SlaveStatus::COLLISION) {
        regs.clear_slave_flags(SlaveStatus::COLLISION);
        channel.status = TwiStatus::Collision;
        report(channel, channel.status, 0);
    } else if status.contains(SlaveStatus::ADDRESS_STOP_INTERRUPT | SlaveStatus::ADDRESS_MATCH) {
        channel.status = TwiStatus::TransactionBusy;
        channel.index = 0;
        regs.slave_command(Acknowledge::Ack, SlaveCommand::Response);
    } else if status.contains(SlaveStatus::ADDRESS_STOP_INTERRUPT) {
        // Stop condition
        regs.clear_slave_flags(SlaveStatus::ADDRESS_STOP_INTERRUPT);
        channel.status = TwiStatus::TransComplete;
        report(channel, channel.status, 0);
    } else if status.contains(SlaveStatus::DATA_INTERRUPT) {
        if status.contains(SlaveStatus::READ) {
            if channel.index > 0 && status.contains(SlaveStatus::RX_NACK) {
                // Master has read enough.
                regs.slave_command(Acknowledge::Ack, SlaveCommand::Complete);
            } else {
                channel.status = TwiStatus::SlaveRead;
                let byte = report(channel, TwiStatus::SlaveRead, 0).unwrap_or(FILLER);
                regs.slave_write(byte);
                regs.slave_command(Acknowledge::Ack, SlaveCommand::Response);
                channel.index = channel.index.saturating_add(1);
            }
        } else {
            channel.status = TwiStatus::SlaveWrite;
            let byte = regs.slave_read();
            report(channel, TwiStatus::SlaveWrite, byte);
            regs.slave_command(Acknowledge::Ack, SlaveCommand::Response);
        }
    }
}

impl<B: Board> BusManager<B> {
    /// Slave interrupt of a TWI channel
    pub(crate) fn twi_slave_interrupt(&mut self, handle: TwiHandle) {
        let Some(channel) = self.twi_channels.get_mut(handle) else {
            return;
        };
        let regs = &mut self.twi_ports[channel.id.index()];
        step(channel, regs);
    }
}
