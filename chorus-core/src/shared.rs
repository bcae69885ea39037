//! Critical-section access to a bus manager
//!
//! Foreground calls and interrupt handlers both reach the manager through
//! [`SharedBus::lock`]. With [`CriticalSectionRawMutex`] the closure runs
//! with interrupts disabled, so no handler ever sees a half-updated record.
//!
//! Completion callbacks run inside the lock. They must not call back into
//! the same `SharedBus`.
//!
//! The blocking TWI master transfers busy-wait for the bus. Calling them
//! inside [`SharedBus::lock`] keeps interrupts off for the whole wait, up
//! to the stall timeout per attempt, and a timer that counts in an
//! interrupt would never advance. Use [`SharedBus::twi_master_write`] and
//! [`SharedBus::twi_master_read`], which hold the lock for one poll at a
//! time.
//!
//! [`CriticalSectionRawMutex`]: embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use chorus_hal::Board;

use crate::error::TwiError;
use crate::event::Interrupt;
use crate::manager::BusManager;
use crate::twi::master::MasterTransaction;
use crate::twi::{TwiHandle, TwiStatus};

/// A bus manager behind a blocking mutex
pub struct SharedBus<M: RawMutex, B: Board> {
    inner: Mutex<M, RefCell<BusManager<B>>>,
}

impl<M: RawMutex, B: Board> SharedBus<M, B> {
    pub const fn new(manager: BusManager<B>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(manager)),
        }
    }

    /// Run `f` with exclusive access to the manager
    pub fn lock<R>(&self, f: impl FnOnce(&mut BusManager<B>) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Deliver an interrupt to the manager
    pub fn on_interrupt(&self, interrupt: Interrupt) {
        self.lock(|bus| bus.on_interrupt(interrupt));
    }

    /// Blocking TWI master write that lets interrupts in between polls
    ///
    /// Same contract as [`BusManager::twi_master_write`], but the lock is
    /// taken once per poll rather than for the whole transaction, so other
    /// interrupts keep being served while the calling thread waits.
    pub fn twi_master_write(
        &self,
        handle: TwiHandle,
        data: &[u8],
        address: u8,
        retries: u8,
    ) -> Result<TwiStatus, TwiError> {
        let mut transaction =
            self.lock(|bus| bus.twi_master_start_write(handle, data, address, retries))?;
        self.finish_master(&mut transaction)
    }

    /// Blocking TWI master read that lets interrupts in between polls
    ///
    /// See [`twi_master_write`](Self::twi_master_write).
    pub fn twi_master_read(
        &self,
        handle: TwiHandle,
        buf: &mut [u8],
        address: u8,
        retries: u8,
    ) -> Result<TwiStatus, TwiError> {
        let mut transaction =
            self.lock(|bus| bus.twi_master_start_read(handle, buf.len(), address, retries))?;
        let status = self.finish_master(&mut transaction)?;
        self.lock(|bus| bus.twi_master_received(handle, buf));
        Ok(status)
    }

    fn finish_master(&self, transaction: &mut MasterTransaction) -> Result<TwiStatus, TwiError> {
        loop {
            if let Some(status) = self.lock(|bus| bus.twi_master_poll(transaction))? {
                return Ok(status);
            }
        }
    }

    pub fn into_inner(self) -> BusManager<B> {
        self.inner.into_inner().into_inner()
    }
}
