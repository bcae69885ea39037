//! Mock DMA controller
//!
//! Records how channels are programmed. No memory is moved; a test decides
//! how many bytes a channel has transferred with [`MockDma::set_transferred`].

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use chorus_hal::dma::{DmaChannel, DmaController, DmaError, DmaEvent, DmaTransfer};

#[derive(Debug, Default)]
struct DmaState {
    capacity: u8,
    allocated: BTreeSet<DmaChannel>,
    transfers: BTreeMap<DmaChannel, DmaTransfer>,
    enabled: BTreeSet<DmaChannel>,
    transferred: BTreeMap<DmaChannel, u16>,
    interrupts: BTreeSet<(DmaChannel, bool)>,
    /// Next allocation order, highest first when set
    reverse: bool,
}

#[derive(Debug, Clone)]
pub struct MockDma {
    state: Rc<RefCell<DmaState>>,
}

impl MockDma {
    pub fn new(capacity: u8) -> Self {
        Self {
            state: Rc::new(RefCell::new(DmaState {
                capacity,
                ..DmaState::default()
            })),
        }
    }

    /// Hand out channels from the top of the range down
    pub fn allocate_descending(&self, reverse: bool) {
        self.state.borrow_mut().reverse = reverse;
    }

    pub fn allocated(&self) -> Vec<DmaChannel> {
        self.state.borrow().allocated.iter().copied().collect()
    }

    /// Last transfer programmed on `channel`
    pub fn transfer(&self, channel: DmaChannel) -> Option<DmaTransfer> {
        self.state.borrow().transfers.get(&channel).copied()
    }

    pub fn is_enabled(&self, channel: DmaChannel) -> bool {
        self.state.borrow().enabled.contains(&channel)
    }

    /// Completion interrupt enabled on `channel`
    pub fn completion_interrupt(&self, channel: DmaChannel) -> bool {
        self.state.borrow().interrupts.contains(&(channel, true))
    }

    /// Pretend `channel` moved `count` bytes
    pub fn set_transferred(&self, channel: DmaChannel, count: u16) {
        self.state.borrow_mut().transferred.insert(channel, count);
    }
}

impl Default for MockDma {
    fn default() -> Self {
        Self::new(4)
    }
}

impl DmaController for MockDma {
    fn request(&mut self) -> Result<DmaChannel, DmaError> {
        let mut state = self.state.borrow_mut();
        let free = |n: &u8| !state.allocated.contains(&DmaChannel(*n));
        let channel = if state.reverse {
            (0..state.capacity).rev().find(free)
        } else {
            (0..state.capacity).find(free)
        }
        .map(DmaChannel)
        .ok_or(DmaError::NoChannelsOpen)?;
        state.allocated.insert(channel);
        Ok(channel)
    }

    fn release(&mut self, channel: DmaChannel) -> Result<(), DmaError> {
        let mut state = self.state.borrow_mut();
        if !state.allocated.remove(&channel) {
            return Err(DmaError::InvalidChannel);
        }
        state.enabled.remove(&channel);
        state.transfers.remove(&channel);
        state.interrupts.retain(|(ch, _)| *ch != channel);
        Ok(())
    }

    fn configure(&mut self, channel: DmaChannel, transfer: &DmaTransfer) -> Result<(), DmaError> {
        let mut state = self.state.borrow_mut();
        if !state.allocated.contains(&channel) {
            return Err(DmaError::InvalidChannel);
        }
        state.transfers.insert(channel, *transfer);
        state.transferred.insert(channel, 0);
        Ok(())
    }

    fn enable(&mut self, channel: DmaChannel) -> Result<(), DmaError> {
        let mut state = self.state.borrow_mut();
        if !state.allocated.contains(&channel) {
            return Err(DmaError::InvalidChannel);
        }
        state.enabled.insert(channel);
        Ok(())
    }

    fn disable(&mut self, channel: DmaChannel) -> Result<(), DmaError> {
        let mut state = self.state.borrow_mut();
        if !state.allocated.contains(&channel) {
            return Err(DmaError::InvalidChannel);
        }
        state.enabled.remove(&channel);
        Ok(())
    }

    fn transferred(&self, channel: DmaChannel) -> u16 {
        self.state
            .borrow()
            .transferred
            .get(&channel)
            .copied()
            .unwrap_or(0)
    }

    fn set_interrupt(
        &mut self,
        channel: DmaChannel,
        event: DmaEvent,
        enabled: bool,
    ) -> Result<(), DmaError> {
        let mut state = self.state.borrow_mut();
        if !state.allocated.contains(&channel) {
            return Err(DmaError::InvalidChannel);
        }
        if event == DmaEvent::TransferComplete {
            state.interrupts.remove(&(channel, !enabled));
            state.interrupts.insert((channel, enabled));
        }
        Ok(())
    }
}
