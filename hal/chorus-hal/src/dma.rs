//! DMA controller abstraction
//!
//! The engine programs single-shot block transfers between a memory buffer
//! and a peripheral data register. Completion is reported through the bus
//! manager's interrupt entry as a DMA event.

/// A DMA channel owned by one peripheral channel
///
/// Channels with a lower number have a higher arbitration priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaChannel(pub u8);

/// Peripheral event that advances a DMA transfer by one burst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaTrigger(pub u8);

/// How an address evolves after each burst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressMode {
    /// Address stays on the same location
    Fixed,
    /// Address advances by the burst length
    Increment,
}

/// When an address is reloaded with its initial value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reload {
    Never,
    EndOfBlock,
}

/// DMA interrupt sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaEvent {
    TransferComplete,
    TransferError,
}

/// One single-shot block transfer with one-byte bursts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaTransfer {
    pub source: usize,
    pub source_mode: AddressMode,
    pub source_reload: Reload,
    pub destination: usize,
    pub destination_mode: AddressMode,
    pub destination_reload: Reload,
    /// Number of bytes moved before the channel completes
    pub block_size: u16,
    pub trigger: DmaTrigger,
}

/// Errors from the DMA controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaError {
    /// Every channel is allocated
    NoChannelsOpen,
    /// No bookkeeping memory left
    OutOfHeap,
    /// Channel not allocated
    InvalidChannel,
}

/// DMA controller
pub trait DmaController {
    /// Allocate a free channel
    fn request(&mut self) -> Result<DmaChannel, DmaError>;

    /// Return a channel to the free pool, disabling it first
    fn release(&mut self, channel: DmaChannel) -> Result<(), DmaError>;

    /// Program a transfer; the channel stays disabled
    fn configure(&mut self, channel: DmaChannel, transfer: &DmaTransfer) -> Result<(), DmaError>;

    /// Arm the channel so the next trigger starts moving bytes
    fn enable(&mut self, channel: DmaChannel) -> Result<(), DmaError>;

    /// Stop the channel
    fn disable(&mut self, channel: DmaChannel) -> Result<(), DmaError>;

    /// Bytes moved since the channel was last configured
    fn transferred(&self, channel: DmaChannel) -> u16;

    /// Enable or disable an interrupt source of the channel
    fn set_interrupt(
        &mut self,
        channel: DmaChannel,
        event: DmaEvent,
        enabled: bool,
    ) -> Result<(), DmaError>;
}
