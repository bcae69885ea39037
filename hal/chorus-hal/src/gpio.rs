//! GPIO abstractions
//!
//! Pins are addressed by port and bit position rather than owned as
//! individual objects, because the engine stores a chip-select location per
//! bus user and drives it on demand.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Highest valid pin index within a port
pub const MAX_PIN: u8 = 7;

/// GPIO port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Port {
    A,
    B,
    C,
    D,
    E,
    F,
    H,
    J,
    K,
    Q,
    R,
}

impl Port {
    /// Look up a port by its index (A = 0 ... R = 10)
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Port::A),
            1 => Some(Port::B),
            2 => Some(Port::C),
            3 => Some(Port::D),
            4 => Some(Port::E),
            5 => Some(Port::F),
            6 => Some(Port::H),
            7 => Some(Port::J),
            8 => Some(Port::K),
            9 => Some(Port::Q),
            10 => Some(Port::R),
            _ => None,
        }
    }
}

/// A single pin location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PinId {
    pub port: Port,
    pub pin: u8,
}

impl PinId {
    /// Create a pin location, rejecting pin indices above [`MAX_PIN`]
    pub const fn new(port: Port, pin: u8) -> Option<Self> {
        if pin > MAX_PIN {
            None
        } else {
            Some(Self { port, pin })
        }
    }
}

/// Pin direction and pull configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinMode {
    /// Push-pull output
    Output,
    /// Floating input
    Input,
    /// Input with internal pull-up
    InputPullUp,
}

/// Edge that raises a pin interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

/// Reservation of one pin-change interrupt line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EdgeInterrupt {
    pub pin: PinId,
    pub edge: Edge,
    /// Implementation-defined slot number
    pub slot: u8,
}

/// Errors from the GPIO subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GpioError {
    /// Pin index out of range
    InvalidPin,
    /// No bookkeeping memory left
    OutOfHeap,
    /// Every interrupt line of the port is already mapped
    InterruptsMapped,
    /// Interrupt reservation not found
    InvalidHandle,
}

/// GPIO subsystem
///
/// Implementations should handle the actual hardware register manipulation
/// for the specific chip.
pub trait Gpio {
    /// Set direction and pull configuration of a pin
    fn configure(&mut self, pin: PinId, mode: PinMode);

    /// Drive the pin high (logic 1)
    fn set_high(&mut self, pin: PinId);

    /// Drive the pin low (logic 0)
    fn set_low(&mut self, pin: PinId);

    /// Toggle the pin state
    fn toggle(&mut self, pin: PinId);

    /// Check if the pin reads high
    fn is_high(&self, pin: PinId) -> bool;

    /// Check if the pin reads low
    fn is_low(&self, pin: PinId) -> bool {
        !self.is_high(pin)
    }

    /// Reserve a pin-change interrupt on `pin`
    ///
    /// The interrupt itself is delivered through the bus manager's interrupt
    /// entry as a pin event; this call only arms the hardware line.
    fn request_edge_interrupt(&mut self, pin: PinId, edge: Edge)
        -> Result<EdgeInterrupt, GpioError>;

    /// Disarm and free a pin-change interrupt
    fn release_edge_interrupt(&mut self, interrupt: EdgeInterrupt) -> Result<(), GpioError>;
}
