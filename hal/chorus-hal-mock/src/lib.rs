//! Software implementations of the Chorus HAL traits
//!
//! Every mock is a cheap handle onto shared state: clone it before handing
//! it to the engine and keep the clone as a probe. Tests drive the "other
//! side" of the wire through the probe (a slave answering, a pin toggled by
//! a peer, a DMA block finishing) and then deliver the matching interrupt
//! to the bus manager themselves.

pub mod clock;
pub mod dma;
pub mod gpio;
pub mod spi;
pub mod twi;

pub use clock::{MockClock, MockTimer};
pub use dma::MockDma;
pub use gpio::MockGpio;
pub use spi::MockSpi;
pub use twi::{DeviceBehaviour, MockTwi};

use chorus_hal::Board;

/// Board made of mocks
pub struct MockBoard;

impl Board for MockBoard {
    type Spi = MockSpi;
    type Twi = MockTwi;
    type Gpio = MockGpio;
    type Dma = MockDma;
    type Clock = MockClock;
    type Timer = MockTimer;
}
