//! Mock time sources

use std::cell::Cell;
use std::rc::Rc;

use chorus_hal::clock::{MicrosecondClock, SystemClock, USEC_PER_SECOND};

/// Fixed CPU frequency
#[derive(Debug, Clone, Copy)]
pub struct MockClock {
    pub cpu_hz: u32,
}

impl MockClock {
    pub const fn new(cpu_hz: u32) -> Self {
        Self { cpu_hz }
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(32_000_000)
    }
}

impl SystemClock for MockClock {
    fn cpu_frequency(&self) -> u32 {
        self.cpu_hz
    }
}

/// Microsecond counter that advances by a fixed step on every read
///
/// Polling loops make progress in simulated time without sleeping. The
/// count rolls over at one second like the hardware counter.
#[derive(Debug, Clone)]
pub struct MockTimer {
    now: Rc<Cell<u32>>,
    step: Rc<Cell<u32>>,
    reads: Rc<Cell<u32>>,
}

impl MockTimer {
    pub fn new(step_us: u32) -> Self {
        Self {
            now: Rc::new(Cell::new(0)),
            step: Rc::new(Cell::new(step_us)),
            reads: Rc::new(Cell::new(0)),
        }
    }

    /// Jump to `now_us`
    pub fn set(&self, now_us: u32) {
        self.now.set(now_us % USEC_PER_SECOND);
    }

    pub fn set_step(&self, step_us: u32) {
        self.step.set(step_us);
    }

    /// Number of reads so far
    pub fn reads(&self) -> u32 {
        self.reads.get()
    }
}

impl Default for MockTimer {
    fn default() -> Self {
        Self::new(1_000)
    }
}

impl MicrosecondClock for MockTimer {
    fn now_us(&mut self) -> u32 {
        let now = self.now.get();
        self.now.set((now + self.step.get()) % USEC_PER_SECOND);
        self.reads.set(self.reads.get() + 1);
        now
    }
}
