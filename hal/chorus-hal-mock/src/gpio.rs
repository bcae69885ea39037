//! Mock GPIO

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chorus_hal::gpio::{Edge, EdgeInterrupt, Gpio, GpioError, PinId, PinMode};

#[derive(Debug, Default)]
struct GpioState {
    levels: HashMap<PinId, bool>,
    modes: HashMap<PinId, PinMode>,
    edges: Vec<EdgeInterrupt>,
    next_slot: u8,
    fail_edges: bool,
}

/// Pin levels, modes and edge-interrupt reservations
#[derive(Debug, Clone, Default)]
pub struct MockGpio {
    state: Rc<RefCell<GpioState>>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive a pin from outside, as a peer would
    ///
    /// Returns true if the change is a rising edge on an armed pin; the
    /// caller then delivers the pin interrupt.
    pub fn drive(&self, pin: PinId, high: bool) -> bool {
        let mut state = self.state.borrow_mut();
        let was_high = state.levels.insert(pin, high).unwrap_or(false);
        let rising = !was_high && high;
        rising
            && state
                .edges
                .iter()
                .any(|e| e.pin == pin && matches!(e.edge, Edge::Rising | Edge::Both))
    }

    pub fn level(&self, pin: PinId) -> bool {
        self.state.borrow().levels.get(&pin).copied().unwrap_or(false)
    }

    pub fn mode(&self, pin: PinId) -> Option<PinMode> {
        self.state.borrow().modes.get(&pin).copied()
    }

    /// Edge interrupts currently armed
    pub fn armed(&self) -> Vec<EdgeInterrupt> {
        self.state.borrow().edges.clone()
    }

    /// Make every following edge-interrupt request fail
    pub fn fail_edge_requests(&self, fail: bool) {
        self.state.borrow_mut().fail_edges = fail;
    }
}

impl Gpio for MockGpio {
    fn configure(&mut self, pin: PinId, mode: PinMode) {
        let mut state = self.state.borrow_mut();
        state.modes.insert(pin, mode);
        if mode == PinMode::InputPullUp {
            state.levels.entry(pin).or_insert(true);
        }
    }

    fn set_high(&mut self, pin: PinId) {
        self.state.borrow_mut().levels.insert(pin, true);
    }

    fn set_low(&mut self, pin: PinId) {
        self.state.borrow_mut().levels.insert(pin, false);
    }

    fn toggle(&mut self, pin: PinId) {
        let mut state = self.state.borrow_mut();
        let level = state.levels.entry(pin).or_insert(false);
        *level = !*level;
    }

    fn is_high(&self, pin: PinId) -> bool {
        self.level(pin)
    }

    fn request_edge_interrupt(
        &mut self,
        pin: PinId,
        edge: Edge,
    ) -> Result<EdgeInterrupt, GpioError> {
        let mut state = self.state.borrow_mut();
        if state.fail_edges {
            return Err(GpioError::InterruptsMapped);
        }
        if state.edges.iter().any(|e| e.pin == pin) {
            return Err(GpioError::InterruptsMapped);
        }
        let interrupt = EdgeInterrupt {
            pin,
            edge,
            slot: state.next_slot,
        };
        state.next_slot = state.next_slot.wrapping_add(1);
        state.edges.push(interrupt);
        Ok(interrupt)
    }

    fn release_edge_interrupt(&mut self, interrupt: EdgeInterrupt) -> Result<(), GpioError> {
        let mut state = self.state.borrow_mut();
        let before = state.edges.len();
        state.edges.retain(|e| *e != interrupt);
        if state.edges.len() == before {
            Err(GpioError::InvalidHandle)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_hal::gpio::Port;

    #[test]
    fn test_drive_reports_armed_rising_edge() {
        let mut gpio = MockGpio::new();
        let pin = PinId::new(Port::D, 4).unwrap();
        assert!(!gpio.drive(pin, true));

        gpio.drive(pin, false);
        let irq = gpio.request_edge_interrupt(pin, Edge::Rising).unwrap();
        assert!(gpio.drive(pin, true));
        // Already high: no edge.
        assert!(!gpio.drive(pin, true));

        gpio.release_edge_interrupt(irq).unwrap();
        gpio.drive(pin, false);
        assert!(!gpio.drive(pin, true));
    }

    #[test]
    fn test_release_unknown_interrupt() {
        let mut gpio = MockGpio::new();
        let pin = PinId::new(Port::A, 0).unwrap();
        let irq = gpio.request_edge_interrupt(pin, Edge::Rising).unwrap();
        gpio.release_edge_interrupt(irq).unwrap();
        assert_eq!(
            gpio.release_edge_interrupt(irq),
            Err(GpioError::InvalidHandle)
        );
    }

    #[test]
    fn test_output_levels() {
        let mut gpio = MockGpio::new();
        let probe = gpio.clone();
        let pin = PinId::new(Port::A, 0).unwrap();
        gpio.configure(pin, PinMode::Output);
        gpio.set_high(pin);
        assert!(probe.level(pin));
        gpio.toggle(pin);
        assert!(gpio.is_low(pin));
        assert_eq!(probe.mode(pin), Some(PinMode::Output));
    }
}
