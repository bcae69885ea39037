//! Single-owner bus lock
//!
//! The lock never blocks: a caller that finds the bus held by another user
//! gets [`SpiError::Busy`] and decides itself whether to retry. Only the
//! completion path releases a lock taken by a transfer.

use super::{SpiChannel, SpiUserHandle};
use crate::error::SpiError;

impl SpiChannel {
    /// Check that `user` may drive the bus without taking it
    pub(crate) fn check_access(&self, user: SpiUserHandle) -> Result<(), SpiError> {
        if self.locked && self.owner != Some(user) {
            Err(SpiError::Busy)
        } else {
            Ok(())
        }
    }

    /// Take the bus for `user`
    ///
    /// Succeeds if the bus is free or already held by `user`.
    pub(crate) fn acquire(&mut self, user: SpiUserHandle) -> Result<(), SpiError> {
        self.check_access(user)?;
        self.locked = true;
        self.owner = Some(user);
        Ok(())
    }

    /// Drop the bus lock
    pub(crate) fn release_lock(&mut self) {
        self.locked = false;
        self.owner = None;
    }

    /// True while a user holds the bus
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// User holding the bus
    pub fn owner(&self) -> Option<SpiUserHandle> {
        if self.locked {
            self.owner
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Position, Registry};
    use crate::spi::{SpiConfig, SpiId, SpiUser, SpiTiming};
    use chorus_hal::gpio::{PinId, Port};
    use chorus_hal::spi::Prescaler;

    fn channel() -> SpiChannel {
        let timing = SpiTiming {
            prescaler: Prescaler::Div64,
            clk2x: false,
            actual: 500_000,
        };
        SpiChannel::new(SpiId::Spi1, &SpiConfig::default(), timing)
    }

    fn users() -> (SpiUserHandle, SpiUserHandle) {
        let mut channels: Registry<SpiChannel, 1> = Registry::new();
        let ch = channels.add(channel(), Position::Tail).unwrap();
        let mut registry: Registry<SpiUser, 2> = Registry::new();
        let cs = PinId::new(Port::A, 0).unwrap();
        let a = registry.add(SpiUser::new(ch, cs, None), Position::Tail).unwrap();
        let b = registry.add(SpiUser::new(ch, cs, None), Position::Tail).unwrap();
        (a, b)
    }

    #[test]
    fn test_acquire_free_bus() {
        let (a, _) = users();
        let mut ch = channel();
        assert!(!ch.is_locked());
        ch.acquire(a).unwrap();
        assert!(ch.is_locked());
        assert_eq!(ch.owner(), Some(a));
    }

    #[test]
    fn test_contention_is_busy() {
        let (a, b) = users();
        let mut ch = channel();
        ch.acquire(a).unwrap();
        assert_eq!(ch.acquire(b), Err(SpiError::Busy));
        assert_eq!(ch.owner(), Some(a));

        // Re-entry by the owner is allowed.
        ch.acquire(a).unwrap();
    }

    #[test]
    fn test_release_frees_bus() {
        let (a, b) = users();
        let mut ch = channel();
        ch.acquire(a).unwrap();
        ch.release_lock();
        assert_eq!(ch.owner(), None);
        ch.acquire(b).unwrap();
        assert_eq!(ch.owner(), Some(b));
    }
}
