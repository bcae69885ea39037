//! Handle registry
//!
//! A fixed-capacity arena that hands out opaque, generation-checked handles
//! to the records it stores and keeps the linked records in an explicit
//! order. Every channel and user table of the engine is one of these.
//!
//! A record goes through two stages: [`Registry::create`] allocates a
//! detached slot, [`Registry::insert`] links it at the head or tail of the
//! traversal order. Only linked records are members: lookups, traversal and
//! [`Registry::destroy`] ignore detached slots.
//!
//! The registry itself takes `&mut self` for every mutation. Callers that
//! share it with interrupt handlers reach it through
//! [`SharedBus`](crate::shared::SharedBus), whose lock is the critical
//! section.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;

use heapless::Vec;

use crate::error::RegistryError;

/// Opaque reference to a record of type `T`
///
/// A handle stays valid until its record is destroyed. A slot that is
/// reused later gets a new generation, so stale handles never alias the
/// new occupant.
pub struct Handle<T> {
    index: u16,
    generation: u16,
    _record: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    const fn new(index: u16, generation: u16) -> Self {
        Self {
            index,
            generation,
            _record: PhantomData,
        }
    }

    /// Slot index of the record
    pub const fn index(&self) -> usize {
        self.index as usize
    }

    /// Generation of the slot when the handle was issued
    pub const fn generation(&self) -> u16 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

#[cfg(feature = "defmt")]
impl<T> defmt::Format for Handle<T> {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Handle({=u16}v{=u16})", self.index, self.generation)
    }
}

/// Where [`Registry::insert`] links a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Position {
    Head,
    Tail,
}

enum Slot<T> {
    Free { generation: u16 },
    Occupied { generation: u16, linked: bool, value: T },
}

/// Fixed-capacity arena of `N` records
pub struct Registry<T, const N: usize> {
    slots: Vec<Slot<T>, N>,
    /// Slot indices of linked records, head first
    order: Vec<u16, N>,
}

impl<T, const N: usize> Default for Registry<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Registry<T, N> {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            order: Vec::new(),
        }
    }

    /// Maximum number of records
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of linked records
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if no record is linked
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Allocate a detached record
    ///
    /// Fails with [`RegistryError::OutOfHeap`] once every slot is occupied.
    pub fn create(&mut self, value: T) -> Result<Handle<T>, RegistryError> {
        let free = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Slot::Free { .. }));

        match free {
            Some(index) => {
                let generation = match self.slots[index] {
                    Slot::Free { generation } => generation,
                    Slot::Occupied { generation, .. } => generation,
                };
                self.slots[index] = Slot::Occupied {
                    generation,
                    linked: false,
                    value,
                };
                Ok(Handle::new(index as u16, generation))
            }
            None => {
                let index = self.slots.len() as u16;
                self.slots
                    .push(Slot::Occupied {
                        generation: 0,
                        linked: false,
                        value,
                    })
                    .map_err(|_| RegistryError::OutOfHeap)?;
                Ok(Handle::new(index, 0))
            }
        }
    }

    /// Link a detached record into the traversal order
    pub fn insert(&mut self, handle: Handle<T>, position: Position) -> Result<(), RegistryError> {
        match self.slots.get_mut(handle.index()) {
            Some(Slot::Occupied {
                generation, linked, ..
            }) if *generation == handle.generation => {
                if *linked {
                    return Err(RegistryError::LinkMapped);
                }
                *linked = true;
            }
            _ => return Err(RegistryError::InvalidLink),
        }

        // Linked records never outnumber slots, so the order vector has room.
        let result = match position {
            Position::Head => self.order.insert(0, handle.index),
            Position::Tail => self.order.push(handle.index),
        };
        result.map_err(|_| RegistryError::OutOfHeap)
    }

    /// Allocate a record and link it in one step
    pub fn add(&mut self, value: T, position: Position) -> Result<Handle<T>, RegistryError> {
        let handle = self.create(value)?;
        self.insert(handle, position)?;
        Ok(handle)
    }

    /// Unlink a member without freeing it
    ///
    /// The record stays allocated and can be linked again with
    /// [`insert`](Self::insert).
    pub fn remove(&mut self, handle: Handle<T>) -> Result<(), RegistryError> {
        if !self.contains(handle) {
            return Err(RegistryError::InvalidLink);
        }
        if let Some(Slot::Occupied { linked, .. }) = self.slots.get_mut(handle.index()) {
            *linked = false;
        }
        self.order.retain(|&index| index != handle.index);
        Ok(())
    }

    /// Unlink and free a record, returning it
    ///
    /// Detached records, fresh from [`create`](Self::create) or unlinked by
    /// [`remove`](Self::remove), are freed the same way. Fails with
    /// [`RegistryError::InvalidLink`] if the handle names no allocated
    /// record.
    pub fn destroy(&mut self, handle: Handle<T>) -> Result<T, RegistryError> {
        let linked = match self.slots.get(handle.index()) {
            Some(Slot::Occupied {
                generation, linked, ..
            }) if *generation == handle.generation => *linked,
            _ => return Err(RegistryError::InvalidLink),
        };
        if linked {
            self.order.retain(|&index| index != handle.index);
        }

        let next = Slot::Free {
            generation: handle.generation.wrapping_add(1),
        };
        match core::mem::replace(&mut self.slots[handle.index()], next) {
            Slot::Occupied { value, .. } => Ok(value),
            Slot::Free { .. } => Err(RegistryError::InvalidLink),
        }
    }

    /// True if `handle` refers to a linked record
    pub fn contains(&self, handle: Handle<T>) -> bool {
        matches!(
            self.slots.get(handle.index()),
            Some(Slot::Occupied { generation, linked: true, .. }) if *generation == handle.generation
        )
    }

    /// Borrow a member's record
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        match self.slots.get(handle.index()) {
            Some(Slot::Occupied {
                generation,
                linked: true,
                value,
            }) if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    /// Mutably borrow a member's record
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        match self.slots.get_mut(handle.index()) {
            Some(Slot::Occupied {
                generation,
                linked: true,
                value,
            }) if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    /// Traverse members from head to tail
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> + '_ {
        self.order
            .iter()
            .filter_map(move |&index| match &self.slots[index as usize] {
                Slot::Occupied {
                    generation, value, ..
                } => Some((Handle::new(index, *generation), value)),
                Slot::Free { .. } => None,
            })
    }

    /// First member, in traversal order, whose record matches `predicate`
    pub fn find(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<Handle<T>> {
        self.iter()
            .find(|(_, value)| predicate(value))
            .map(|(handle, _)| handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_create_insert_and_traverse() {
        let mut registry: Registry<u32, 4> = Registry::new();
        let a = registry.add(1, Position::Tail).unwrap();
        let b = registry.add(2, Position::Tail).unwrap();
        let c = registry.add(3, Position::Head).unwrap();

        let order: std::vec::Vec<u32> = registry.iter().map(|(_, v)| *v).collect();
        assert_eq!(order, [3, 1, 2]);
        assert!(registry.contains(a));
        assert!(registry.contains(b));
        assert!(registry.contains(c));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_out_of_heap() {
        let mut registry: Registry<u8, 2> = Registry::new();
        registry.add(0, Position::Tail).unwrap();
        registry.add(1, Position::Tail).unwrap();
        assert_eq!(registry.create(2), Err(RegistryError::OutOfHeap));
    }

    #[test]
    fn test_detached_is_not_member() {
        let mut registry: Registry<u8, 2> = Registry::new();
        let handle = registry.create(7).unwrap();
        assert!(!registry.contains(handle));
        assert_eq!(registry.get(handle), None);

        registry.insert(handle, Position::Tail).unwrap();
        assert_eq!(registry.get(handle), Some(&7));
        assert_eq!(
            registry.insert(handle, Position::Tail),
            Err(RegistryError::LinkMapped)
        );
    }

    #[test]
    fn test_destroy_twice() {
        let mut registry: Registry<u8, 2> = Registry::new();
        let handle = registry.add(9, Position::Tail).unwrap();
        assert_eq!(registry.destroy(handle), Ok(9));
        assert_eq!(registry.destroy(handle), Err(RegistryError::InvalidLink));
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut registry: Registry<u8, 1> = Registry::new();
        let old = registry.add(1, Position::Tail).unwrap();
        registry.destroy(old).unwrap();
        let new = registry.add(2, Position::Tail).unwrap();

        assert_eq!(old.index(), new.index());
        assert!(!registry.contains(old));
        assert!(registry.contains(new));
        assert_eq!(registry.get(old), None);
    }

    #[test]
    fn test_remove_keeps_record() {
        let mut registry: Registry<u8, 2> = Registry::new();
        let handle = registry.add(5, Position::Tail).unwrap();
        registry.remove(handle).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.remove(handle), Err(RegistryError::InvalidLink));

        registry.insert(handle, Position::Head).unwrap();
        assert_eq!(registry.get(handle), Some(&5));
    }

    #[test]
    fn test_destroy_frees_detached_record() {
        let mut registry: Registry<u8, 1> = Registry::new();
        let handle = registry.add(5, Position::Tail).unwrap();
        registry.remove(handle).unwrap();
        assert_eq!(registry.create(6), Err(RegistryError::OutOfHeap));

        assert_eq!(registry.destroy(handle), Ok(5));
        assert_eq!(registry.destroy(handle), Err(RegistryError::InvalidLink));
        let reused = registry.create(6).unwrap();
        assert_eq!(reused.index(), handle.index());
        assert_eq!(registry.destroy(reused), Ok(6));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_find() {
        let mut registry: Registry<(u8, char), 4> = Registry::new();
        registry.add((1, 'a'), Position::Tail).unwrap();
        let b = registry.add((2, 'b'), Position::Tail).unwrap();
        assert_eq!(registry.find(|r| r.1 == 'b'), Some(b));
        assert_eq!(registry.find(|r| r.1 == 'z'), None);
    }

    proptest! {
        /// Membership and order always match a plain vector model.
        #[test]
        fn prop_matches_vector_model(ops in proptest::collection::vec((any::<bool>(), any::<bool>(), 0usize..8), 0..64)) {
            let mut registry: Registry<u32, 6> = Registry::new();
            let mut model: std::vec::Vec<(Handle<u32>, u32)> = std::vec::Vec::new();
            let mut next = 0u32;

            for (add, at_head, pick) in ops {
                if add {
                    let position = if at_head { Position::Head } else { Position::Tail };
                    match registry.add(next, position) {
                        Ok(handle) => {
                            if at_head {
                                model.insert(0, (handle, next));
                            } else {
                                model.push((handle, next));
                            }
                        }
                        Err(e) => {
                            prop_assert_eq!(e, RegistryError::OutOfHeap);
                            prop_assert_eq!(model.len(), 6);
                        }
                    }
                    next += 1;
                } else if !model.is_empty() {
                    let (handle, value) = model.remove(pick % model.len());
                    prop_assert_eq!(registry.destroy(handle), Ok(value));
                    prop_assert!(!registry.contains(handle));
                }

                let actual: std::vec::Vec<u32> = registry.iter().map(|(_, v)| *v).collect();
                let expected: std::vec::Vec<u32> = model.iter().map(|(_, v)| *v).collect();
                prop_assert_eq!(actual, expected);
            }
        }
    }
}
