/*!
 * Slot Table
 * Generation-checked storage for per-allocation metadata
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable handle to a suballocation inside one block
///
/// A handle stays valid until its allocation is freed or the block is cleared.
/// Reusing a slot bumps its generation, so stale handles are rejected instead
/// of aliasing the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllocHandle {
    slot: u32,
    generation: u32,
}

impl AllocHandle {
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for AllocHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    epoch: u32,
    value: Option<T>,
}

/// Slab of values addressed by [`AllocHandle`]
///
/// `clear` is O(1): it advances the table epoch and every slot written in an
/// older epoch reads as vacant until it is reused.
#[derive(Debug, Clone)]
pub struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    high_water: u32,
    epoch: u32,
    len: usize,
}

impl<T> SlotTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            high_water: 0,
            epoch: 0,
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> AllocHandle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = self.high_water;
                self.high_water += 1;
                if index as usize == self.slots.len() {
                    self.slots.push(Slot {
                        generation: 0,
                        epoch: self.epoch,
                        value: None,
                    });
                }
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        slot.epoch = self.epoch;
        slot.value = Some(value);
        self.len += 1;

        AllocHandle {
            slot: index,
            generation: slot.generation,
        }
    }

    fn live(&self, handle: AllocHandle) -> Option<&Slot<T>> {
        self.slots
            .get(handle.slot as usize)
            .filter(|s| s.epoch == self.epoch && s.generation == handle.generation)
    }

    pub fn get(&self, handle: AllocHandle) -> Option<&T> {
        self.live(handle).and_then(|s| s.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: AllocHandle) -> Option<&mut T> {
        let epoch = self.epoch;
        self.slots
            .get_mut(handle.slot as usize)
            .filter(|s| s.epoch == epoch && s.generation == handle.generation)
            .and_then(|s| s.value.as_mut())
    }

    pub fn contains(&self, handle: AllocHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn remove(&mut self, handle: AllocHandle) -> Option<T> {
        let value = self.get_mut_slot(handle)?.value.take()?;
        self.free.push(handle.slot);
        self.len -= 1;
        Some(value)
    }

    fn get_mut_slot(&mut self, handle: AllocHandle) -> Option<&mut Slot<T>> {
        let epoch = self.epoch;
        self.slots
            .get_mut(handle.slot as usize)
            .filter(|s| s.epoch == epoch && s.generation == handle.generation)
    }

    /// Invalidate every handle at once
    pub fn clear(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.free.clear();
        self.high_water = 0;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (AllocHandle, &T)> + '_ {
        let epoch = self.epoch;
        self.slots[..self.high_water as usize]
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.epoch == epoch)
            .filter_map(|(index, s)| {
                s.value.as_ref().map(|v| {
                    (
                        AllocHandle {
                            slot: index as u32,
                            generation: s.generation,
                        },
                        v,
                    )
                })
            })
    }
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
