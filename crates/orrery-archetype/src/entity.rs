//! Generational entity handles and their locations.
//!
//! An [`EntityId`] is a slot index plus the generation the slot had when the
//! handle was issued. Despawning bumps the slot's generation, so every handle
//! issued before that point stops resolving. Freed slots are reused in the
//! order they were released.

use std::collections::VecDeque;
use std::fmt;

use orrery_reflect::Hash64;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Handle to an entity owned by an [`EcsManager`](crate::EcsManager).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    index: u32,
    generation: u32,
}

impl EntityId {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into one `u64`: generation in the high half, index in the low.
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId(#{}.{})", self.index, self.generation)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Where a live entity's instance row is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: Hash64,
    pub index: usize,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    /// `None` while the slot is free.
    location: Option<EntityLocation>,
}

/// Slot table mapping entity handles to locations.
#[derive(Debug, Default)]
pub struct Entities {
    slots: Vec<Slot>,
    free: VecDeque<u32>,
    live: usize,
}

impl Entities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a handle for an entity stored at `location`, reusing the
    /// oldest free slot when there is one.
    pub fn spawn(&mut self, location: EntityLocation) -> EntityId {
        self.live += 1;
        if let Some(index) = self.free.pop_front() {
            let slot = &mut self.slots[index as usize];
            slot.location = Some(location);
            return EntityId::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            location: Some(location),
        });
        EntityId::new(index, 0)
    }

    /// Release `entity` and return where it was stored. `None` for a stale
    /// or unknown handle.
    pub fn despawn(&mut self, entity: EntityId) -> Option<EntityLocation> {
        let slot = self.live_slot_mut(entity)?;
        let location = slot.location.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push_back(entity.index);
        self.live -= 1;
        Some(location)
    }

    pub fn location(&self, entity: EntityId) -> Option<EntityLocation> {
        self.slots
            .get(entity.index as usize)
            .filter(|slot| slot.generation == entity.generation)
            .and_then(|slot| slot.location)
    }

    /// Point a live entity at a new instance index. Used after a swap-remove
    /// moves its row.
    pub fn relocate(&mut self, entity: EntityId, index: usize) -> bool {
        match self.live_slot_mut(entity).and_then(|slot| slot.location.as_mut()) {
            Some(location) => {
                location.index = index;
                true
            }
            None => false,
        }
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.location(entity).is_some()
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn live_slot_mut(&mut self, entity: EntityId) -> Option<&mut Slot> {
        self.slots
            .get_mut(entity.index as usize)
            .filter(|slot| slot.generation == entity.generation && slot.location.is_some())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
