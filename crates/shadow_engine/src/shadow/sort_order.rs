//! Material sort-order slots
//!
//! Projectors that share a shadow material share one sort-order id, and so
//! one render queue slot. A slot lives as long as at least one projector
//! references it.

use crate::foundation::collections::{Pool, PoolExhausted};
use crate::render::MaterialId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SortOrderSlot {
    material: Option<MaterialId>,
    ref_count: usize,
}

/// Reference-counted mapping from material identity to sort-order id
#[derive(Debug, Clone)]
pub struct SortOrderRegistry {
    slots: Pool<SortOrderSlot>,
}

impl SortOrderRegistry {
    /// Create a registry with room for `capacity` distinct materials
    pub const fn new(capacity: usize) -> Self {
        Self { slots: Pool::with_capacity_limit(capacity) }
    }

    /// Sort-order id for `material`, creating a slot on first use
    pub fn acquire(&mut self, material: Option<MaterialId>) -> Result<usize, PoolExhausted> {
        let existing = self
            .slots
            .iter()
            .find(|(_, slot)| slot.material == material)
            .map(|(id, _)| id);
        if let Some(id) = existing {
            if let Some(slot) = self.slots.get_mut(id) {
                slot.ref_count += 1;
            }
            return Ok(id);
        }
        self.slots.insert(SortOrderSlot { material, ref_count: 1 })
    }

    /// Drop one reference; the slot is freed with the last one
    pub fn release(&mut self, id: usize) {
        let Some(slot) = self.slots.get_mut(id) else {
            debug_assert!(false, "released unknown sort order {id}");
            return;
        };
        slot.ref_count -= 1;
        if slot.ref_count == 0 {
            self.slots.remove(id);
        }
    }

    /// Live references to a slot, 0 if it is free
    pub fn ref_count(&self, id: usize) -> usize {
        self.slots.get(id).map_or(0, |slot| slot.ref_count)
    }

    /// Number of slots in use
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no material is registered
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
