//! Per-frame queue of decals to draw, one chain per sort-order id

use super::decal::DecalArena;
use super::DecalHandle;

/// Render queue slots and the pending decal count
#[derive(Debug, Clone, Default)]
pub struct RenderQueue {
    heads: Vec<Option<DecalHandle>>,
    decals_to_render: usize,
}

impl RenderQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `sort_order` has a slot
    pub fn ensure_slot(&mut self, sort_order: usize) {
        if self.heads.len() <= sort_order {
            self.heads.resize(sort_order + 1, None);
        }
    }

    /// Push a decal onto the head of its slot's chain
    pub fn push(&mut self, decals: &mut DecalArena, sort_order: usize, handle: DecalHandle) {
        self.ensure_slot(sort_order);
        let Some(decal) = decals.get_mut(handle) else {
            return;
        };
        decal.next_render = self.heads[sort_order];
        self.heads[sort_order] = Some(handle);
        self.decals_to_render += 1;
    }

    /// Count a decal rendered outside the queue (flashlight buckets)
    pub fn count_external(&mut self) {
        self.decals_to_render += 1;
    }

    /// Head of a slot's chain
    pub fn head(&self, sort_order: usize) -> Option<DecalHandle> {
        self.heads.get(sort_order).copied().flatten()
    }

    /// Slots with at least one decal
    pub fn populated(&self) -> impl Iterator<Item = (usize, DecalHandle)> + '_ {
        self.heads
            .iter()
            .enumerate()
            .filter_map(|(sort_order, head)| head.map(|h| (sort_order, h)))
    }

    /// Decals queued this frame
    pub const fn decals_to_render(&self) -> usize {
        self.decals_to_render
    }

    /// Number of slots
    pub fn slot_count(&self) -> usize {
        self.heads.len()
    }

    /// Empty every slot and zero the counter
    pub fn clear(&mut self) {
        self.heads.fill(None);
        self.decals_to_render = 0;
    }
}
