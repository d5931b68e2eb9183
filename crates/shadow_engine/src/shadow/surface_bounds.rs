//! Cached surface bounds for the near-surface test
//!
//! Computing a surface's bounds walks every vertex, so results are kept in a
//! fixed number of slots. A hit leaves the slot alone; a miss on a full cache
//! recycles the oldest slot.

use crate::foundation::math::{Aabb, BoundingSphere, Vec3};
use crate::world::{ShadowWorld, SurfaceId};

/// Padding added to every side of a surface box
const BOUNDS_PADDING: f32 = 1e-3;

/// Bounding volumes of one surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceBounds {
    /// Padded box
    pub aabb: Aabb,
    /// Sphere around the vertex average
    pub sphere: BoundingSphere,
}

impl SurfaceBounds {
    /// Compute bounds from a surface's vertices
    pub fn compute(world: &dyn ShadowWorld, surface: SurfaceId) -> Self {
        let positions: Vec<Vec3> = (0..world.vertex_count(surface))
            .map(|i| world.vertex(surface, i))
            .collect();
        Self::from_positions(&positions)
    }

    /// Compute bounds from positions
    pub fn from_positions(positions: &[Vec3]) -> Self {
        let Some(aabb) = Aabb::from_points(positions) else {
            return Self {
                aabb: Aabb::new(Vec3::zeros(), Vec3::zeros()),
                sphere: BoundingSphere::new(Vec3::zeros(), 0.0),
            };
        };
        let center = positions.iter().sum::<Vec3>() / positions.len() as f32;
        let radius = positions
            .iter()
            .map(|p| (p - center).norm())
            .fold(0.0_f32, f32::max);
        Self {
            aabb: aabb.expanded(Vec3::repeat(BOUNDS_PADDING)),
            sphere: BoundingSphere::new(center, radius),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    surface: SurfaceId,
    bounds: SurfaceBounds,
}

/// Fixed-capacity surface bounds cache
#[derive(Debug, Clone)]
pub struct SurfaceBoundsCache {
    slots: Vec<Slot>,
    slot_of_surface: Vec<Option<usize>>,
    capacity: usize,
    oldest: usize,
}

impl SurfaceBoundsCache {
    /// Create a cache holding up to `capacity` surfaces
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            slot_of_surface: Vec::new(),
            capacity: capacity.max(1),
            oldest: 0,
        }
    }

    /// Forget everything and size the per-surface index
    pub fn reset(&mut self, surface_count: usize) {
        self.slots.clear();
        self.slot_of_surface.clear();
        self.slot_of_surface.resize(surface_count, None);
        self.oldest = 0;
    }

    /// Bounds of `surface`, computing and caching on a miss
    pub fn get(&mut self, world: &dyn ShadowWorld, surface: SurfaceId) -> SurfaceBounds {
        if let Some(slot) = self.slot_of_surface.get(surface.index()).copied().flatten() {
            return self.slots[slot].bounds;
        }

        let bounds = SurfaceBounds::compute(world, surface);
        let slot = if self.slots.len() < self.capacity {
            self.slots.push(Slot { surface, bounds });
            self.slots.len() - 1
        } else {
            let victim = self.oldest;
            self.oldest = (self.oldest + 1) % self.capacity;
            if let Some(index) = self.slot_of_surface.get_mut(self.slots[victim].surface.index()) {
                *index = None;
            }
            self.slots[victim] = Slot { surface, bounds };
            victim
        };
        if let Some(index) = self.slot_of_surface.get_mut(surface.index()) {
            *index = Some(slot);
        }
        bounds
    }

    /// Is `surface` currently cached
    pub fn contains(&self, surface: SurfaceId) -> bool {
        self.slot_of_surface.get(surface.index()).copied().flatten().is_some()
    }

    /// Number of cached surfaces
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
