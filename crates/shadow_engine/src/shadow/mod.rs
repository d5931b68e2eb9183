//! # Shadow Manager
//!
//! Owns every projector, every projector/surface association and every piece
//! of cached decal geometry. The host renderer drives it once per frame:
//!
//! 1. [`ShadowManager::project_shadow`] / [`ShadowManager::project_flashlight`]
//!    associate projectors with surfaces.
//! 2. [`ShadowManager::add_shadows_on_surface_to_render_list`] is called for
//!    every visible surface.
//! 3. [`ShadowManager::render_projected_textures`] (or the individual
//!    render calls followed by [`ShadowManager::clear_render_queue`]) draws
//!    and resets the queue.
//!
//! All state is owned here and mutated on the render thread only. World and
//! rasterizer collaborators are passed in by reference per call.

mod association;
mod batcher;
pub mod clip;
pub mod decal;
pub mod falloff;
pub mod flashlight;
pub mod material_buckets;
pub mod model_shadows;
pub mod projector;
pub mod render_queue;
pub mod sort_order;
pub mod surface_bounds;
pub mod vertex_cache;

#[cfg(test)]
mod tests;

pub use association::ShadowProjection;
pub use batcher::{DecalGeometry, GeometryRef};
pub use clip::{ShadowClipper, ShadowVertex};
pub use decal::ShadowDecal;
pub use falloff::{compute_darkness, ShadowDecalRenderInfo};
pub use flashlight::{FlashlightMasks, FlashlightPhase, MaskPolygon};
pub use model_shadows::ModelShadowState;
pub use projector::{Projector, ProjectorKind, ShadowCreateFlags, ShadowInfo};
pub use vertex_cache::{CacheError, TierUsage};

use slotmap::SlotMap;

use self::batcher::DecalRenderCache;
use self::clip::{ClipBuffers, MAX_CLIP_PLANES};
use self::decal::DecalArena;
use self::model_shadows::ModelShadowLinks;
use self::render_queue::RenderQueue;
use self::sort_order::SortOrderRegistry;
use self::surface_bounds::SurfaceBoundsCache;
use self::vertex_cache::VertexCache;
use crate::core::config::ShadowConfig;
use crate::foundation::logging::info;
use crate::world::{ShadowWorld, SurfaceId};

slotmap::new_key_type! {
    /// Projector handle, generation checked
    pub struct ShadowHandle;

    /// Surface decal handle, generation checked
    pub struct DecalHandle;
}

/// Errors surfaced by projector creation and configuration
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowError {
    /// No projector slot left
    #[error("projector pool exhausted (capacity {capacity})")]
    ProjectorPoolExhausted {
        /// Configured projector capacity
        capacity: usize,
    },

    /// No material sort-order slot left
    #[error("material sort orders exhausted")]
    SortOrderExhausted,

    /// Handle does not name a live projector
    #[error("invalid shadow handle")]
    InvalidHandle,

    /// Projector already has the maximum number of extra clip planes
    #[error("a shadow supports at most {} extra clip planes", MAX_CLIP_PLANES)]
    ClipPlaneLimit,
}

/// The shadow and flashlight decal engine
#[derive(Debug)]
pub struct ShadowManager {
    pub(crate) config: ShadowConfig,
    pub(crate) projectors: SlotMap<ShadowHandle, projector::Projector>,
    pub(crate) sort_orders: SortOrderRegistry,
    pub(crate) decals: DecalArena,
    pub(crate) surface_visits: Vec<u32>,
    pub(crate) displacement_visits: Vec<u32>,
    pub(crate) vis_frame: u32,
    pub(crate) vertex_cache: VertexCache,
    pub(crate) bounds_cache: SurfaceBoundsCache,
    pub(crate) render_queue: RenderQueue,
    pub(crate) decal_cache: DecalRenderCache,
    pub(crate) model_links: ModelShadowLinks,
    pub(crate) clip_buffers: ClipBuffers,
    pub(crate) world_material_buckets: usize,
}

impl ShadowManager {
    /// Create a manager; call [`Self::level_init`] before projecting
    pub fn new(config: ShadowConfig) -> Self {
        Self {
            projectors: SlotMap::with_key(),
            sort_orders: SortOrderRegistry::new(config.max_projectors),
            decals: DecalArena::new(config.max_decals),
            surface_visits: Vec::new(),
            displacement_visits: Vec::new(),
            vis_frame: 0,
            vertex_cache: VertexCache::new(&config),
            bounds_cache: SurfaceBoundsCache::new(config.surface_bounds_cache_size),
            render_queue: RenderQueue::new(),
            decal_cache: DecalRenderCache::new(config.decal_cache_initial, config.decal_cache_max),
            model_links: ModelShadowLinks::default(),
            clip_buffers: ClipBuffers::default(),
            world_material_buckets: 0,
            config,
        }
    }

    /// Current configuration
    pub const fn config(&self) -> &ShadowConfig {
        &self.config
    }

    /// Replace the runtime switches. Capacities are fixed at construction.
    pub fn set_config(&mut self, config: ShadowConfig) {
        self.config = ShadowConfig {
            max_projectors: self.config.max_projectors,
            max_decals: self.config.max_decals,
            small_tier_capacity: self.config.small_tier_capacity,
            large_tier_capacity: self.config.large_tier_capacity,
            heap_tier_capacity: self.config.heap_tier_capacity,
            surface_bounds_cache_size: self.config.surface_bounds_cache_size,
            decal_cache_initial: self.config.decal_cache_initial,
            decal_cache_max: self.config.decal_cache_max,
            ..config
        };
    }

    /// Size per-surface state for a newly loaded level
    pub fn level_init(&mut self, surface_count: usize) {
        info!("Shadow manager level init: {surface_count} surfaces");
        self.drop_all_associations();
        self.decals.reset(surface_count);
        self.surface_visits = vec![0; surface_count];
        self.displacement_visits = vec![0; surface_count];
        self.vis_frame = 0;
        self.bounds_cache.reset(surface_count);
    }

    /// Drop every per-level structure. Collaborators are not notified; their
    /// geometry is going away with the level.
    pub fn level_shutdown(&mut self) {
        info!("Shadow manager level shutdown");
        self.drop_all_associations();
        self.decals.reset(0);
        self.surface_visits.clear();
        self.displacement_visits.clear();
        self.bounds_cache.reset(0);
    }

    fn drop_all_associations(&mut self) {
        for projector in self.projectors.values_mut() {
            projector.decal_head = None;
            if let Some(flashlight) = projector.flashlight_mut() {
                flashlight.flush_buckets();
            }
        }
        self.vertex_cache.clear();
        self.render_queue.clear();
        self.model_links.clear();
    }

    /// Decals hanging off a surface
    pub fn decals_on_surface(&self, surface: SurfaceId) -> impl Iterator<Item = DecalHandle> + '_ {
        self.decals.on_surface(surface)
    }

    /// Decals owned by a projector
    pub fn shadow_decals(&self, handle: ShadowHandle) -> impl Iterator<Item = DecalHandle> + '_ {
        let head = self.projectors.get(handle).and_then(|p| p.decal_head);
        self.decals.of_shadow(head)
    }

    /// A decal
    pub fn decal(&self, handle: DecalHandle) -> Option<&ShadowDecal> {
        self.decals.get(handle)
    }

    /// Number of live decals
    pub fn decal_count(&self) -> usize {
        self.decals.len()
    }

    /// Vertex storage in use across tiers
    pub fn vertex_usage(&self) -> TierUsage {
        self.vertex_cache.usage()
    }

    /// Decals queued for the current frame
    pub const fn decals_to_render(&self) -> usize {
        self.render_queue.decals_to_render()
    }

    /// Head of a render queue slot, `None` when the slot is empty
    pub fn render_queue_head(&self, sort_order: usize) -> Option<DecalHandle> {
        self.render_queue.head(sort_order)
    }

    /// Unlink and free one decal with its geometry and displacement entry
    pub(crate) fn remove_decal(&mut self, world: &mut dyn ShadowWorld, handle: DecalHandle) {
        let Some(decal) = self.decals.get(handle) else {
            return;
        };
        let shadow = decal.shadow;
        let Some(projector) = self.projectors.get_mut(shadow) else {
            debug_assert!(false, "decal {handle:?} has no projector");
            return;
        };
        let Some(decal) = self.decals.remove(&mut projector.decal_head, handle) else {
            return;
        };
        if let Some(key) = decal.geometry {
            self.vertex_cache.remove_persistent(key);
        }
        if let Some(disp) = decal.disp_shadow {
            world.remove_shadow_decal(decal.surface, disp);
        }
    }

    /// Drop every surface association of a projector
    pub(crate) fn remove_all_surfaces_from_shadow(&mut self, world: &mut dyn ShadowWorld, handle: ShadowHandle) {
        while let Some(head) = self.projectors.get(handle).and_then(|p| p.decal_head) {
            if self.decals.get(head).is_none() {
                if let Some(projector) = self.projectors.get_mut(handle) {
                    projector.decal_head = None;
                }
                break;
            }
            self.remove_decal(world, head);
        }
        if let Some(flashlight) = self.projectors.get_mut(handle).and_then(projector::Projector::flashlight_mut) {
            flashlight.flush_buckets();
        }
    }
}
