//! # Shadow Configuration
//!
//! Runtime switches and pool capacities for the shadow manager. The switches
//! mirror the renderer's console toggles; the capacities bound every arena the
//! manager owns so that exhaustion degrades into missing shadows instead of
//! unbounded allocation.

use serde::{Deserialize, Serialize};

pub use crate::config::{Config, ConfigError};

/// Options recognised by [`crate::shadow::ShadowManager`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Master switch for projected shadows
    pub shadows_enabled: bool,
    /// When off, non-flashlight decals are never queued for rendering
    pub game_control: bool,
    /// Render flashlight buckets at all
    pub flashlight_render: bool,
    /// Backface-cull surfaces added to flashlight occluder buckets
    pub flashlight_cull_depth: bool,
    /// Stencil mask the flashlight footprint
    pub flashlight_clip: bool,
    /// Scissor the flashlight footprint
    pub flashlight_scissor: bool,

    /// Projector slot capacity
    pub max_projectors: usize,
    /// Surface decal arena capacity
    pub max_decals: usize,
    /// Vertex lists of up to 8 vertices
    pub small_tier_capacity: usize,
    /// Vertex lists of up to 32 vertices
    pub large_tier_capacity: usize,
    /// Heap vertex lists, used for big polygons and tier overflow
    pub heap_tier_capacity: usize,
    /// Entries in the surface bounds LRU
    pub surface_bounds_cache_size: usize,
    /// Initial scratch entries for per-frame decal geometry
    pub decal_cache_initial: usize,
    /// Hard ceiling for per-frame decal geometry
    pub decal_cache_max: usize,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            shadows_enabled: true,
            game_control: true,
            flashlight_render: true,
            flashlight_cull_depth: false,
            flashlight_clip: false,
            flashlight_scissor: true,
            max_projectors: 4096,
            max_decals: 64 * 1024,
            small_tier_capacity: 4096,
            large_tier_capacity: 1024,
            heap_tier_capacity: 256,
            surface_bounds_cache_size: 1024,
            decal_cache_initial: 16 * 1024,
            decal_cache_max: 64 * 1024,
        }
    }
}

impl ShadowConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle projected shadows
    #[must_use]
    pub const fn with_shadows_enabled(mut self, enabled: bool) -> Self {
        self.shadows_enabled = enabled;
        self
    }

    /// Toggle game control of shadow queuing
    #[must_use]
    pub const fn with_game_control(mut self, enabled: bool) -> Self {
        self.game_control = enabled;
        self
    }

    /// Configure the flashlight stencil and scissor optimizations
    #[must_use]
    pub const fn with_flashlight_masking(mut self, clip: bool, scissor: bool) -> Self {
        self.flashlight_clip = clip;
        self.flashlight_scissor = scissor;
        self
    }

    /// Toggle the flashlight occluder backface test
    #[must_use]
    pub const fn with_flashlight_cull_depth(mut self, enabled: bool) -> Self {
        self.flashlight_cull_depth = enabled;
        self
    }

    /// Set projector and decal arena capacities
    #[must_use]
    pub const fn with_arena_capacities(mut self, projectors: usize, decals: usize) -> Self {
        self.max_projectors = projectors;
        self.max_decals = decals;
        self
    }

    /// Set the three vertex storage tier capacities
    #[must_use]
    pub const fn with_vertex_tiers(mut self, small: usize, large: usize, heap: usize) -> Self {
        self.small_tier_capacity = small;
        self.large_tier_capacity = large;
        self.heap_tier_capacity = heap;
        self
    }

    /// Set initial and maximum per-frame decal geometry entries
    #[must_use]
    pub const fn with_decal_cache(mut self, initial: usize, max: usize) -> Self {
        self.decal_cache_initial = initial;
        self.decal_cache_max = max;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("max_projectors", self.max_projectors),
            ("max_decals", self.max_decals),
            ("small_tier_capacity", self.small_tier_capacity),
            ("large_tier_capacity", self.large_tier_capacity),
            ("heap_tier_capacity", self.heap_tier_capacity),
            ("surface_bounds_cache_size", self.surface_bounds_cache_size),
            ("decal_cache_initial", self.decal_cache_initial),
        ];
        if let Some((name, _)) = capacities.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        if self.decal_cache_initial > self.decal_cache_max {
            return Err(ConfigError::Invalid(format!(
                "decal_cache_initial ({}) exceeds decal_cache_max ({})",
                self.decal_cache_initial, self.decal_cache_max
            )));
        }
        Ok(())
    }
}

impl Config for ShadowConfig {}
