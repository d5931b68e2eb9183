//! World geometry contracts
//!
//! The BSP spatial database, surface data and displacement tessellation are
//! owned by the host renderer. The shadow manager only sees them through the
//! [`ShadowWorld`] trait.

use bitflags::bitflags;

use crate::foundation::math::{Aabb, Plane, Vec3};
use crate::render::ShadowMeshBuilder;
use crate::shadow::{ShadowClipper, ShadowDecalRenderInfo, ShadowHandle};

/// Dense index of a world or brush-model surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u32);

impl SurfaceId {
    /// Position in per-surface arrays
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// BSP leaf identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeafId(pub u32);

/// Handle into a displacement's own shadow fragment store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispShadowHandle(pub u32);

/// Studio model instance identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelInstanceId(pub u32);

/// Contiguous surface range of a brush model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrushModel {
    /// First surface belonging to the model
    pub first_surface: u32,
    /// Number of surfaces
    pub surface_count: u32,
}

impl BrushModel {
    /// Surfaces of this model
    pub fn surfaces(&self) -> impl Iterator<Item = SurfaceId> {
        (self.first_surface..self.first_surface + self.surface_count).map(SurfaceId)
    }
}

bitflags! {
    /// Per-surface flags relevant to shadow projection
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SurfaceFlags: u32 {
        /// Never drawn
        const NODRAW = 1 << 0;
        /// Rendered double-sided
        const NOCULL = 1 << 1;
        /// Does not receive projected shadows
        const NOSHADOWS = 1 << 2;
        /// Translucent material
        const TRANS = 1 << 3;
        /// Alpha-tested material
        const ALPHATEST = 1 << 4;
        /// Water surface
        const WATER = 1 << 5;
        /// Material opts out of dynamic shadows
        const DYNAMIC_SHADOWS_DISABLED = 1 << 6;
    }
}

/// Everything the shadow manager needs from the world.
///
/// Query methods take `&self`; the displacement shadow methods mutate the
/// displacement's own fragment store and take `&mut self`. None of them may
/// call back into the shadow manager.
pub trait ShadowWorld {
    /// Number of vertices on the surface polygon
    fn vertex_count(&self, surface: SurfaceId) -> usize;

    /// World (or model) space position of a surface vertex
    fn vertex(&self, surface: SurfaceId, index: usize) -> Vec3;

    /// Surface plane
    fn plane(&self, surface: SurfaceId) -> Plane;

    /// Surface flags
    fn flags(&self, surface: SurfaceId) -> SurfaceFlags;

    /// Material sort id of the surface, `None` if the surface has no material
    fn material_sort_id(&self, surface: SurfaceId) -> Option<u32>;

    /// Index of the surface's first vertex in the static world vertex buffer
    fn world_vertex_offset(&self, surface: SurfaceId) -> u32;

    /// True when the surface is tessellated as a displacement
    fn is_displacement(&self, surface: SurfaceId) -> bool;

    /// Regular surfaces referenced by a leaf
    fn surfaces_in_leaf(&self, leaf: LeafId) -> &[SurfaceId];

    /// Displacement surfaces touching a leaf
    fn displacements_in_leaf(&self, leaf: LeafId) -> &[SurfaceId];

    /// Leaf bounds
    fn leaf_bounds(&self, leaf: LeafId) -> Aabb;

    /// Bounds of a displacement's tessellated geometry
    fn displacement_bounds(&self, surface: SurfaceId) -> Aabb;

    /// Register a shadow with a displacement's fragment store
    fn add_shadow_decal(&mut self, surface: SurfaceId, shadow: ShadowHandle) -> Option<DispShadowHandle>;

    /// Release a displacement fragment store entry
    fn remove_shadow_decal(&mut self, surface: SurfaceId, handle: DispShadowHandle);

    /// Clip the displacement's triangles for this shadow.
    ///
    /// Returns `(vertex_count, index_count)` or `None` when nothing survives.
    fn compute_shadow_fragments(
        &mut self,
        surface: SurfaceId,
        handle: DispShadowHandle,
        clipper: &ShadowClipper<'_>,
    ) -> Option<(usize, usize)>;

    /// Append the computed fragments to a mesh, returning the next base index
    fn add_shadows_to_mesh_builder(
        &mut self,
        surface: SurfaceId,
        handle: DispShadowHandle,
        render_info: &ShadowDecalRenderInfo,
        builder: &mut dyn ShadowMeshBuilder,
        base_index: u32,
    ) -> u32;
}
