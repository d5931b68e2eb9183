//! Render list batching
//!
//! Visible surfaces push their decals onto the render queue; rendering walks
//! each populated sort-order slot, makes sure every decal has clipped
//! geometry, and submits one dynamic mesh per slot. Normal surfaces are fan
//! triangulated here; displacement decals append their own fragments after
//! them.

use super::clip::ShadowVertex;
use super::falloff::FULLY_FADED_BIAS;
use super::vertex_cache::VertexCacheKey;
use super::{DecalHandle, ShadowClipper, ShadowHandle, ShadowManager};
use crate::foundation::logging::debug;
use crate::foundation::math::{transform_position, Mat4, Vec3};
use crate::render::{ShadowMeshVertex, ShadowRasterizer};
use crate::world::{DispShadowHandle, ShadowWorld, SurfaceId};
use crate::warn_n_times;

/// Where a decal's clipped geometry lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryRef {
    /// Kept across frames
    Persistent(VertexCacheKey),
    /// Valid until the next render pass starts
    Temp(usize),
}

/// Outcome of making sure a decal has geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecalGeometry {
    /// Clipped polygon ready to draw
    Ready(GeometryRef),
    /// The projector does not reach the surface; nothing to draw
    Empty,
    /// Vertex storage is exhausted; skip the decal this frame
    Unavailable,
}

#[derive(Debug, Clone, Copy)]
enum DecalRenderEntry {
    Surface(GeometryRef),
    Displacement {
        shadow: ShadowHandle,
        surface: SurfaceId,
        disp_shadow: DispShadowHandle,
    },
}

/// Per-frame list of decals that made it into the current mesh
#[derive(Debug, Clone)]
pub struct DecalRenderCache {
    entries: Vec<DecalRenderEntry>,
    capacity: usize,
    max_capacity: usize,
}

impl DecalRenderCache {
    /// Start at `initial` entries, never grow beyond `max`
    pub fn new(initial: usize, max: usize) -> Self {
        Self {
            entries: Vec::with_capacity(initial),
            capacity: initial,
            max_capacity: max.max(initial),
        }
    }

    /// Grow geometrically until `needed` fits or the ceiling is reached
    fn reserve(&mut self, needed: usize) {
        if needed <= self.capacity || self.capacity >= self.max_capacity {
            return;
        }
        let mut grown = self.capacity.max(1);
        while grown < needed {
            grown *= 2;
        }
        let grown = grown.min(self.max_capacity);
        debug!("Shadow decal cache grown from {} to {} entries", self.capacity, grown);
        self.entries.reserve(grown.saturating_sub(self.entries.len()));
        self.capacity = grown;
    }

    /// Current entry capacity
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct BatchBudget {
    vertices: usize,
    indices: usize,
    max_vertices: usize,
    max_indices: usize,
}

impl BatchBudget {
    fn fits(&self, vertices: usize, indices: usize) -> bool {
        self.vertices + vertices < self.max_vertices && self.indices + indices < self.max_indices
    }

    fn take(&mut self, vertices: usize, indices: usize) {
        self.vertices += vertices;
        self.indices += indices;
    }
}

const fn fan_index_count(vertex_count: usize) -> usize {
    3 * (vertex_count - 2)
}

impl ShadowManager {
    /// Queue every decal on a visible surface for this frame
    pub fn add_shadows_on_surface_to_render_list(&mut self, world: &dyn ShadowWorld, surface: SurfaceId) {
        let game_control = self.config.game_control;
        let decals: Vec<DecalHandle> = self.decals.on_surface(surface).collect();
        for handle in decals {
            let Some(shadow) = self.decals.get(handle).map(|d| d.shadow) else {
                continue;
            };
            let Some(projector) = self.projectors.get_mut(shadow) else {
                continue;
            };
            if let Some(flashlight) = projector.flashlight_mut() {
                if let Some(sort_id) = world.material_sort_id(surface) {
                    flashlight.material_buckets.add(sort_id as usize, surface);
                    self.render_queue.count_external();
                }
            } else if game_control {
                if let Some(sort_order) = projector.sort_order {
                    self.render_queue.push(&mut self.decals, sort_order, handle);
                }
            }
        }
    }

    /// Empty the render queue and the flashlight material buckets
    pub fn clear_render_queue(&mut self) {
        self.render_queue.clear();
        for projector in self.projectors.values_mut() {
            if let Some(flashlight) = projector.flashlight_mut() {
                flashlight.material_buckets.flush();
            }
        }
    }

    /// Draw every queued shadow decal, one mesh per sort order.
    ///
    /// `model_to_world` is set when the queued surfaces belong to a moving
    /// brush model.
    pub fn render_queued_shadows<R: ShadowRasterizer>(
        &mut self,
        world: &mut dyn ShadowWorld,
        ctx: &mut R,
        model_to_world: Option<&Mat4>,
    ) {
        let lists: Vec<(usize, DecalHandle)> = self.render_queue.populated().collect();
        for (_, head) in lists {
            self.render_shadow_list(world, ctx, head, model_to_world);
        }
    }

    /// Flashlights, then shadows, then reset the queue for the next frame
    pub fn render_projected_textures<R: ShadowRasterizer>(
        &mut self,
        world: &mut dyn ShadowWorld,
        ctx: &mut R,
        model_to_world: Option<&Mat4>,
    ) {
        self.render_flashlights(world, ctx, true);
        self.render_queued_shadows(world, ctx, model_to_world);
        self.clear_render_queue();
    }

    fn render_shadow_list<R: ShadowRasterizer>(
        &mut self,
        world: &mut dyn ShadowWorld,
        ctx: &mut R,
        head: DecalHandle,
        model_to_world: Option<&Mat4>,
    ) {
        self.decal_cache.reserve(self.render_queue.decals_to_render());

        // Every decal in a list shares the material of the first one
        let Some(material) = self
            .decals
            .get(head)
            .and_then(|d| self.projectors.get(d.shadow))
            .and_then(|p| p.material.clone())
        else {
            return;
        };
        ctx.bind_material(&material);

        self.vertex_cache.clear_temp();
        self.decal_cache.entries.clear();

        let mut budget = BatchBudget {
            max_vertices: ctx.max_vertices_to_render(&material),
            max_indices: ctx.max_indices_to_render(),
            ..BatchBudget::default()
        };
        self.generate_render_info(world, head, model_to_world, &mut budget);
        if self.decal_cache.entries.is_empty() || budget.vertices == 0 {
            return;
        }

        ctx.begin_dynamic_mesh(budget.vertices, budget.indices);
        let mut base_index = 0_u32;

        for entry in &self.decal_cache.entries {
            let DecalRenderEntry::Surface(geometry) = *entry else {
                continue;
            };
            let Some((shadow, vertices)) = self.geometry(geometry) else {
                continue;
            };
            let Some(info) = self.projectors.get(shadow).map(super::Projector::render_info) else {
                continue;
            };
            for vertex in vertices {
                ctx.emit_vertex(ShadowMeshVertex::new(
                    &vertex.position,
                    info.darkness(vertex.tex_coord.z),
                    info.tex_coord(&vertex.tex_coord),
                ));
            }
            let count = vertices.len() as u32;
            for i in 1..count - 1 {
                ctx.emit_index(base_index);
                ctx.emit_index(base_index + i);
                ctx.emit_index(base_index + i + 1);
            }
            base_index += count;
        }

        for entry in &self.decal_cache.entries {
            let DecalRenderEntry::Displacement { shadow, surface, disp_shadow } = *entry else {
                continue;
            };
            let Some(info) = self.projectors.get(shadow).map(super::Projector::render_info) else {
                continue;
            };
            base_index = world.add_shadows_to_mesh_builder(surface, disp_shadow, &info, ctx, base_index);
        }

        ctx.end_and_draw();
    }

    fn generate_render_info(
        &mut self,
        world: &mut dyn ShadowWorld,
        head: DecalHandle,
        model_to_world: Option<&Mat4>,
        budget: &mut BatchBudget,
    ) {
        // A surface marked twice in one frame would otherwise loop the chain
        let mut remaining = self.decals.len();
        let mut next = Some(head);
        while let Some(handle) = next {
            if remaining == 0 {
                break;
            }
            remaining -= 1;
            let Some(decal) = self.decals.get(handle) else {
                break;
            };
            next = decal.next_render;
            let (shadow, surface, disp_shadow) = (decal.shadow, decal.surface, decal.disp_shadow);

            let Some(projector) = self.projectors.get(shadow) else {
                continue;
            };
            if projector.info.falloff_bias == FULLY_FADED_BIAS {
                continue;
            }
            let caches_vertices = projector.caches_vertices();

            if self.decal_cache.entries.len() >= self.decal_cache.capacity {
                warn_n_times!(
                    10,
                    "Too many shadow decals to render this frame ({}); the rest are dropped",
                    self.decal_cache.capacity
                );
                break;
            }

            let keep = if let Some(disp_shadow) = disp_shadow {
                let clipper = ShadowClipper::new(projector, model_to_world);
                match world.compute_shadow_fragments(surface, disp_shadow, &clipper) {
                    None => false,
                    Some((vertices, indices)) => {
                        if budget.fits(vertices, indices) {
                            budget.take(vertices, indices);
                            self.decal_cache
                                .entries
                                .push(DecalRenderEntry::Displacement { shadow, surface, disp_shadow });
                        }
                        true
                    }
                }
            } else {
                match self.ensure_computed(world, handle, model_to_world) {
                    DecalGeometry::Empty => false,
                    DecalGeometry::Unavailable => true,
                    DecalGeometry::Ready(geometry) => {
                        let count = self.geometry(geometry).map_or(0, |(_, v)| v.len());
                        if count >= 3 && budget.fits(count, fan_index_count(count)) {
                            budget.take(count, fan_index_count(count));
                            self.decal_cache.entries.push(DecalRenderEntry::Surface(geometry));
                        }
                        true
                    }
                }
            };

            if !keep && caches_vertices {
                self.remove_decal(world, handle);
            }
        }
    }

    /// Make sure a decal has clipped geometry, computing it on demand.
    ///
    /// Projectors that cache vertices reuse their persistent entry; all
    /// others get a temporary entry valid until the next render pass.
    pub fn ensure_computed(
        &mut self,
        world: &dyn ShadowWorld,
        handle: DecalHandle,
        model_to_world: Option<&Mat4>,
    ) -> DecalGeometry {
        let Some(decal) = self.decals.get(handle) else {
            debug_assert!(false, "invalid decal {handle:?}");
            return DecalGeometry::Empty;
        };
        let (shadow, surface, cached) = (decal.shadow, decal.surface, decal.geometry);
        let Some(projector) = self.projectors.get(shadow) else {
            return DecalGeometry::Empty;
        };
        let caches_vertices = projector.caches_vertices();

        if caches_vertices {
            if let Some(key) = cached.filter(|key| self.vertex_cache.persistent(*key).is_some()) {
                return DecalGeometry::Ready(GeometryRef::Persistent(key));
            }
        }

        if !self.is_shadow_near_surface(world, shadow, surface, model_to_world) {
            return DecalGeometry::Empty;
        }

        let positions: Vec<Vec3> = (0..world.vertex_count(surface)).map(|i| world.vertex(surface, i)).collect();
        let normal = world.plane(surface).normal;
        let Some(projector) = self.projectors.get(shadow) else {
            return DecalGeometry::Empty;
        };
        let Some(vertices) =
            Self::compute_shadow_vertices(&mut self.clip_buffers, projector, &positions, &normal, model_to_world)
        else {
            return DecalGeometry::Empty;
        };

        let stored = if caches_vertices {
            self.vertex_cache.insert_persistent(shadow, &vertices).map(|key| {
                if let Some(decal) = self.decals.get_mut(handle) {
                    decal.geometry = Some(key);
                }
                GeometryRef::Persistent(key)
            })
        } else {
            self.vertex_cache.push_temp(shadow, &vertices).map(GeometryRef::Temp)
        };

        match stored {
            Ok(geometry) => DecalGeometry::Ready(geometry),
            Err(err) => {
                warn_n_times!(10, "Shadow vertex cache full: {err}");
                DecalGeometry::Unavailable
            }
        }
    }

    /// Free a decal's persistent geometry so the next render recomputes it
    pub fn invalidate_decal(&mut self, handle: DecalHandle) {
        let Some(decal) = self.decals.get_mut(handle) else {
            debug_assert!(false, "invalid decal {handle:?}");
            return;
        };
        if let Some(key) = decal.geometry.take() {
            self.vertex_cache.remove_persistent(key);
        }
    }

    /// Owning projector and vertices of computed geometry
    pub fn geometry(&self, geometry: GeometryRef) -> Option<(ShadowHandle, &[ShadowVertex])> {
        let entry = match geometry {
            GeometryRef::Persistent(key) => self.vertex_cache.persistent(key)?,
            GeometryRef::Temp(index) => self.vertex_cache.temp(index)?,
        };
        Some((entry.shadow, self.vertex_cache.vertices(entry)))
    }

    /// Coarse test that the projector's volume reaches the surface
    pub fn is_shadow_near_surface(
        &mut self,
        world: &dyn ShadowWorld,
        shadow: ShadowHandle,
        surface: SurfaceId,
        model_to_world: Option<&Mat4>,
    ) -> bool {
        let bounds = self.bounds_cache.get(world, surface);
        let Some(projector) = self.projectors.get(shadow) else {
            return false;
        };

        let mut surface_sphere = bounds.sphere;
        if let Some(model_to_world) = model_to_world {
            surface_sphere.center = transform_position(model_to_world, &surface_sphere.center);
        }
        if !surface_sphere.intersects(&projector.sphere) {
            return false;
        }

        match model_to_world {
            None => bounds.aabb.intersects_swept_box(&projector.ray),
            Some(model_to_world) => {
                let world_to_model = model_to_world.try_inverse().unwrap_or_else(Mat4::identity);
                bounds.aabb.intersects_swept_box(&projector.ray.transformed(&world_to_model))
            }
        }
    }
}
