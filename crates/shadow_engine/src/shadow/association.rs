//! Surface association
//!
//! Decides which surfaces and displacements a projector may touch and links
//! them with decals. Clipping is deferred until a decal is actually rendered.
//! Every projection starts from scratch: prior associations are dropped first.

use super::{ShadowHandle, ShadowManager};
use crate::foundation::logging::trace;
use crate::foundation::math::{transform_direction, BoundingSphere, Frustum, Mat4, SweptBox, Vec2, Vec3};
use crate::world::{BrushModel, LeafId, ShadowWorld, SurfaceFlags, SurfaceId};
use crate::warn_n_times;

/// Surfaces closer than this to edge-on are not shadowed
pub const BACKFACE_EPSILON: f32 = 0.01;

/// Where and how far a shadow projects
#[derive(Debug, Clone, Copy)]
pub struct ShadowProjection<'a> {
    /// Caster origin
    pub origin: Vec3,
    /// Unit projection direction
    pub projection_dir: Vec3,
    /// World space to shadow space
    pub world_to_shadow: Mat4,
    /// Footprint of the shadow texture in world units
    pub size: Vec2,
    /// Leaves the projection volume touches
    pub leaves: &'a [LeafId],
    /// Projection depth
    pub max_height: f32,
    /// Depth at which falloff begins
    pub falloff_offset: f32,
    /// Darkness gained over the falloff range
    pub falloff_amount: f32,
}

/// Backface test shared by world and brush surfaces.
///
/// Returns whether the surface faces the projector, or `None` to reject.
fn facing(flags: SurfaceFlags, dot: f32) -> Option<bool> {
    if flags.contains(SurfaceFlags::NOCULL) {
        (dot.abs() >= BACKFACE_EPSILON).then_some(dot < 0.0)
    } else {
        (dot <= -BACKFACE_EPSILON).then_some(true)
    }
}

impl ShadowManager {
    fn next_vis_frame(&mut self) -> u32 {
        self.vis_frame = self.vis_frame.wrapping_add(1);
        if self.vis_frame == 0 {
            self.surface_visits.fill(0);
            self.displacement_visits.fill(0);
            self.vis_frame = 1;
        }
        self.vis_frame
    }

    fn mark_surface_visited(&mut self, surface: SurfaceId) -> bool {
        match self.surface_visits.get_mut(surface.index()) {
            Some(frame) if *frame != self.vis_frame => {
                *frame = self.vis_frame;
                true
            }
            _ => false,
        }
    }

    fn mark_displacement_visited(&mut self, surface: SurfaceId) -> bool {
        match self.displacement_visits.get_mut(surface.index()) {
            Some(frame) if *frame != self.vis_frame => {
                *frame = self.vis_frame;
                true
            }
            _ => false,
        }
    }

    /// Re-associate a shadow projector with the surfaces in `projection.leaves`
    pub fn project_shadow(&mut self, world: &mut dyn ShadowWorld, handle: ShadowHandle, projection: &ShadowProjection<'_>) {
        if !self.projectors.contains_key(handle) {
            debug_assert!(false, "projecting invalid shadow {handle:?}");
            return;
        }
        self.remove_all_surfaces_from_shadow(world, handle);
        self.remove_all_models_from_shadow(handle);

        let shadows_enabled = self.config.shadows_enabled;
        let Some(projector) = self.projectors.get_mut(handle) else {
            return;
        };
        if !projector.enabled || !shadows_enabled {
            return;
        }

        projector.info.falloff_offset = projection.falloff_offset;
        projector.info.max_dist = projection.max_height;
        projector.info.falloff_amount = projection.falloff_amount;
        projector.info.world_to_shadow = projection.world_to_shadow;
        projector.projection_dir = projection.projection_dir;

        let radius = projection.size.norm() * 0.5;
        let half_height = 0.5 * projection.max_height;
        projector.sphere = BoundingSphere::new(
            projection.origin + projection.projection_dir * half_height,
            half_height + radius,
        );
        projector.ray = SweptBox::new(
            projection.origin,
            projection.origin + projection.projection_dir * projection.max_height,
            Vec3::repeat(radius),
        );

        if projection.leaves.is_empty() {
            return;
        }
        self.next_vis_frame();
        for &leaf in projection.leaves {
            self.apply_shadow_to_leaf(world, handle, leaf);
        }
        trace!("Shadow {handle:?} associated with {} surfaces", self.shadow_decals(handle).count());
    }

    fn apply_shadow_to_leaf(&mut self, world: &mut dyn ShadowWorld, handle: ShadowHandle, leaf: LeafId) {
        let Some(projector) = self.projectors.get(handle) else {
            return;
        };
        let dir = projector.projection_dir;
        let ray_start = projector.ray.start;
        let sphere = projector.sphere;

        let surfaces = world.surfaces_in_leaf(leaf).to_vec();
        for surface in surfaces {
            if !self.mark_surface_visited(surface) {
                continue;
            }
            let flags = world.flags(surface);
            if flags.intersects(SurfaceFlags::NODRAW | SurfaceFlags::DYNAMIC_SHADOWS_DISABLED) {
                continue;
            }

            let plane = world.plane(surface);
            let Some(in_front) = facing(flags, plane.normal.dot(&dir)) else {
                continue;
            };

            // The caster origin must be on the lit side of the receiver
            let start_dist = plane.normal.dot(&ray_start);
            if (in_front && start_dist < plane.dist) || (!in_front && start_dist > plane.dist) {
                continue;
            }

            if plane.distance_to_point(&sphere.center).abs() >= sphere.radius {
                continue;
            }

            self.add_surface_to_shadow(world, handle, surface);
        }

        let displacements = world.displacements_in_leaf(leaf).to_vec();
        for surface in displacements {
            if !self.mark_displacement_visited(surface) {
                continue;
            }
            let flags = world.flags(surface);
            if flags.intersects(SurfaceFlags::NOSHADOWS | SurfaceFlags::DYNAMIC_SHADOWS_DISABLED) {
                continue;
            }
            if !world.displacement_bounds(surface).intersects_sphere(&sphere) {
                continue;
            }
            self.add_surface_to_shadow(world, handle, surface);
        }
    }

    /// Re-associate a flashlight with every surface its frustum reaches in `leaves`
    pub(crate) fn apply_flashlight_to_leaves(&mut self, world: &mut dyn ShadowWorld, handle: ShadowHandle, leaves: &[LeafId]) {
        let Some(flashlight) = self.projectors.get(handle).and_then(|p| p.flashlight()) else {
            return;
        };
        let frustum = flashlight.frustum;
        let light_origin = flashlight.state.light_origin;
        let Some(sphere) = self.projectors.get(handle).map(|p| p.sphere) else {
            return;
        };

        self.next_vis_frame();
        for &leaf in leaves {
            if frustum.cull_box(&world.leaf_bounds(leaf)) {
                continue;
            }
            self.apply_flashlight_to_leaf(world, handle, leaf, &sphere, &light_origin);
            self.apply_flashlight_to_displacements(world, handle, leaf, &frustum);
        }
    }

    fn apply_flashlight_to_leaf(
        &mut self,
        world: &mut dyn ShadowWorld,
        handle: ShadowHandle,
        leaf: LeafId,
        sphere: &BoundingSphere,
        light_origin: &Vec3,
    ) {
        let cull_depth = self.config.flashlight_cull_depth;
        let surfaces = world.surfaces_in_leaf(leaf).to_vec();
        for surface in surfaces {
            if !self.mark_surface_visited(surface) {
                continue;
            }
            let flags = world.flags(surface);
            if flags.contains(SurfaceFlags::NODRAW) {
                continue;
            }
            let plane = world.plane(surface);
            if plane.distance_to_point(&sphere.center).abs() > sphere.radius {
                continue;
            }

            self.add_surface_to_shadow(world, handle, surface);

            if cull_depth && world.vertex_count(surface) > 0 {
                let look = (world.vertex(surface, 0) - light_origin).normalize();
                let dot = plane.normal.dot(&look);
                let culled = if flags.contains(SurfaceFlags::NOCULL) {
                    dot.abs() < BACKFACE_EPSILON
                } else {
                    dot < BACKFACE_EPSILON
                };
                if culled {
                    continue;
                }
            }

            let Some(sort_id) = world.material_sort_id(surface) else {
                continue;
            };
            if let Some(flashlight) = self.projectors.get_mut(handle).and_then(|p| p.flashlight_mut()) {
                flashlight.occluder_buckets.add(sort_id as usize, surface);
            }
        }
    }

    fn apply_flashlight_to_displacements(
        &mut self,
        world: &mut dyn ShadowWorld,
        handle: ShadowHandle,
        leaf: LeafId,
        frustum: &Frustum,
    ) {
        let displacements = world.displacements_in_leaf(leaf).to_vec();
        for surface in displacements {
            if !self.mark_displacement_visited(surface) {
                continue;
            }
            if frustum.cull_box(&world.displacement_bounds(surface)) {
                continue;
            }
            self.add_surface_to_shadow(world, handle, surface);
        }
    }

    /// Link a surface to a projector. Shadows skip translucent, alpha-tested
    /// and no-shadow receivers; flashlights light everything.
    pub(crate) fn add_surface_to_shadow(&mut self, world: &mut dyn ShadowWorld, handle: ShadowHandle, surface: SurfaceId) {
        let Some(projector) = self.projectors.get_mut(handle) else {
            return;
        };
        if !projector.is_flashlight()
            && world
                .flags(surface)
                .intersects(SurfaceFlags::TRANS | SurfaceFlags::ALPHATEST | SurfaceFlags::NOSHADOWS)
        {
            return;
        }

        let decal = match self.decals.insert(&mut projector.decal_head, handle, surface) {
            Ok(decal) => decal,
            Err(err) => {
                warn_n_times!(10, "Too many shadow decals ({err}); shadow on surface {} dropped", surface.0);
                return;
            }
        };

        if world.is_displacement(surface) {
            let disp_shadow = world.add_shadow_decal(surface, handle);
            if let Some(decal) = self.decals.get_mut(decal) {
                decal.disp_shadow = disp_shadow;
            }
        }
    }

    /// Associate a shadow with the surfaces of a brush model. The backface
    /// test runs in model space and skips `NOCULL` surfaces. Surfaces that
    /// already carry this shadow are left alone.
    pub fn add_shadow_to_brush_model(
        &mut self,
        world: &mut dyn ShadowWorld,
        handle: ShadowHandle,
        model: &BrushModel,
        model_to_world: &Mat4,
    ) {
        let Some(projector) = self.projectors.get(handle) else {
            debug_assert!(false, "invalid shadow {handle:?}");
            return;
        };
        if !projector.enabled || !self.config.shadows_enabled {
            return;
        }
        let is_flashlight = projector.is_flashlight();
        let world_to_model = model_to_world.try_inverse().unwrap_or_else(Mat4::identity);
        let model_dir = transform_direction(&world_to_model, &projector.projection_dir);

        for surface in model.surfaces() {
            let flags = world.flags(surface);
            if flags.contains(SurfaceFlags::NODRAW) {
                continue;
            }
            if !is_flashlight
                && !flags.contains(SurfaceFlags::NOCULL)
                && world.plane(surface).normal.dot(&model_dir) > 0.0
            {
                continue;
            }
            if self.surface_has_shadow(surface, handle) {
                continue;
            }
            self.add_surface_to_shadow(world, handle, surface);
        }
    }

    fn surface_has_shadow(&self, surface: SurfaceId, handle: ShadowHandle) -> bool {
        self.decals
            .on_surface(surface)
            .any(|decal| self.decals.get(decal).is_some_and(|decal| decal.shadow == handle))
    }

    /// Drop every decal on a brush model's surfaces
    pub fn remove_all_shadows_from_brush_model(&mut self, world: &mut dyn ShadowWorld, model: &BrushModel) {
        for surface in model.surfaces() {
            loop {
                let Some(decal) = self.decals.on_surface(surface).next() else {
                    break;
                };
                self.remove_decal(world, decal);
                if self.decals.get(decal).is_some() {
                    break;
                }
            }
        }
    }

    /// Build a flashlight's frustum and bounding sphere from its transform
    pub(crate) fn set_flashlight_volume(&mut self, handle: ShadowHandle, world_to_shadow: &Mat4) {
        let Some(projector) = self.projectors.get_mut(handle) else {
            return;
        };
        let shadow_to_world = world_to_shadow.try_inverse().unwrap_or_else(Mat4::identity);
        projector.info.world_to_shadow = *world_to_shadow;
        projector.sphere = BoundingSphere::from_projection_inverse(&shadow_to_world);
        if let Some(flashlight) = projector.flashlight_mut() {
            flashlight.shadow_to_world = shadow_to_world;
            flashlight.frustum = Frustum::from_volume_to_world(&shadow_to_world);
        }
    }
}
