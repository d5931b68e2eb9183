//! Flashlight projectors
//!
//! Flashlights are additive projected lights. They associate through their
//! frustum instead of a swept ray, collect visible surfaces into per-material
//! buckets and draw those surfaces again from the static world buffers with
//! the flashlight bound. An optional mask pass restricts the lighting to the
//! flashlight's on-screen footprint with a scissor rectangle and a stencil
//! bit.

use super::material_buckets::MaterialBuckets;
use super::{ShadowHandle, ShadowManager};
use crate::foundation::logging::trace;
use crate::foundation::math::{
    transform_position_projective, unit_cube_corners, Frustum, Mat4, Plane, Vec3, UNIT_CUBE_FACES,
};
use crate::render::{FlashlightState, ScissorRect, ShadowRasterizer, StencilState, TextureId, ViewSetup};
use crate::world::{LeafId, ModelInstanceId, ShadowWorld, SurfaceId};

/// Pull-in applied to the view near and far planes before masking
pub const MASK_PLANE_EPSILON: f32 = 0.4;

/// Mask vertices closer than this on every axis are merged
pub const MASK_FUSE_EPSILON: f32 = 0.1;

/// Stencil bit reserved for flashlight masks
pub const FLASHLIGHT_STENCIL_BIT: u32 = 1 << 7;

/// Per-frame progress of one flashlight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlashlightPhase {
    /// Not projected since creation or since its last association was dropped
    #[default]
    Idle,
    /// Associated with the surfaces its frustum reaches
    Projected,
    /// Scissor rectangle and stencil polygons computed for the current view
    StencilComputed,
    /// Lit surfaces drawn this frame
    Rendered,
}

/// One convex polygon bounding the flashlight volume inside the view
#[derive(Debug, Clone, PartialEq)]
pub struct MaskPolygon {
    /// World-space vertices
    pub vertices: Vec<Vec3>,
    /// Faces the viewer; only these go to the stencil buffer
    pub front_facing: bool,
}

/// Screen-space footprint of a flashlight
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlashlightMasks {
    /// Flashlight faces clipped to the view, plus the view near plane
    /// clipped to the flashlight
    pub polygons: Vec<MaskPolygon>,
    /// Proper sub-rectangle of the back buffer, if any
    pub scissor: Option<ScissorRect>,
}

/// State only flashlight projectors carry
#[derive(Debug, Clone, Default)]
pub struct FlashlightData {
    pub(crate) state: FlashlightState,
    pub(crate) frustum: Frustum,
    pub(crate) shadow_to_world: Mat4,
    pub(crate) material_buckets: MaterialBuckets<SurfaceId>,
    pub(crate) occluder_buckets: MaterialBuckets<SurfaceId>,
    pub(crate) renderables: Vec<ModelInstanceId>,
    pub(crate) depth_texture: Option<TextureId>,
    pub(crate) masks: FlashlightMasks,
    pub(crate) phase: FlashlightPhase,
}

impl FlashlightData {
    /// Light parameters
    pub const fn state(&self) -> &FlashlightState {
        &self.state
    }

    /// Current phase
    pub const fn phase(&self) -> FlashlightPhase {
        self.phase
    }

    pub(crate) fn set_bucket_count(&mut self, count: usize) {
        self.material_buckets.set_bucket_count(count);
        self.occluder_buckets.set_bucket_count(count);
    }

    pub(crate) fn flush_buckets(&mut self) {
        self.material_buckets.flush();
        self.occluder_buckets.flush();
        self.phase = FlashlightPhase::Idle;
    }
}

/// Sutherland-Hodgman clip keeping the side the plane normal points to
fn clip_polygon_to_plane(points: &[Vec3], plane: &Plane) -> Vec<Vec3> {
    let mut out = Vec::with_capacity(points.len() + 1);
    let Some(mut prev) = points.last() else {
        return out;
    };
    let mut prev_dist = plane.distance_to_point(prev);
    for point in points {
        let dist = plane.distance_to_point(point);
        if (dist >= 0.0) != (prev_dist >= 0.0) {
            let t = prev_dist / (prev_dist - dist);
            out.push(prev + (point - prev) * t);
        }
        if dist >= 0.0 {
            out.push(*point);
        }
        prev = point;
        prev_dist = dist;
    }
    out
}

fn sufficiently_close(a: &Vec3, b: &Vec3, epsilon: f32) -> bool {
    (a - b).iter().all(|d| d.abs() <= epsilon)
}

/// Snap vertices of later polygons onto nearby vertices of earlier ones
fn fuse_vertices(polygons: &mut [MaskPolygon], epsilon: f32) {
    for i in 0..polygons.len() {
        let (head, tail) = polygons.split_at_mut(i + 1);
        for anchor in &head[i].vertices {
            for vertex in tail.iter_mut().flat_map(|p| p.vertices.iter_mut()) {
                if sufficiently_close(anchor, vertex, epsilon) {
                    *vertex = *anchor;
                }
            }
        }
    }
}

/// View near and far planes pulled in by `epsilon`, normals facing inside
fn view_depth_planes(view: &ViewSetup, epsilon: f32) -> (Plane, Plane) {
    let near_point = view.origin + view.forward * (view.z_near + epsilon);
    let far_point = view.origin + view.forward * (view.z_far - epsilon);
    (
        Plane::from_point_normal(&near_point, view.forward),
        Plane::from_point_normal(&far_point, -view.forward),
    )
}

/// The view near plane as a world-space quad
fn view_near_quad(view: &ViewSetup, epsilon: f32) -> [Vec3; 4] {
    let depth = view.z_near + epsilon;
    let tan_half_x = (view.fov_degrees.to_radians() * 0.5).tan();
    let tan_half_y = tan_half_x / view.aspect_ratio.max(f32::EPSILON);
    let half_width = view.right * (tan_half_x * depth);
    let half_height = view.up * (tan_half_y * depth);
    let center = view.origin + view.forward * depth;
    [
        center - half_width - half_height,
        center - half_width + half_height,
        center + half_width + half_height,
        center + half_width - half_height,
    ]
}

fn is_front_facing(outward: &Vec3, vertex: &Vec3, eye: &Vec3) -> bool {
    outward.dot(&(eye - vertex)) > 0.0
}

/// Polygons bounding the intersection of the flashlight and view volumes
fn mask_polygons(shadow_to_world: &Mat4, frustum: &Frustum, view: &ViewSetup) -> Vec<MaskPolygon> {
    let corners = unit_cube_corners().map(|c| transform_position_projective(shadow_to_world, &c));
    let (near, far) = view_depth_planes(view, MASK_PLANE_EPSILON);

    let mut polygons = Vec::with_capacity(7);
    for (face, plane) in UNIT_CUBE_FACES.iter().zip(frustum.planes.iter()) {
        let quad = face.map(|i| corners[i]);
        let clipped = clip_polygon_to_plane(&quad, &near);
        if clipped.len() < 3 {
            continue;
        }
        let clipped = clip_polygon_to_plane(&clipped, &far);
        if clipped.len() < 3 {
            continue;
        }
        let front_facing = is_front_facing(&-plane.normal, &clipped[0], &view.origin);
        polygons.push(MaskPolygon { vertices: clipped, front_facing });
    }

    let mut near_quad = view_near_quad(view, MASK_PLANE_EPSILON).to_vec();
    for plane in &frustum.planes {
        if near_quad.len() < 3 {
            break;
        }
        near_quad = clip_polygon_to_plane(&near_quad, plane);
    }
    if near_quad.len() >= 3 {
        let front_facing = is_front_facing(&-view.forward, &near_quad[0], &view.origin);
        polygons.push(MaskPolygon { vertices: near_quad, front_facing });
    }

    fuse_vertices(&mut polygons, MASK_FUSE_EPSILON);
    polygons
}

/// Pixel rectangle around the polygons, `None` unless it is a proper
/// non-empty sub-rectangle of the back buffer
fn screen_rect(polygons: &[MaskPolygon], view: &ViewSetup) -> Option<ScissorRect> {
    let mut points = polygons.iter().flat_map(|p| p.vertices.iter()).peekable();
    points.peek()?;

    let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
    let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
    for point in points {
        let ndc = transform_position_projective(&view.view_projection, point);
        min_x = min_x.min(ndc.x);
        max_x = max_x.max(ndc.x);
        // Screen y grows downward
        min_y = min_y.min(-ndc.y);
        max_y = max_y.max(-ndc.y);
    }

    let width = view.width as i32;
    let height = view.height as i32;
    let to_pixels = |ndc: f32, size: i32| (ndc * 0.5 + 0.5) * size as f32;
    let left = ((to_pixels(min_x, width) - 1.0) as i32).clamp(0, width);
    let top = ((to_pixels(min_y, height) - 1.0) as i32).clamp(0, height);
    let right = ((to_pixels(max_x, width) + 1.0) as i32).clamp(0, width);
    let bottom = ((to_pixels(max_y, height) + 1.0) as i32).clamp(0, height);

    let within_bounds = left > 0 || top > 0 || right < width || bottom < height;
    let has_area = right > left && bottom > top;
    (within_bounds && has_area).then_some(ScissorRect { left, top, right, bottom })
}

fn append_fan_indices(indices: &mut Vec<u32>, first_vertex: u32, vertex_count: usize) {
    for i in 1..vertex_count.saturating_sub(1) as u32 {
        indices.extend_from_slice(&[first_vertex, first_vertex + i, first_vertex + i + 1]);
    }
}

impl ShadowManager {
    fn flashlight_data(&self, handle: ShadowHandle) -> Option<&FlashlightData> {
        let flashlight = self.projectors.get(handle).and_then(super::Projector::flashlight);
        debug_assert!(flashlight.is_some(), "{handle:?} is not a flashlight");
        flashlight
    }

    fn flashlight_data_mut(&mut self, handle: ShadowHandle) -> Option<&mut FlashlightData> {
        let flashlight = self.projectors.get_mut(handle).and_then(super::Projector::flashlight_mut);
        debug_assert!(flashlight.is_some(), "{handle:?} is not a flashlight");
        flashlight
    }

    /// Re-associate a flashlight with the surfaces its frustum reaches.
    ///
    /// `world_to_shadow` maps the flashlight volume onto the unit cube.
    pub fn project_flashlight(
        &mut self,
        world: &mut dyn ShadowWorld,
        handle: ShadowHandle,
        world_to_shadow: &Mat4,
        leaves: &[LeafId],
    ) {
        if self.flashlight_data(handle).is_none() {
            return;
        }
        self.remove_all_surfaces_from_shadow(world, handle);
        self.remove_all_models_from_shadow(handle);
        if let Some(flashlight) = self.flashlight_data_mut(handle) {
            flashlight.renderables.clear();
        }

        if !self.projectors.get(handle).is_some_and(|p| p.enabled) {
            return;
        }

        self.set_flashlight_volume(handle, world_to_shadow);
        self.apply_flashlight_to_leaves(world, handle, leaves);
        if let Some(flashlight) = self.flashlight_data_mut(handle) {
            flashlight.phase = FlashlightPhase::Projected;
        }
        trace!("Flashlight {handle:?} associated with {} surfaces", self.shadow_decals(handle).count());
    }

    /// Replace the light parameters handed to the rasterizer
    pub fn update_flashlight_state(&mut self, handle: ShadowHandle, state: FlashlightState) {
        if let Some(flashlight) = self.flashlight_data_mut(handle) {
            flashlight.state = state;
        }
    }

    /// Light parameters of a flashlight
    pub fn flashlight_state(&self, handle: ShadowHandle) -> Option<&FlashlightState> {
        self.flashlight_data(handle).map(|f| &f.state)
    }

    /// World-space frustum from the last projection
    pub fn flashlight_frustum(&self, handle: ShadowHandle) -> Option<&Frustum> {
        self.flashlight_data(handle).map(|f| &f.frustum)
    }

    /// Current phase of a flashlight
    pub fn flashlight_phase(&self, handle: ShadowHandle) -> Option<FlashlightPhase> {
        self.flashlight_data(handle).map(|f| f.phase)
    }

    /// Depth map used for shadowed flashlights; also enables the stencil mask
    pub fn set_flashlight_depth_texture(&mut self, handle: ShadowHandle, texture: Option<TextureId>) {
        if let Some(flashlight) = self.flashlight_data_mut(handle) {
            flashlight.depth_texture = texture;
        }
    }

    /// Record a model instance lit by a flashlight
    pub fn add_flashlight_renderable(&mut self, handle: ShadowHandle, model: ModelInstanceId) {
        if let Some(flashlight) = self.flashlight_data_mut(handle) {
            flashlight.renderables.push(model);
        }
    }

    /// Model instances lit by a flashlight since its last projection
    pub fn flashlight_renderables(&self, handle: ShadowHandle) -> &[ModelInstanceId] {
        self.flashlight_data(handle).map_or(&[], |f| f.renderables.as_slice())
    }

    /// Surfaces facing the flashlight, grouped by world material sort id
    pub fn flashlight_occluders(&self, handle: ShadowHandle) -> Option<&MaterialBuckets<SurfaceId>> {
        self.flashlight_data(handle).map(|f| &f.occluder_buckets)
    }

    /// Visible lit surfaces queued this frame, grouped by world material sort id
    pub fn flashlight_surfaces(&self, handle: ShadowHandle) -> Option<&MaterialBuckets<SurfaceId>> {
        self.flashlight_data(handle).map(|f| &f.material_buckets)
    }

    /// Masks from the last [`Self::compute_flashlight_masks`]
    pub fn flashlight_masks(&self, handle: ShadowHandle) -> Option<&FlashlightMasks> {
        self.flashlight_data(handle).map(|f| &f.masks)
    }

    /// Number of world material sort ids; sizes every flashlight's buckets
    pub fn set_num_world_material_buckets(&mut self, count: usize) {
        self.world_material_buckets = count;
        for projector in self.projectors.values_mut() {
            if let Some(flashlight) = projector.flashlight_mut() {
                flashlight.set_bucket_count(count);
            }
        }
    }

    /// Compute the screen footprint of a flashlight for `view`.
    ///
    /// Returns `None` when neither masking option is enabled.
    pub fn compute_flashlight_masks(&mut self, handle: ShadowHandle, view: &ViewSetup) -> Option<&FlashlightMasks> {
        if !(self.config.flashlight_clip || self.config.flashlight_scissor) {
            return None;
        }
        let use_scissor = self.config.flashlight_scissor;
        let flashlight = self.flashlight_data_mut(handle)?;

        let polygons = mask_polygons(&flashlight.shadow_to_world, &flashlight.frustum, view);
        let scissor = if use_scissor { screen_rect(&polygons, view) } else { None };
        flashlight.masks = FlashlightMasks { polygons, scissor };
        flashlight.phase = FlashlightPhase::StencilComputed;
        Some(&flashlight.masks)
    }

    /// Compute masks for one flashlight and write its stencil bit.
    ///
    /// The stencil is only written for shadowed flashlights (those with a
    /// depth texture) when the clip option is on.
    pub fn set_stencil_and_scissor<R: ShadowRasterizer>(&mut self, handle: ShadowHandle, view: &ViewSetup, ctx: &mut R) {
        let use_stencil = self.config.flashlight_clip;
        if self.compute_flashlight_masks(handle, view).is_none() {
            return;
        }
        let Some(flashlight) = self.flashlight_data(handle) else {
            return;
        };
        if !use_stencil || flashlight.depth_texture.is_none() {
            return;
        }

        ctx.set_stencil_state(StencilState::WriteMask { reference: FLASHLIGHT_STENCIL_BIT });
        for polygon in flashlight.masks.polygons.iter().filter(|p| p.front_facing) {
            ctx.draw_stencil_polygon(&polygon.vertices);
        }
        ctx.set_stencil_state(StencilState::Disabled);
    }

    /// [`Self::set_stencil_and_scissor`] for every flashlight
    pub fn set_flashlight_stencil_masks<R: ShadowRasterizer>(&mut self, view: &ViewSetup, ctx: &mut R) {
        if !(self.config.flashlight_clip || self.config.flashlight_scissor) {
            return;
        }
        let flashlights: Vec<ShadowHandle> =
            self.projectors.iter().filter(|(_, p)| p.is_flashlight()).map(|(h, _)| h).collect();
        for handle in flashlights {
            self.set_stencil_and_scissor(handle, view, ctx);
        }
    }

    /// Restrict subsequent draws to a flashlight's footprint
    pub fn enable_stencil_and_scissor_masking<R: ShadowRasterizer>(
        &self,
        handle: ShadowHandle,
        ctx: &mut R,
        do_masking: bool,
    ) {
        let (clip, scissor) = (self.config.flashlight_clip, self.config.flashlight_scissor);
        if !(clip || scissor) || !do_masking {
            return;
        }
        let Some(flashlight) = self.flashlight_data(handle) else {
            return;
        };
        if clip && flashlight.depth_texture.is_some() {
            ctx.set_stencil_state(StencilState::TestEqual { reference: FLASHLIGHT_STENCIL_BIT });
        }
        if scissor {
            if let Some(rect) = flashlight.masks.scissor {
                ctx.set_scissor_rect(Some(rect));
            }
        }
    }

    /// Undo [`Self::enable_stencil_and_scissor_masking`]
    pub fn disable_stencil_and_scissor_masking<R: ShadowRasterizer>(&self, ctx: &mut R) {
        if self.config.flashlight_clip {
            ctx.set_stencil_state(StencilState::Disabled);
        }
        if self.config.flashlight_scissor {
            ctx.set_scissor_rect(None);
        }
    }

    fn bind_flashlight<R: ShadowRasterizer>(&self, handle: ShadowHandle, ctx: &mut R, do_masking: bool) -> bool {
        let Some(projector) = self.projectors.get(handle) else {
            return false;
        };
        let Some(flashlight) = projector.flashlight() else {
            return false;
        };
        ctx.set_flashlight_state(&flashlight.state, &projector.info.world_to_shadow, flashlight.depth_texture);
        self.enable_stencil_and_scissor_masking(handle, ctx, do_masking);
        true
    }

    /// Draw every surface queued for each flashlight, one world material at
    /// a time. Displacements are drawn individually after the indexed batch.
    pub fn render_flashlights<R: ShadowRasterizer>(&mut self, world: &dyn ShadowWorld, ctx: &mut R, do_masking: bool) {
        if !self.config.flashlight_render {
            return;
        }
        let flashlights: Vec<ShadowHandle> = self
            .projectors
            .iter()
            .filter(|(_, p)| p.flashlight().is_some_and(|f| !f.material_buckets.is_empty()))
            .map(|(h, _)| h)
            .collect();
        if flashlights.is_empty() {
            return;
        }

        ctx.set_flashlight_mode(true);
        let mut indices = Vec::new();
        for &handle in &flashlights {
            if !self.bind_flashlight(handle, ctx, do_masking) {
                continue;
            }
            let Some(buckets) = self.flashlight_data(handle).map(|f| &f.material_buckets) else {
                continue;
            };

            for &sort_id in buckets.used_sort_ids() {
                ctx.bind_world_material(sort_id as u32);

                indices.clear();
                for &surface in buckets.elements(sort_id) {
                    if !world.is_displacement(surface) {
                        append_fan_indices(&mut indices, world.world_vertex_offset(surface), world.vertex_count(surface));
                    }
                }
                if !indices.is_empty() {
                    ctx.draw_world_indices(&indices);
                }

                for &surface in buckets.elements(sort_id) {
                    if world.is_displacement(surface) {
                        ctx.draw_displacement(surface);
                    }
                }
            }
        }

        for &handle in &flashlights {
            if let Some(flashlight) = self.flashlight_data_mut(handle) {
                flashlight.phase = FlashlightPhase::Rendered;
            }
        }
        ctx.set_flashlight_mode(false);
        self.disable_stencil_and_scissor_masking(ctx);
    }

    /// Run an external draw once per flashlight with its render state and
    /// masking bound, for geometry drawn outside the world pass
    pub fn for_each_flashlight_pass<R, F>(&self, ctx: &mut R, do_masking: bool, mut draw: F)
    where
        R: ShadowRasterizer,
        F: FnMut(ShadowHandle, &mut R),
    {
        if !self.config.flashlight_render {
            return;
        }
        let flashlights: Vec<ShadowHandle> =
            self.projectors.iter().filter(|(_, p)| p.is_flashlight()).map(|(h, _)| h).collect();
        if flashlights.is_empty() {
            return;
        }

        ctx.set_flashlight_mode(true);
        for handle in flashlights {
            if self.bind_flashlight(handle, ctx, do_masking) {
                draw(handle, &mut *ctx);
            }
        }
        ctx.set_flashlight_mode(false);
        self.disable_stencil_and_scissor_masking(ctx);
    }
}
