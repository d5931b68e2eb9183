//! Projector registry
//!
//! Creation, destruction and attribute updates for shadow and flashlight
//! projectors. Attribute setters never re-run association; callers project
//! again after any geometry-relevant change.

use bitflags::bitflags;

use super::clip::{project_and_clip, ClipBuffers, ClipParams, ShadowClipper, ShadowVertex, MAX_CLIP_PLANES};
use super::falloff::ShadowDecalRenderInfo;
use super::flashlight::FlashlightData;
use super::{DecalHandle, ShadowError, ShadowHandle, ShadowManager};
use crate::foundation::logging::debug;
use crate::foundation::math::{BoundingSphere, Mat4, Plane, SweptBox, Vec2, Vec3};
use crate::render::{BindProxyId, MaterialHandle, MaterialId};
use crate::world::ShadowWorld;
use crate::warn_n_times;

bitflags! {
    /// Options chosen when a projector is created
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShadowCreateFlags: u32 {
        /// Keep clipped geometry across frames
        const CACHE_VERTS = 1 << 0;
        /// Projective flashlight instead of a darkening shadow
        const FLASHLIGHT = 1 << 1;
    }
}

/// What a projector draws
#[derive(Debug, Clone)]
pub enum ProjectorKind {
    /// Darkening decal drawn through the render queue
    Shadow,
    /// Additive projected light drawn through material buckets
    Flashlight(Box<FlashlightData>),
}

/// Render-time projector parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowInfo {
    /// World space to shadow space
    pub world_to_shadow: Mat4,
    /// Depth at which falloff starts
    pub falloff_offset: f32,
    /// Projection depth
    pub max_dist: f32,
    /// Darkness gained over the falloff range
    pub falloff_amount: f32,
    /// Texture coordinate origin
    pub tex_origin: Vec2,
    /// Texture coordinate scale
    pub tex_size: Vec2,
    /// Darkness before the falloff offset; 255 hides the shadow
    pub falloff_bias: u8,
}

impl Default for ShadowInfo {
    fn default() -> Self {
        Self {
            world_to_shadow: Mat4::identity(),
            falloff_offset: 0.0,
            max_dist: 0.0,
            falloff_amount: 0.0,
            tex_origin: Vec2::zeros(),
            tex_size: Vec2::new(1.0, 1.0),
            falloff_bias: 0,
        }
    }
}

/// One shadow or flashlight projector
#[derive(Debug, Clone)]
pub struct Projector {
    pub(crate) info: ShadowInfo,
    pub(crate) kind: ProjectorKind,
    pub(crate) flags: ShadowCreateFlags,
    pub(crate) enabled: bool,
    pub(crate) material: Option<MaterialHandle>,
    pub(crate) model_material: Option<MaterialHandle>,
    pub(crate) bind_proxy: Option<BindProxyId>,
    pub(crate) sort_order: Option<usize>,
    pub(crate) decal_head: Option<DecalHandle>,
    pub(crate) projection_dir: Vec3,
    pub(crate) ray: SweptBox,
    pub(crate) sphere: BoundingSphere,
    pub(crate) clip_planes: Vec<Plane>,
}

impl Projector {
    fn new(flags: ShadowCreateFlags) -> Self {
        let kind = if flags.contains(ShadowCreateFlags::FLASHLIGHT) {
            ProjectorKind::Flashlight(Box::default())
        } else {
            ProjectorKind::Shadow
        };
        Self {
            info: ShadowInfo::default(),
            kind,
            flags,
            enabled: true,
            material: None,
            model_material: None,
            bind_proxy: None,
            sort_order: None,
            decal_head: None,
            projection_dir: Vec3::z(),
            ray: SweptBox::new(Vec3::zeros(), Vec3::zeros(), Vec3::zeros()),
            sphere: BoundingSphere::new(Vec3::zeros(), 0.0),
            clip_planes: Vec::with_capacity(MAX_CLIP_PLANES),
        }
    }

    /// Render-time parameters
    pub const fn info(&self) -> &ShadowInfo {
        &self.info
    }

    /// Projector variant
    pub const fn kind(&self) -> &ProjectorKind {
        &self.kind
    }

    /// True for flashlights
    pub const fn is_flashlight(&self) -> bool {
        matches!(self.kind, ProjectorKind::Flashlight(_))
    }

    /// True when clipped geometry is kept across frames
    pub const fn caches_vertices(&self) -> bool {
        self.flags.contains(ShadowCreateFlags::CACHE_VERTS)
    }

    /// Is the projector enabled
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Shadow material
    pub const fn material(&self) -> Option<&MaterialHandle> {
        self.material.as_ref()
    }

    /// Material used when the projector lands on studio models
    pub const fn model_material(&self) -> Option<&MaterialHandle> {
        self.model_material.as_ref()
    }

    /// Proxy bound with the material
    pub const fn bind_proxy(&self) -> Option<BindProxyId> {
        self.bind_proxy
    }

    /// Sort-order id of the shadow material
    pub const fn sort_order(&self) -> Option<usize> {
        self.sort_order
    }

    /// Extra clip planes in world space
    pub fn clip_planes(&self) -> &[Plane] {
        &self.clip_planes
    }

    /// Coarse bounding sphere from the last projection
    pub const fn sphere(&self) -> &BoundingSphere {
        &self.sphere
    }

    /// Swept box from the last projection
    pub const fn ray(&self) -> &SweptBox {
        &self.ray
    }

    /// Flashlight state for flashlight projectors
    pub fn flashlight(&self) -> Option<&FlashlightData> {
        match &self.kind {
            ProjectorKind::Flashlight(data) => Some(data),
            ProjectorKind::Shadow => None,
        }
    }

    pub(crate) fn flashlight_mut(&mut self) -> Option<&mut FlashlightData> {
        match &mut self.kind {
            ProjectorKind::Flashlight(data) => Some(data),
            ProjectorKind::Shadow => None,
        }
    }

    /// Falloff and texture parameters for vertex shading
    pub fn render_info(&self) -> ShadowDecalRenderInfo {
        ShadowDecalRenderInfo::new(
            self.info.tex_origin,
            self.info.tex_size,
            self.info.max_dist,
            self.info.falloff_offset,
            self.info.falloff_amount,
            self.info.falloff_bias,
        )
    }

    /// Clip parameters for surfaces in world space, or in a model's space
    /// when `model_to_world` is given
    pub(crate) fn clip_setup(&self, model_to_world: Option<&Mat4>) -> (Mat4, Vec<Plane>) {
        match model_to_world {
            None => (self.info.world_to_shadow, self.clip_planes.clone()),
            Some(model_to_world) => {
                let world_to_model = model_to_world.try_inverse().unwrap_or_else(Mat4::identity);
                let planes = self.clip_planes.iter().map(|p| p.transformed(&world_to_model)).collect();
                (self.info.world_to_shadow * model_to_world, planes)
            }
        }
    }
}

fn material_key(material: Option<&MaterialHandle>) -> Option<MaterialId> {
    material.map(|m| m.id)
}

impl ShadowManager {
    /// Create a projector.
    ///
    /// Fails without side effects when the projector pool or the sort-order
    /// slots are exhausted.
    pub fn create_shadow(
        &mut self,
        material: Option<MaterialHandle>,
        model_material: Option<MaterialHandle>,
        bind_proxy: Option<BindProxyId>,
        flags: ShadowCreateFlags,
    ) -> Result<ShadowHandle, ShadowError> {
        if self.projectors.len() >= self.config.max_projectors {
            warn_n_times!(10, "Too many shadows created ({}), new shadow ignored", self.config.max_projectors);
            return Err(ShadowError::ProjectorPoolExhausted { capacity: self.config.max_projectors });
        }

        let sort_order = self.sort_orders.acquire(material_key(material.as_ref())).map_err(|_| {
            warn_n_times!(10, "Out of shadow material sort orders, new shadow ignored");
            ShadowError::SortOrderExhausted
        })?;
        self.render_queue.ensure_slot(sort_order);

        let mut projector = Projector::new(flags);
        projector.material = material;
        projector.model_material = model_material;
        projector.bind_proxy = bind_proxy;
        projector.sort_order = Some(sort_order);
        if let Some(flashlight) = projector.flashlight_mut() {
            flashlight.set_bucket_count(self.world_material_buckets);
        }

        let handle = self.projectors.insert(projector);
        debug!("Created shadow {handle:?} (sort order {sort_order}, flags {flags:?})");
        Ok(handle)
    }

    /// Destroy a projector with every association and cached vertex it owns
    pub fn destroy_shadow(&mut self, world: &mut dyn ShadowWorld, handle: ShadowHandle) {
        if !self.projectors.contains_key(handle) {
            debug_assert!(false, "destroying invalid shadow {handle:?}");
            return;
        }
        self.release_sort_order(handle);
        self.remove_all_surfaces_from_shadow(world, handle);
        self.remove_all_models_from_shadow(handle);
        self.projectors.remove(handle);
    }

    /// Enable or disable a projector. Disabling drops every association;
    /// enabling only clears the flag.
    pub fn enable_shadow(&mut self, world: &mut dyn ShadowWorld, handle: ShadowHandle, enable: bool) {
        if !self.projectors.contains_key(handle) {
            debug_assert!(false, "enabling invalid shadow {handle:?}");
            return;
        }
        if !enable {
            self.remove_all_surfaces_from_shadow(world, handle);
            self.remove_all_models_from_shadow(handle);
        }
        if let Some(projector) = self.projectors.get_mut(handle) {
            projector.enabled = enable;
        }
    }

    /// Change materials; the sort order only changes when something did
    pub fn set_shadow_material(
        &mut self,
        handle: ShadowHandle,
        material: Option<MaterialHandle>,
        model_material: Option<MaterialHandle>,
        bind_proxy: Option<BindProxyId>,
    ) -> Result<(), ShadowError> {
        let Some(projector) = self.projectors.get(handle) else {
            debug_assert!(false, "setting material on invalid shadow {handle:?}");
            return Err(ShadowError::InvalidHandle);
        };
        let unchanged = material_key(projector.material.as_ref()) == material_key(material.as_ref())
            && material_key(projector.model_material.as_ref()) == material_key(model_material.as_ref())
            && projector.bind_proxy == bind_proxy;
        if unchanged {
            return Ok(());
        }

        let sort_order = self
            .sort_orders
            .acquire(material_key(material.as_ref()))
            .map_err(|_| ShadowError::SortOrderExhausted)?;
        self.release_sort_order(handle);
        self.render_queue.ensure_slot(sort_order);

        if let Some(projector) = self.projectors.get_mut(handle) {
            projector.material = material;
            projector.model_material = model_material;
            projector.bind_proxy = bind_proxy;
            projector.sort_order = Some(sort_order);
        }
        Ok(())
    }

    fn release_sort_order(&mut self, handle: ShadowHandle) {
        if let Some(sort_order) = self.projectors.get_mut(handle).and_then(|p| p.sort_order.take()) {
            self.sort_orders.release(sort_order);
        }
    }

    /// Sub-rectangle of the shadow texture used by this projector
    pub fn set_tex_coord_range(&mut self, handle: ShadowHandle, origin: Vec2, size: Vec2) {
        if let Some(projector) = self.projector_mut(handle) {
            projector.info.tex_origin = origin;
            projector.info.tex_size = size;
        }
    }

    /// Remove every extra clip plane
    pub fn clear_extra_clip_planes(&mut self, handle: ShadowHandle) {
        if let Some(projector) = self.projector_mut(handle) {
            projector.clip_planes.clear();
        }
    }

    /// Add a world-space plane; geometry on its front side is clipped away
    pub fn add_extra_clip_plane(&mut self, handle: ShadowHandle, plane: Plane) -> Result<(), ShadowError> {
        let Some(projector) = self.projector_mut(handle) else {
            return Err(ShadowError::InvalidHandle);
        };
        if projector.clip_planes.len() >= MAX_CLIP_PLANES {
            return Err(ShadowError::ClipPlaneLimit);
        }
        projector.clip_planes.push(plane);
        Ok(())
    }

    /// Darkness at the falloff offset; 255 skips the shadow at render time
    pub fn set_falloff_bias(&mut self, handle: ShadowHandle, bias: u8) {
        if let Some(projector) = self.projector_mut(handle) {
            projector.info.falloff_bias = bias;
        }
    }

    /// Render-time parameters of a projector
    pub fn info(&self, handle: ShadowHandle) -> Option<&ShadowInfo> {
        self.projectors.get(handle).map(Projector::info)
    }

    /// Falloff and texture parameters of a projector
    pub fn compute_render_info(&self, handle: ShadowHandle) -> Option<ShadowDecalRenderInfo> {
        self.projectors.get(handle).map(Projector::render_info)
    }

    /// A projector
    pub fn projector(&self, handle: ShadowHandle) -> Option<&Projector> {
        self.projectors.get(handle)
    }

    pub(crate) fn projector_mut(&mut self, handle: ShadowHandle) -> Option<&mut Projector> {
        let projector = self.projectors.get_mut(handle);
        debug_assert!(projector.is_some(), "invalid shadow {handle:?}");
        projector
    }

    /// Number of live projectors
    pub fn shadow_count(&self) -> usize {
        self.projectors.len()
    }

    /// Project and clip world-space positions for `handle`, for collaborators
    /// that tessellate their own geometry
    pub fn project_and_clip_vertices(&self, handle: ShadowHandle, positions: &[Vec3]) -> Vec<ShadowVertex> {
        self.projectors
            .get(handle)
            .map(|projector| ShadowClipper::new(projector, None).clip(positions))
            .unwrap_or_default()
    }

    /// Clip a surface polygon for a projector, offset along the surface normal
    pub(crate) fn compute_shadow_vertices(
        clip_buffers: &mut ClipBuffers,
        projector: &Projector,
        positions: &[Vec3],
        normal: &Vec3,
        model_to_world: Option<&Mat4>,
    ) -> Option<Vec<ShadowVertex>> {
        let (model_to_shadow, planes) = projector.clip_setup(model_to_world);
        let params = ClipParams { model_to_shadow, max_dist: projector.info.max_dist, planes: &planes };
        let count = project_and_clip(clip_buffers, &params, positions);
        if count == 0 {
            return None;
        }
        Some(super::clip::offset_along_normal(&clip_buffers.current()[..count], normal))
    }
}
