//! Rasterizer contracts
//!
//! The shadow manager never touches a GPU API. It hands vertices, indices and
//! render state to a [`ShadowRasterizer`] supplied by the host renderer.

use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{Mat4, Vec3, Vec4};
use crate::world::SurfaceId;

/// Stable identity of a material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u64);

/// Material used to draw shadow decals or shadowed models
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Material {
    /// Identity used for sort-order grouping
    pub id: MaterialId,
    /// Human readable name
    pub name: String,
}

impl Material {
    /// Create a shared material handle
    pub fn shared(id: u64, name: impl Into<String>) -> MaterialHandle {
        Rc::new(Self { id: MaterialId(id), name: name.into() })
    }
}

/// Shared ownership handle to a material
pub type MaterialHandle = Rc<Material>;

/// Identity of a proxy object bound alongside a shadow material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindProxyId(pub u64);

/// Texture identifier (flashlight depth maps)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Vertex layout of the dynamic shadow mesh
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShadowMeshVertex {
    /// World position
    pub position: [f32; 3],
    /// Darkness in every channel
    pub color: [u8; 4],
    /// Shadow texture coordinate
    pub tex_coord: [f32; 2],
}

impl ShadowMeshVertex {
    /// Build a vertex with a uniform darkness color
    pub fn new(position: &Vec3, darkness: u8, tex_coord: [f32; 2]) -> Self {
        Self {
            position: [position.x, position.y, position.z],
            color: [darkness; 4],
            tex_coord,
        }
    }
}

/// Receives vertices and indices for one dynamic mesh
pub trait ShadowMeshBuilder {
    /// Append a vertex
    fn emit_vertex(&mut self, vertex: ShadowMeshVertex);
    /// Append an index relative to the mesh's first vertex
    fn emit_index(&mut self, index: u32);
}

/// Pixel rectangle, `right` and `bottom` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    /// Left edge
    pub left: i32,
    /// Top edge
    pub top: i32,
    /// Right edge
    pub right: i32,
    /// Bottom edge
    pub bottom: i32,
}

/// Stencil usage for flashlight masking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilState {
    /// Stencil off
    Disabled,
    /// Write `reference` where front-facing mask polygons rasterize
    WriteMask {
        /// Bit written
        reference: u32,
    },
    /// Only pass pixels whose stencil equals `reference`
    TestEqual {
        /// Bit tested
        reference: u32,
    },
}

/// Pass-through flashlight parameters consumed by the rasterizer
#[derive(Debug, Clone, PartialEq)]
pub struct FlashlightState {
    /// Light position
    pub light_origin: Vec3,
    /// Horizontal field of view in degrees
    pub fov_degrees: f32,
    /// Near plane distance
    pub near_z: f32,
    /// Far plane distance
    pub far_z: f32,
    /// Linear color and intensity
    pub color: Vec4,
    /// Render depth-mapped shadows
    pub enable_shadows: bool,
}

impl Default for FlashlightState {
    fn default() -> Self {
        Self {
            light_origin: Vec3::zeros(),
            fov_degrees: 90.0,
            near_z: 4.0,
            far_z: 750.0,
            color: Vec4::new(1.0, 1.0, 1.0, 1.0),
            enable_shadows: false,
        }
    }
}

/// Camera description used for flashlight masking
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSetup {
    /// Eye position
    pub origin: Vec3,
    /// Unit forward vector
    pub forward: Vec3,
    /// Unit right vector
    pub right: Vec3,
    /// Unit up vector
    pub up: Vec3,
    /// Horizontal field of view in degrees
    pub fov_degrees: f32,
    /// Width over height
    pub aspect_ratio: f32,
    /// Near plane distance
    pub z_near: f32,
    /// Far plane distance
    pub z_far: f32,
    /// World to clip space
    pub view_projection: Mat4,
    /// Back buffer width in pixels
    pub width: u32,
    /// Back buffer height in pixels
    pub height: u32,
}

/// Draw submission and render state for shadow rendering
pub trait ShadowRasterizer: ShadowMeshBuilder {
    /// Bind a shadow material
    fn bind_material(&mut self, material: &Material);

    /// Largest vertex count one dynamic mesh can hold with this material
    fn max_vertices_to_render(&self, material: &Material) -> usize;

    /// Largest index count one dynamic mesh can hold
    fn max_indices_to_render(&self) -> usize;

    /// Start a dynamic mesh sized for the given counts
    fn begin_dynamic_mesh(&mut self, vertex_count: usize, index_count: usize);

    /// Submit the current dynamic mesh
    fn end_and_draw(&mut self);

    /// Bind a world material and its lightmap page by sort id
    fn bind_world_material(&mut self, sort_id: u32);

    /// Draw indexed triangles from the static world vertex buffer
    fn draw_world_indices(&mut self, indices: &[u32]);

    /// Draw a displacement surface with the current state
    fn draw_displacement(&mut self, surface: SurfaceId);

    /// Enter or leave flashlight (additive projected texture) mode
    fn set_flashlight_mode(&mut self, enabled: bool);

    /// Upload the flashlight used by subsequent draws
    fn set_flashlight_state(
        &mut self,
        state: &FlashlightState,
        world_to_texture: &Mat4,
        depth_texture: Option<TextureId>,
    );

    /// Set or clear the scissor rectangle
    fn set_scissor_rect(&mut self, rect: Option<ScissorRect>);

    /// Change stencil usage
    fn set_stencil_state(&mut self, state: StencilState);

    /// Rasterize a convex world-space polygon into the stencil buffer only
    fn draw_stencil_polygon(&mut self, polygon: &[Vec3]);
}
