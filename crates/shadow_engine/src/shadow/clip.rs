//! Shadow-space polygon clipping
//!
//! Surface polygons are projected into the projector's shadow space and then
//! clipped Sutherland-Hodgman style against the unit texture square, the
//! projector's near plane and up to [`MAX_CLIP_PLANES`] world-space planes.
//! Intermediate polygons live in a fixed pair of buffers that swap roles after
//! every stage.

use super::falloff::ShadowDecalRenderInfo;
use super::projector::Projector;
use crate::foundation::math::{transform_position, Mat4, Plane, Vec3};

/// Most vertices any clip stage may hold, input vertices included
pub const CLIP_VERTEX_CAPACITY: usize = 48;

/// Extra world-space planes a projector may carry
pub const MAX_CLIP_PLANES: usize = 4;

/// Distance clipped vertices are pushed off their surface to avoid z-fighting
pub const NORMAL_OFFSET: f32 = 0.1;

/// Texcoords within this distance of 0 or 1 snap onto the edge
pub const EDGE_SNAP_EPSILON: f32 = 1e-3;

/// A clipped vertex: position plus shadow-space coordinate (x, y texture, z depth)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShadowVertex {
    /// Surface-space position
    pub position: Vec3,
    /// Shadow-space texture coordinate and depth
    pub tex_coord: Vec3,
}

/// One clip boundary
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClipBoundary {
    /// keep `y < 1`
    Top,
    /// keep `y > 0`
    Bottom,
    /// keep `x > 0`
    Left,
    /// keep `x < 1`
    Right,
    /// keep `z > 0`
    Above,
    /// keep `position · normal < dist`
    Plane(Plane),
}

impl ClipBoundary {
    /// The five unit-volume boundaries in clip order
    pub const CANONICAL: [Self; 5] = [Self::Top, Self::Bottom, Self::Left, Self::Right, Self::Above];

    /// Is the vertex on the kept side
    pub fn inside(&self, vertex: &ShadowVertex) -> bool {
        let tc = &vertex.tex_coord;
        match self {
            Self::Top => tc.y < 1.0,
            Self::Bottom => tc.y > 0.0,
            Self::Left => tc.x > 0.0,
            Self::Right => tc.x < 1.0,
            Self::Above => tc.z > 0.0,
            Self::Plane(plane) => vertex.position.dot(&plane.normal) < plane.dist,
        }
    }

    fn crossing(&self, one: &ShadowVertex, two: &ShadowVertex) -> f32 {
        let (a, b) = (&one.tex_coord, &two.tex_coord);
        match self {
            Self::Top => (1.0 - a.y) / (b.y - a.y),
            Self::Bottom => a.y / (a.y - b.y),
            Self::Left => a.x / (a.x - b.x),
            Self::Right => (1.0 - a.x) / (b.x - a.x),
            Self::Above => a.z / (a.z - b.z),
            Self::Plane(plane) => {
                let along = (two.position - one.position).dot(&plane.normal);
                if along.abs() <= f32::EPSILON {
                    0.0
                } else {
                    (plane.dist - one.position.dot(&plane.normal)) / along
                }
            }
        }
    }

    /// Vertex where the edge `start -> end` crosses this boundary
    pub fn intersect(&self, start: &ShadowVertex, end: &ShadowVertex, start_inside: bool) -> ShadowVertex {
        let t = self.crossing(start, end);
        let mut out = ShadowVertex {
            position: start.position.lerp(&end.position, t),
            tex_coord: start.tex_coord.lerp(&end.tex_coord, t),
        };
        if matches!(self, Self::Above) {
            let outside = if start_inside { end } else { start };
            snap_to_edges(&outside.tex_coord, &mut out.tex_coord);
        }
        out
    }
}

/// Pull x and y onto 0 or 1 when the reference vertex sits on that edge.
/// Keeps soft shadow edges from showing a seam where the near plane cuts.
fn snap_to_edges(reference: &Vec3, out: &mut Vec3) {
    for axis in 0..2 {
        if reference[axis].abs() < EDGE_SNAP_EPSILON {
            out[axis] = 0.0;
        } else if (reference[axis] - 1.0).abs() < EDGE_SNAP_EPSILON {
            out[axis] = 1.0;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveBuffer {
    Front,
    Back,
}

/// Ping-pong storage for clip stages
#[derive(Debug, Clone)]
pub struct ClipBuffers {
    front: Vec<ShadowVertex>,
    back: Vec<ShadowVertex>,
    active: ActiveBuffer,
    emitted: usize,
}

impl Default for ClipBuffers {
    fn default() -> Self {
        Self {
            front: Vec::with_capacity(CLIP_VERTEX_CAPACITY),
            back: Vec::with_capacity(CLIP_VERTEX_CAPACITY),
            active: ActiveBuffer::Front,
            emitted: 0,
        }
    }
}

impl ClipBuffers {
    /// Current polygon
    pub fn current(&self) -> &[ShadowVertex] {
        match self.active {
            ActiveBuffer::Front => &self.front,
            ActiveBuffer::Back => &self.back,
        }
    }

    fn reset(&mut self) {
        self.front.clear();
        self.back.clear();
        self.active = ActiveBuffer::Front;
        self.emitted = 0;
    }

    fn split(&mut self) -> (&[ShadowVertex], &mut Vec<ShadowVertex>) {
        match self.active {
            ActiveBuffer::Front => (&self.front, &mut self.back),
            ActiveBuffer::Back => (&self.back, &mut self.front),
        }
    }

    /// Project positions into shadow space. Returns false when every vertex
    /// lies at or beyond `max_dist`.
    fn project(&mut self, model_to_shadow: &Mat4, max_dist: f32, positions: &[Vec3]) -> bool {
        self.reset();
        let mut inside_volume = false;
        for position in positions {
            let tex_coord = transform_position(model_to_shadow, position);
            inside_volume |= tex_coord.z < max_dist;
            self.front.push(ShadowVertex { position: *position, tex_coord });
        }
        self.emitted = positions.len();
        inside_volume
    }

    /// Run one Sutherland-Hodgman stage. A stage that would emit more than
    /// [`CLIP_VERTEX_CAPACITY`] vertices is abandoned and the polygon it
    /// started from stays current.
    pub fn clip(&mut self, boundary: &ClipBoundary) {
        if self.current().is_empty() {
            return;
        }
        let mut emitted = self.emitted;
        let (src, dst) = self.split();
        dst.clear();

        let Some(last) = src.last() else { return };
        let mut start = last;
        let mut start_inside = boundary.inside(start);
        let mut overflowed = false;
        for end in src {
            let end_inside = boundary.inside(end);
            if end_inside != start_inside {
                if emitted >= CLIP_VERTEX_CAPACITY {
                    overflowed = true;
                    break;
                }
                emitted += 1;
                dst.push(boundary.intersect(start, end, start_inside));
            }
            if end_inside {
                dst.push(*end);
            }
            start = end;
            start_inside = end_inside;
        }

        self.emitted = emitted;
        if overflowed {
            return;
        }
        self.active = match self.active {
            ActiveBuffer::Front => ActiveBuffer::Back,
            ActiveBuffer::Back => ActiveBuffer::Front,
        };
    }
}

/// Everything needed to clip one polygon for one projector
#[derive(Debug, Clone, Copy)]
pub struct ClipParams<'a> {
    /// Surface space to shadow space
    pub model_to_shadow: Mat4,
    /// Projection depth
    pub max_dist: f32,
    /// Extra planes, already in surface space
    pub planes: &'a [Plane],
}

/// Project and clip `positions`; the result is left in `buffers.current()`.
///
/// Returns the surviving vertex count, 0 when fewer than three remain.
pub fn project_and_clip(buffers: &mut ClipBuffers, params: &ClipParams<'_>, positions: &[Vec3]) -> usize {
    if positions.len() < 3 || positions.len() > CLIP_VERTEX_CAPACITY {
        return 0;
    }
    if !buffers.project(&params.model_to_shadow, params.max_dist, positions) {
        return 0;
    }

    for boundary in &ClipBoundary::CANONICAL {
        buffers.clip(boundary);
    }
    for plane in params.planes.iter().take(MAX_CLIP_PLANES) {
        buffers.clip(&ClipBoundary::Plane(*plane));
    }

    let count = buffers.current().len();
    if count < 3 {
        0
    } else {
        count
    }
}

/// Clips polygons for one projector on behalf of collaborators that
/// tessellate their own geometry (displacements)
#[derive(Debug, Clone, Copy)]
pub struct ShadowClipper<'a> {
    projector: &'a Projector,
    model_to_world: Option<&'a Mat4>,
}

impl<'a> ShadowClipper<'a> {
    /// Clipper for surfaces in world space, or model space with `model_to_world`
    pub const fn new(projector: &'a Projector, model_to_world: Option<&'a Mat4>) -> Self {
        Self { projector, model_to_world }
    }

    /// Project and clip one polygon; empty when nothing survives
    pub fn clip(&self, positions: &[Vec3]) -> Vec<ShadowVertex> {
        let (model_to_shadow, planes) = self.projector.clip_setup(self.model_to_world);
        let params = ClipParams { model_to_shadow, max_dist: self.projector.info().max_dist, planes: &planes };
        let mut buffers = ClipBuffers::default();
        let count = project_and_clip(&mut buffers, &params, positions);
        buffers.current()[..count].to_vec()
    }

    /// Shading parameters of the projector
    pub fn render_info(&self) -> ShadowDecalRenderInfo {
        self.projector.render_info()
    }
}

/// Copy clipped vertices out, pushing positions off the surface along `normal`
pub fn offset_along_normal(vertices: &[ShadowVertex], normal: &Vec3) -> Vec<ShadowVertex> {
    let offset = normal * NORMAL_OFFSET;
    vertices
        .iter()
        .map(|v| ShadowVertex { position: v.position + offset, tex_coord: v.tex_coord })
        .collect()
}
