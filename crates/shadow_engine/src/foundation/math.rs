//! Math utilities and types
//!
//! Provides the vector aliases and the small set of geometric primitives the
//! shadow projector pipeline needs: planes, boxes, spheres, swept boxes and
//! projector frusta.

pub use nalgebra::{Matrix3, Matrix4, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Transform a position by an affine matrix (no homogeneous divide)
pub fn transform_position(matrix: &Mat4, position: &Vec3) -> Vec3 {
    (matrix * position.push(1.0)).xyz()
}

/// Transform a position by a projective matrix, dividing by w
pub fn transform_position_projective(matrix: &Mat4, position: &Vec3) -> Vec3 {
    let h = matrix * position.push(1.0);
    if h.w.abs() <= f32::EPSILON {
        return h.xyz();
    }
    h.xyz() / h.w
}

/// Rotate a direction by the upper 3x3 block of a matrix
pub fn transform_direction(matrix: &Mat4, direction: &Vec3) -> Vec3 {
    matrix.fixed_view::<3, 3>(0, 0) * direction
}

/// Plane in `normal · p = dist` form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unit normal
    pub normal: Vec3,
    /// Distance from origin along the normal
    pub dist: f32,
}

impl Plane {
    /// Create a plane from a normal and distance
    pub const fn new(normal: Vec3, dist: f32) -> Self {
        Self { normal, dist }
    }

    /// Plane through `point` with the given normal
    pub fn from_point_normal(point: &Vec3, normal: Vec3) -> Self {
        Self { dist: normal.dot(point), normal }
    }

    /// Plane through three points, normal following the winding `(b - a) x (c - a)`
    pub fn from_triangle(a: &Vec3, b: &Vec3, c: &Vec3) -> Self {
        let normal = (b - a).cross(&(c - a)).try_normalize(f32::EPSILON).unwrap_or_else(Vec3::z);
        Self::from_point_normal(a, normal)
    }

    /// Signed distance: positive in front of the plane
    pub fn distance_to_point(&self, point: &Vec3) -> f32 {
        self.normal.dot(point) - self.dist
    }

    /// Same plane facing the other way
    #[must_use]
    pub fn flipped(&self) -> Self {
        Self { normal: -self.normal, dist: -self.dist }
    }

    /// Move this plane through an affine transform (rotation + translation)
    #[must_use]
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let normal = transform_direction(matrix, &self.normal);
        let on_plane = transform_position(matrix, &(self.normal * self.dist));
        Self::from_point_normal(&on_plane, normal)
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Aabb {
    /// Create a new AABB
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point, or `None` for an empty slice
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let first = points.first()?;
        let mut bounds = Self::new(*first, *first);
        for p in &points[1..] {
            bounds.min = bounds.min.inf(p);
            bounds.max = bounds.max.sup(p);
        }
        Some(bounds)
    }

    /// Grow the box by `amount` on every side
    #[must_use]
    pub fn expanded(&self, amount: Vec3) -> Self {
        Self { min: self.min - amount, max: self.max + amount }
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Test whether the AABB touches a sphere
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        let closest = sphere.center.sup(&self.min).inf(&self.max);
        (closest - sphere.center).norm_squared() <= sphere.radius * sphere.radius
    }

    /// Test the AABB against a swept box using the slab method on the
    /// Minkowski-expanded box
    pub fn intersects_swept_box(&self, ray: &SweptBox) -> bool {
        let expanded = self.expanded(ray.extents);
        let mut t_min = 0.0_f32;
        let mut t_max = 1.0_f32;

        for axis in 0..3 {
            let start = ray.start[axis];
            let delta = ray.delta[axis];
            if delta.abs() < 1e-8 {
                if start < expanded.min[axis] || start > expanded.max[axis] {
                    return false;
                }
                continue;
            }
            let inv = 1.0 / delta;
            let mut t1 = (expanded.min[axis] - start) * inv;
            let mut t2 = (expanded.max[axis] - start) * inv;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max {
                return false;
            }
        }
        true
    }
}

/// Bounding sphere
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    /// Center of the sphere
    pub center: Vec3,
    /// Radius of the sphere
    pub radius: f32,
}

impl BoundingSphere {
    /// Create a new bounding sphere
    pub const fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Strict overlap test: touching spheres do not intersect
    pub fn intersects(&self, other: &Self) -> bool {
        let reach = self.radius + other.radius;
        (self.center - other.center).norm_squared() < reach * reach
    }

    /// Bounding sphere of the unit volume `[0,1]^3` mapped through a
    /// projective volume-to-world matrix.
    ///
    /// The center lies on the line between the near and far face centers,
    /// placed so that the near and far corners are equidistant when possible.
    pub fn from_projection_inverse(volume_to_world: &Mat4) -> Self {
        let near_center = transform_position_projective(volume_to_world, &Vec3::new(0.5, 0.5, 0.0));
        let far_center = transform_position_projective(volume_to_world, &Vec3::new(0.5, 0.5, 1.0));

        let corner_reach = |z: f32, center: &Vec3| {
            [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
                .iter()
                .map(|&(x, y)| {
                    (transform_position_projective(volume_to_world, &Vec3::new(x, y, z)) - center).norm()
                })
                .fold(0.0_f32, f32::max)
        };
        let near_radius = corner_reach(0.0, &near_center);
        let far_radius = corner_reach(1.0, &far_center);

        let axis = far_center - near_center;
        let length = axis.norm();
        if length <= f32::EPSILON {
            return Self::new(near_center, near_radius.max(far_radius));
        }

        let t = ((length * length + far_radius * far_radius - near_radius * near_radius)
            / (2.0 * length))
            .clamp(0.0, length);
        let center = near_center + axis * (t / length);
        let radius = (t * t + near_radius * near_radius)
            .sqrt()
            .max(((length - t) * (length - t) + far_radius * far_radius).sqrt());
        Self::new(center, radius)
    }
}

/// Box of half-size `extents` swept from `start` to `start + delta`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweptBox {
    /// Sweep start
    pub start: Vec3,
    /// Sweep vector
    pub delta: Vec3,
    /// Half-size of the box
    pub extents: Vec3,
}

impl SweptBox {
    /// Sweep a box between two points
    pub fn new(start: Vec3, end: Vec3, extents: Vec3) -> Self {
        Self { start, delta: end - start, extents }
    }

    /// Sweep end point
    pub fn end(&self) -> Vec3 {
        self.start + self.delta
    }

    /// The same sweep expressed in another space; extents are left as-is
    #[must_use]
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        Self {
            start: transform_position(matrix, &self.start),
            delta: transform_direction(matrix, &self.delta),
            extents: self.extents,
        }
    }
}

/// Corners of the unit cube in volume space, indexed by `x | y << 1 | z << 2`
pub fn unit_cube_corners() -> [Vec3; 8] {
    let mut corners = [Vec3::zeros(); 8];
    for (i, corner) in corners.iter_mut().enumerate() {
        *corner = Vec3::new(
            (i & 1) as f32,
            ((i >> 1) & 1) as f32,
            ((i >> 2) & 1) as f32,
        );
    }
    corners
}

/// Corner indices of the six unit cube faces
pub const UNIT_CUBE_FACES: [[usize; 4]; 6] = [
    [0, 2, 6, 4], // x = 0
    [1, 5, 7, 3], // x = 1
    [0, 4, 5, 1], // y = 0
    [2, 3, 7, 6], // y = 1
    [0, 1, 3, 2], // z = 0
    [4, 6, 7, 5], // z = 1
];

/// Six-plane convex volume with inward-facing normals
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    /// Planes in cube face order (x0, x1, y0, y1, z0, z1)
    pub planes: [Plane; 6],
}

impl Default for Frustum {
    fn default() -> Self {
        Self { planes: [Plane::new(Vec3::z(), 0.0); 6] }
    }
}

impl Frustum {
    /// Build the frustum that `[0,1]^3` maps to through `volume_to_world`
    pub fn from_volume_to_world(volume_to_world: &Mat4) -> Self {
        let corners = unit_cube_corners()
            .map(|c| transform_position_projective(volume_to_world, &c));
        let inside = transform_position_projective(volume_to_world, &Vec3::new(0.5, 0.5, 0.5));

        let mut planes = [Plane::new(Vec3::z(), 0.0); 6];
        for (plane, face) in planes.iter_mut().zip(UNIT_CUBE_FACES.iter()) {
            let mut candidate =
                Plane::from_triangle(&corners[face[0]], &corners[face[1]], &corners[face[2]]);
            if candidate.distance_to_point(&inside) < 0.0 {
                candidate = candidate.flipped();
            }
            *plane = candidate;
        }
        Self { planes }
    }

    /// True when the box is entirely outside at least one plane
    pub fn cull_box(&self, bounds: &Aabb) -> bool {
        self.planes.iter().any(|plane| {
            let p_vertex = Vec3::new(
                if plane.normal.x >= 0.0 { bounds.max.x } else { bounds.min.x },
                if plane.normal.y >= 0.0 { bounds.max.y } else { bounds.min.y },
                if plane.normal.z >= 0.0 { bounds.max.z } else { bounds.min.z },
            );
            plane.distance_to_point(&p_vertex) < 0.0
        })
    }

    /// Test whether a point lies inside every plane
    pub fn contains_point(&self, point: &Vec3) -> bool {
        self.planes.iter().all(|p| p.distance_to_point(point) >= 0.0)
    }
}
