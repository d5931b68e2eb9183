//! Depth falloff for shadow darkness

use crate::foundation::math::{Vec2, Vec3};

/// Bias value at which a shadow is fully faded out and skipped
pub const FULLY_FADED_BIAS: u8 = 255;

/// Per-projector values needed to shade decal vertices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowDecalRenderInfo {
    /// Added to projected x/y after scaling
    pub tex_origin: Vec2,
    /// Scale applied to projected x/y
    pub tex_size: Vec2,
    /// Depth at which falloff begins
    pub falloff_offset: f32,
    /// `1 / (max_dist - falloff_offset)`, or 1 for a degenerate range
    pub one_over_falloff_dist: f32,
    /// Darkness gained across the falloff range
    pub falloff_amount: f32,
    /// Darkness at and before the falloff offset
    pub falloff_bias: u8,
}

impl ShadowDecalRenderInfo {
    /// Derive render info from projector parameters
    pub fn new(
        tex_origin: Vec2,
        tex_size: Vec2,
        max_dist: f32,
        falloff_offset: f32,
        falloff_amount: f32,
        falloff_bias: u8,
    ) -> Self {
        let range = max_dist - falloff_offset;
        Self {
            tex_origin,
            tex_size,
            falloff_offset,
            one_over_falloff_dist: if range > 0.0 { 1.0 / range } else { 1.0 },
            falloff_amount,
            falloff_bias,
        }
    }

    /// Darkness byte for a shadow-space depth
    pub fn darkness(&self, z: f32) -> u8 {
        compute_darkness(z, self)
    }

    /// Final texture coordinate of a shadow-space position
    pub fn tex_coord(&self, shadow_space: &Vec3) -> [f32; 2] {
        [
            shadow_space.x * self.tex_size.x + self.tex_origin.x,
            shadow_space.y * self.tex_size.y + self.tex_origin.y,
        ]
    }
}

/// `clamp(bias + max(0, (z - offset) / (max_dist - offset)) * amount, 0, 255)`
///
/// Truncates toward zero, so a half step rounds down.
pub fn compute_darkness(z: f32, info: &ShadowDecalRenderInfo) -> u8 {
    let depth = z - info.falloff_offset;
    if depth <= 0.0 {
        return info.falloff_bias;
    }
    let value = f32::from(info.falloff_bias) + depth * info.one_over_falloff_dist * info.falloff_amount;
    value.clamp(0.0, 255.0) as u8
}
