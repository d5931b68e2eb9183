//! # Shadow Engine
//!
//! Projected shadow and flashlight decals for BSP world renderers.
//!
//! ## Features
//!
//! - **Projector Registry**: shadow and flashlight projectors behind generation-checked handles
//! - **Surface Association**: leaf-driven candidate selection with backface and bounds rejection
//! - **Clipping**: shadow-space Sutherland-Hodgman clipping with extra world clip planes
//! - **Vertex Cache**: tiered storage that keeps static shadow geometry across frames
//! - **Batching**: one dynamic mesh per shadow material, one indexed draw per world material for flashlights
//! - **Flashlight Masking**: optional scissor rectangle and stencil footprint per flashlight
//!
//! The host renderer supplies the spatial database through [`world::ShadowWorld`]
//! and draw submission through [`render::ShadowRasterizer`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shadow_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     shadow_engine::foundation::logging::init();
//!
//!     let config = ShadowConfig::load_from_file("shadows.toml").unwrap_or_default();
//!     let mut shadows = ShadowManager::new(config);
//!     shadows.level_init(4096);
//!
//!     let material = Material::shared(1, "decals/blob_shadow");
//!     let handle = shadows.create_shadow(Some(material), None, None, ShadowCreateFlags::CACHE_VERTS)?;
//!     shadows.set_falloff_bias(handle, 0);
//!
//!     // Per frame: project_shadow, add_shadows_on_surface_to_render_list for
//!     // each visible surface, then render_projected_textures.
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]
#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]

// Core modules
pub mod core;
pub mod config;
pub mod foundation;

// Collaborator contracts
pub mod render;
pub mod world;

pub mod shadow;

pub use shadow::{ShadowError, ShadowHandle, ShadowManager};

/// Common imports for shadow engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError},
        core::config::ShadowConfig,
        foundation::math::{Mat4, Plane, Vec2, Vec3},
        render::{
            FlashlightState, Material, MaterialHandle, ScissorRect, ShadowMeshBuilder, ShadowMeshVertex,
            ShadowRasterizer, StencilState, ViewSetup,
        },
        shadow::{
            DecalHandle, FlashlightPhase, ShadowCreateFlags, ShadowDecalRenderInfo, ShadowError, ShadowHandle,
            ShadowManager, ShadowProjection,
        },
        world::{BrushModel, LeafId, ModelInstanceId, ShadowWorld, SurfaceFlags, SurfaceId},
    };
}
