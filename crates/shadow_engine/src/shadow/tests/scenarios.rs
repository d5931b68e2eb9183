use std::collections::BTreeSet;

use approx::assert_relative_eq;

use super::fixtures::{
    box_flashlight_world_to_shadow, top_down_projection, top_down_world_to_shadow, MockWorld, RecordingRasterizer,
    RenderEvent, LEAVES,
};
use crate::core::config::ShadowConfig;
use crate::foundation::logging;
use crate::foundation::math::{Mat4, Plane, Vec2, Vec3};
use crate::render::{FlashlightState, Material, MaterialId, ShadowRasterizer, StencilState, TextureId, ViewSetup};
use crate::shadow::clip::NORMAL_OFFSET;
use crate::shadow::flashlight::FLASHLIGHT_STENCIL_BIT;
use crate::shadow::{
    DecalGeometry, FlashlightPhase, GeometryRef, ModelShadowState, ShadowCreateFlags, ShadowError, ShadowHandle,
    ShadowManager, ShadowProjection,
};
use crate::world::{BrushModel, LeafId, ModelInstanceId, SurfaceFlags, SurfaceId};

fn manager_for(world: &MockWorld, config: ShadowConfig) -> ShadowManager {
    logging::try_init();
    let mut shadows = ShadowManager::new(config);
    shadows.level_init(world.surface_count());
    shadows
}

fn blob_shadow(shadows: &mut ShadowManager, material: u64, flags: ShadowCreateFlags) -> ShadowHandle {
    shadows.create_shadow(Some(Material::shared(material, "decals/blob")), None, None, flags).unwrap()
}

fn unit_floor() -> (MockWorld, SurfaceId) {
    let mut world = MockWorld::new();
    let floor = world.add_floor(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), 0.0, 0);
    (world, floor)
}

fn surfaces_of(shadows: &ShadowManager, handle: ShadowHandle) -> BTreeSet<SurfaceId> {
    shadows.shadow_decals(handle).filter_map(|d| shadows.decal(d)).map(|d| d.surface).collect()
}

/// Eye 20 units above the origin looking straight down
fn view_from_above() -> ViewSetup {
    let origin = Vec3::new(0.0, 0.0, 20.0);
    let forward = -Vec3::z();
    let up = Vec3::y();
    let view = Mat4::look_at_rh(&origin.into(), &Vec3::zeros().into(), &up);
    let aspect_ratio = 800.0 / 600.0;
    let projection = Mat4::new_perspective(aspect_ratio, 90.0_f32.to_radians(), 1.0, 1000.0);
    ViewSetup {
        origin,
        forward,
        right: Vec3::x(),
        up,
        fov_degrees: 90.0,
        aspect_ratio,
        z_near: 1.0,
        z_far: 1000.0,
        view_projection: projection * view,
        width: 800,
        height: 600,
    }
}

#[test]
fn test_floor_shadow_renders_one_quad() {
    let (mut world, floor) = unit_floor();
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::CACHE_VERTS);

    shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));
    assert_eq!(surfaces_of(&shadows, handle), BTreeSet::from([floor]));

    shadows.add_shadows_on_surface_to_render_list(&world, floor);
    assert_eq!(shadows.decals_to_render(), 1);

    let mut ctx = RecordingRasterizer::new();
    shadows.render_projected_textures(&mut world, &mut ctx, None);

    assert_eq!(ctx.draw_count(), 1);
    assert_eq!(ctx.bound_materials(), vec![MaterialId(1)]);
    let (vertices, indices) = &ctx.meshes[0];
    assert_eq!(vertices.len(), 4);
    assert_eq!(indices, &vec![0, 1, 2, 0, 2, 3]);
    for vertex in vertices {
        assert_eq!(vertex.color, [127; 4]);
        assert_relative_eq!(vertex.position[2], NORMAL_OFFSET, epsilon = 1e-5);
        for t in vertex.tex_coord {
            assert!((0.0..=1.0).contains(&t));
        }
    }
    assert_eq!(shadows.decals_to_render(), 0);
}

#[test]
fn test_polygon_straddling_edge_gains_vertex() {
    let (mut world, _) = unit_floor();
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::empty());
    shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));

    let diamond = [
        Vec3::new(-0.5, 0.5, 0.0),
        Vec3::new(0.5, 0.1, 0.0),
        Vec3::new(0.9, 0.5, 0.0),
        Vec3::new(0.5, 0.9, 0.0),
    ];
    let clipped = shadows.project_and_clip_vertices(handle, &diamond);
    assert_eq!(clipped.len(), 5);
    for vertex in &clipped {
        let original = diamond.iter().any(|p| (p - vertex.position).norm() < 1e-4);
        if !original {
            assert_relative_eq!(vertex.tex_coord.x, 0.0, epsilon = 1e-3);
        }
        assert!(vertex.tex_coord.x >= 0.0);
    }
}

#[test]
fn test_destroy_releases_everything() {
    let mut world = MockWorld::new();
    let floors = [
        world.add_floor(Vec2::new(0.0, 0.0), Vec2::new(0.5, 0.5), 0.0, 0),
        world.add_floor(Vec2::new(0.5, 0.0), Vec2::new(1.0, 0.5), 0.0, 0),
        world.add_floor(Vec2::new(0.0, 0.5), Vec2::new(0.5, 1.0), 0.0, 0),
    ];
    let displacement = world.add_displacement(Vec2::new(0.5, 0.5), Vec2::new(1.0, 1.0), 0.0, 0);
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::CACHE_VERTS);

    shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));
    assert_eq!(shadows.decal_count(), 4);
    assert_eq!(world.disp_decals.len(), 1);

    for surface in floors.into_iter().chain([displacement]) {
        shadows.add_shadows_on_surface_to_render_list(&world, surface);
    }
    let mut ctx = RecordingRasterizer::new();
    shadows.render_projected_textures(&mut world, &mut ctx, None);
    assert_eq!(ctx.draw_count(), 1);
    assert_eq!(ctx.meshes[0].0.len(), 16);
    assert_eq!(ctx.meshes[0].1.len(), 24);
    assert_eq!(shadows.vertex_usage().small, 3);

    shadows.enable_shadow(&mut world, handle, false);
    assert_eq!(shadows.decal_count(), 0);
    assert!(world.disp_decals.is_empty());
    assert_eq!(shadows.vertex_usage().total(), 0);

    shadows.destroy_shadow(&mut world, handle);
    assert_eq!(shadows.shadow_count(), 0);
    assert!(shadows.projector(handle).is_none());
    for surface in floors.into_iter().chain([displacement]) {
        assert_eq!(shadows.decals_on_surface(surface).count(), 0);
    }
}

#[test]
fn test_destroy_while_enabled_notifies_world() {
    let mut world = MockWorld::new();
    world.add_floor(Vec2::new(0.0, 0.0), Vec2::new(0.5, 0.5), 0.0, 0);
    world.add_displacement(Vec2::new(0.5, 0.5), Vec2::new(1.0, 1.0), 0.0, 0);
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::CACHE_VERTS);
    shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));
    assert_eq!(world.disp_decals.len(), 1);

    shadows.destroy_shadow(&mut world, handle);
    assert_eq!(shadows.decal_count(), 0);
    assert!(world.disp_decals.is_empty());
}

#[test]
fn test_reprojection_is_idempotent() {
    let mut world = MockWorld::new();
    let lit = world.add_floor(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), 0.0, 0);
    let wall_below = world.add_floor(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), -5.0, 0);
    let ceiling = world.add_polygon(
        vec![
            Vec3::new(0.0, 0.0, 10.0),
            Vec3::new(0.0, 1.0, 10.0),
            Vec3::new(1.0, 1.0, 10.0),
            Vec3::new(1.0, 0.0, 10.0),
        ],
        -Vec3::z(),
        0,
    );
    let hidden = world.add_floor(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), -1.0, 0);
    world.set_flags(hidden, SurfaceFlags::NODRAW);
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::empty());

    let projection = top_down_projection(50.0, 100.0, 255.0);
    shadows.project_shadow(&mut world, handle, &projection);
    let first = surfaces_of(&shadows, handle);
    shadows.project_shadow(&mut world, handle, &projection);
    let second = surfaces_of(&shadows, handle);

    assert_eq!(first, second);
    assert_eq!(first, BTreeSet::from([lit, wall_below]));
    assert!(!first.contains(&ceiling));
    assert_eq!(shadows.decal_count(), 2);
}

#[test]
fn test_two_materials_two_draws_then_clear() {
    let (mut world, floor) = unit_floor();
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let first = blob_shadow(&mut shadows, 1, ShadowCreateFlags::CACHE_VERTS);
    let second = blob_shadow(&mut shadows, 1, ShadowCreateFlags::CACHE_VERTS);
    let third = blob_shadow(&mut shadows, 2, ShadowCreateFlags::CACHE_VERTS);
    for handle in [first, second, third] {
        shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));
    }
    let shared = shadows.projector(first).and_then(|p| p.sort_order()).unwrap();
    let other = shadows.projector(third).and_then(|p| p.sort_order()).unwrap();
    assert_eq!(shadows.projector(second).and_then(|p| p.sort_order()), Some(shared));
    assert_ne!(shared, other);

    shadows.add_shadows_on_surface_to_render_list(&world, floor);
    assert_eq!(shadows.decals_to_render(), 3);

    let mut ctx = RecordingRasterizer::new();
    shadows.render_queued_shadows(&mut world, &mut ctx, None);
    assert_eq!(ctx.draw_count(), 2);
    let mut materials = ctx.bound_materials();
    materials.sort_by_key(|m| m.0);
    assert_eq!(materials, vec![MaterialId(1), MaterialId(2)]);
    let mut sizes: Vec<usize> = ctx.meshes.iter().map(|(v, _)| v.len()).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![4, 8]);

    shadows.clear_render_queue();
    assert_eq!(shadows.decals_to_render(), 0);
    assert_eq!(shadows.render_queue_head(shared), None);
    assert_eq!(shadows.render_queue_head(other), None);

    shadows.clear_render_queue();
    assert_eq!(shadows.decals_to_render(), 0);
}

#[test]
fn test_full_vertex_tiers_skip_decal_without_dropping_it() {
    let mut world = MockWorld::new();
    let floors = [
        world.add_floor(Vec2::new(0.0, 0.0), Vec2::new(0.3, 0.3), 0.0, 0),
        world.add_floor(Vec2::new(0.3, 0.3), Vec2::new(0.6, 0.6), 0.0, 0),
        world.add_floor(Vec2::new(0.6, 0.6), Vec2::new(0.9, 0.9), 0.0, 0),
    ];
    let mut shadows = manager_for(&world, ShadowConfig::default().with_vertex_tiers(1, 1, 0));
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::CACHE_VERTS);
    shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));
    for surface in floors {
        shadows.add_shadows_on_surface_to_render_list(&world, surface);
    }

    let mut ctx = RecordingRasterizer::new();
    shadows.render_projected_textures(&mut world, &mut ctx, None);

    assert_eq!(ctx.draw_count(), 1);
    assert_eq!(ctx.meshes[0].0.len(), 8);
    assert_eq!(shadows.decal_count(), 3);
    let usage = shadows.vertex_usage();
    assert_eq!((usage.small, usage.large, usage.heap), (1, 1, 0));
}

#[test]
fn test_cached_geometry_is_reused() {
    let (mut world, floor) = unit_floor();
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::CACHE_VERTS);
    shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));
    let decal = shadows.decals_on_surface(floor).next().unwrap();

    let DecalGeometry::Ready(first) = shadows.ensure_computed(&world, decal, None) else {
        panic!("expected geometry");
    };
    let first_vertices = shadows.geometry(first).unwrap().1.to_vec();
    let DecalGeometry::Ready(second) = shadows.ensure_computed(&world, decal, None) else {
        panic!("expected geometry");
    };

    assert!(matches!(first, GeometryRef::Persistent(_)));
    assert_eq!(first, second);
    assert_eq!(shadows.geometry(second).unwrap().1, first_vertices.as_slice());
    assert_eq!(shadows.vertex_usage().total(), 1);

    shadows.invalidate_decal(decal);
    assert_eq!(shadows.vertex_usage().total(), 0);
    assert!(shadows.decal(decal).unwrap().geometry().is_none());
}

#[test]
fn test_uncached_geometry_is_temporary() {
    let (mut world, floor) = unit_floor();
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::empty());
    shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));
    let decal = shadows.decals_on_surface(floor).next().unwrap();

    let geometry = shadows.ensure_computed(&world, decal, None);
    assert!(matches!(geometry, DecalGeometry::Ready(GeometryRef::Temp(_))));
    assert_eq!(shadows.vertex_usage().total(), 1);
}

#[test]
fn test_empty_clip_retires_cached_decal() {
    let mut world = MockWorld::new();
    let far = world.add_floor(Vec2::new(2.0, 2.0), Vec2::new(3.0, 3.0), 0.0, 0);
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let cached = blob_shadow(&mut shadows, 1, ShadowCreateFlags::CACHE_VERTS);
    let uncached = blob_shadow(&mut shadows, 2, ShadowCreateFlags::empty());
    for handle in [cached, uncached] {
        shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));
    }
    assert_eq!(shadows.decals_on_surface(far).count(), 2);

    shadows.add_shadows_on_surface_to_render_list(&world, far);
    let mut ctx = RecordingRasterizer::new();
    shadows.render_projected_textures(&mut world, &mut ctx, None);

    assert_eq!(ctx.draw_count(), 0);
    assert_eq!(surfaces_of(&shadows, cached), BTreeSet::new());
    assert_eq!(surfaces_of(&shadows, uncached), BTreeSet::from([far]));
}

#[test]
fn test_fully_faded_shadow_is_not_drawn() {
    let (mut world, floor) = unit_floor();
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::CACHE_VERTS);
    shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));
    shadows.set_falloff_bias(handle, 255);

    shadows.add_shadows_on_surface_to_render_list(&world, floor);
    let mut ctx = RecordingRasterizer::new();
    shadows.render_projected_textures(&mut world, &mut ctx, None);

    assert_eq!(ctx.draw_count(), 0);
    assert_eq!(shadows.decal_count(), 1);
}

#[test]
fn test_mesh_budget_is_strict() {
    let (mut world, floor) = unit_floor();
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::CACHE_VERTS);
    shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));

    shadows.add_shadows_on_surface_to_render_list(&world, floor);
    let mut ctx = RecordingRasterizer::new();
    ctx.max_vertices = 4;
    shadows.render_projected_textures(&mut world, &mut ctx, None);

    assert_eq!(ctx.draw_count(), 0);
    assert_eq!(shadows.decal_count(), 1);
}

#[test]
fn test_game_control_off_queues_nothing() {
    let (mut world, floor) = unit_floor();
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::empty());
    shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));

    shadows.set_config(ShadowConfig::default().with_game_control(false));
    shadows.add_shadows_on_surface_to_render_list(&world, floor);
    assert_eq!(shadows.decals_to_render(), 0);
}

#[test]
fn test_shadows_disabled_associate_nothing() {
    let (mut world, _) = unit_floor();
    let mut shadows = manager_for(&world, ShadowConfig::default().with_shadows_enabled(false));
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::empty());
    shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));
    assert_eq!(shadows.decal_count(), 0);
}

#[test]
fn test_set_config_keeps_capacities() {
    let (world, _) = unit_floor();
    let mut shadows = manager_for(&world, ShadowConfig::default());
    shadows.set_config(ShadowConfig::default().with_arena_capacities(1, 1).with_game_control(false));
    assert_eq!(shadows.config().max_projectors, ShadowConfig::default().max_projectors);
    assert!(!shadows.config().game_control);
}

#[test]
fn test_projector_pool_exhaustion() {
    let (world, _) = unit_floor();
    let mut shadows = manager_for(&world, ShadowConfig::default().with_arena_capacities(1, 64));
    blob_shadow(&mut shadows, 1, ShadowCreateFlags::empty());
    let err = shadows.create_shadow(None, None, None, ShadowCreateFlags::empty()).unwrap_err();
    assert_eq!(err, ShadowError::ProjectorPoolExhausted { capacity: 1 });
    assert_eq!(shadows.shadow_count(), 1);
}

#[test]
fn test_extra_clip_planes() {
    let (mut world, floor) = unit_floor();
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::empty());
    for _ in 0..3 {
        shadows.add_extra_clip_plane(handle, Plane::new(Vec3::y(), 2.0)).unwrap();
    }
    shadows.add_extra_clip_plane(handle, Plane::new(Vec3::x(), 0.5)).unwrap();
    assert_eq!(
        shadows.add_extra_clip_plane(handle, Plane::new(Vec3::x(), 0.25)),
        Err(ShadowError::ClipPlaneLimit)
    );

    shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));
    shadows.add_shadows_on_surface_to_render_list(&world, floor);
    let mut ctx = RecordingRasterizer::new();
    shadows.render_projected_textures(&mut world, &mut ctx, None);

    assert_eq!(ctx.draw_count(), 1);
    assert_eq!(ctx.meshes[0].0.len(), 4);
    for vertex in &ctx.meshes[0].0 {
        assert!(vertex.position[0] <= 0.5 + 1e-3);
    }

    shadows.clear_extra_clip_planes(handle);
    assert!(shadows.projector(handle).unwrap().clip_planes().is_empty());
}

#[test]
fn test_tex_coord_range_applies_to_mesh() {
    let (mut world, floor) = unit_floor();
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::empty());
    shadows.set_tex_coord_range(handle, Vec2::new(0.5, 0.0), Vec2::new(0.5, 0.5));
    shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));

    shadows.add_shadows_on_surface_to_render_list(&world, floor);
    let mut ctx = RecordingRasterizer::new();
    shadows.render_projected_textures(&mut world, &mut ctx, None);

    for vertex in &ctx.meshes[0].0 {
        assert!((0.5 - 1e-5..=1.0 + 1e-5).contains(&vertex.tex_coord[0]));
        assert!((-1e-5..=0.5 + 1e-5).contains(&vertex.tex_coord[1]));
    }
}

#[test]
fn test_brush_model_in_model_space() {
    let mut world = MockWorld::new();
    let floor = world.add_floor(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), 0.0, 0);
    let other = world.add_floor(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), 0.0, 0);
    let model = BrushModel { first_surface: floor.0, surface_count: 1 };
    let model_to_world = Mat4::new_translation(&Vec3::new(10.0, 0.0, 0.0));
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::CACHE_VERTS);

    let projection = ShadowProjection {
        origin: Vec3::new(10.5, 0.5, 50.0),
        world_to_shadow: top_down_world_to_shadow(50.0) * Mat4::new_translation(&Vec3::new(-10.0, 0.0, 0.0)),
        leaves: &[],
        ..top_down_projection(50.0, 100.0, 255.0)
    };
    shadows.project_shadow(&mut world, handle, &projection);
    assert_eq!(shadows.decal_count(), 0);

    shadows.add_shadow_to_brush_model(&mut world, handle, &model, &model_to_world);
    assert_eq!(surfaces_of(&shadows, handle), BTreeSet::from([floor]));
    assert_eq!(shadows.decals_on_surface(other).count(), 0);

    shadows.add_shadows_on_surface_to_render_list(&world, floor);
    let mut ctx = RecordingRasterizer::new();
    shadows.render_queued_shadows(&mut world, &mut ctx, Some(&model_to_world));
    shadows.clear_render_queue();
    assert_eq!(ctx.draw_count(), 1);
    assert_eq!(ctx.meshes[0].0.len(), 4);

    shadows.remove_all_shadows_from_brush_model(&mut world, &model);
    assert_eq!(shadows.decal_count(), 0);
}

/// Set a top-down projection without associating any leaf surfaces
fn aim_down(shadows: &mut ShadowManager, world: &mut MockWorld, handle: ShadowHandle) {
    let projection = ShadowProjection { leaves: &[], ..top_down_projection(50.0, 100.0, 255.0) };
    shadows.project_shadow(world, handle, &projection);
}

#[test]
fn test_brush_model_nocull_surface_skips_backface_test() {
    let mut world = MockWorld::new();
    let corners = vec![
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
    ];
    let two_sided = world.add_polygon(corners.clone(), -Vec3::z(), 0);
    let one_sided = world.add_polygon(corners, -Vec3::z(), 0);
    world.set_flags(two_sided, SurfaceFlags::NOCULL);
    let model = BrushModel { first_surface: two_sided.0, surface_count: 2 };
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::empty());
    aim_down(&mut shadows, &mut world, handle);

    shadows.add_shadow_to_brush_model(&mut world, handle, &model, &Mat4::identity());
    assert_eq!(surfaces_of(&shadows, handle), BTreeSet::from([two_sided]));
    assert_eq!(shadows.decals_on_surface(one_sided).count(), 0);
}

#[test]
fn test_brush_model_add_twice_keeps_one_decal_per_surface() {
    let mut world = MockWorld::new();
    let first = world.add_floor(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), 0.0, 0);
    let second = world.add_floor(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), 0.5, 0);
    let model = BrushModel { first_surface: first.0, surface_count: 2 };
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::empty());
    let other = blob_shadow(&mut shadows, 1, ShadowCreateFlags::empty());
    aim_down(&mut shadows, &mut world, handle);
    aim_down(&mut shadows, &mut world, other);

    shadows.add_shadow_to_brush_model(&mut world, handle, &model, &Mat4::identity());
    shadows.add_shadow_to_brush_model(&mut world, handle, &model, &Mat4::identity());
    assert_eq!(shadows.decal_count(), 2);
    assert_eq!(shadows.decals_on_surface(first).count(), 1);
    assert_eq!(shadows.decals_on_surface(second).count(), 1);

    // A different shadow still gets its own decals
    shadows.add_shadow_to_brush_model(&mut world, other, &model, &Mat4::identity());
    assert_eq!(shadows.decal_count(), 4);
    assert_eq!(surfaces_of(&shadows, other), BTreeSet::from([first, second]));
}

#[test]
fn test_brush_model_respects_shadows_disabled() {
    let (mut world, floor) = unit_floor();
    let model = BrushModel { first_surface: floor.0, surface_count: 1 };
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::empty());
    aim_down(&mut shadows, &mut world, handle);

    shadows.set_config(ShadowConfig::default().with_shadows_enabled(false));
    shadows.add_shadow_to_brush_model(&mut world, handle, &model, &Mat4::identity());
    assert_eq!(shadows.decal_count(), 0);

    shadows.set_config(ShadowConfig::default());
    shadows.add_shadow_to_brush_model(&mut world, handle, &model, &Mat4::identity());
    assert_eq!(surfaces_of(&shadows, handle), BTreeSet::from([floor]));
}

#[test]
fn test_model_links_and_states() {
    let (mut world, _) = unit_floor();
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let shadow = shadows
        .create_shadow(
            Some(Material::shared(1, "decals/blob")),
            Some(Material::shared(5, "decals/blob_model")),
            None,
            ShadowCreateFlags::empty(),
        )
        .unwrap();
    let flashlight = shadows.create_shadow(None, None, None, ShadowCreateFlags::FLASHLIGHT).unwrap();
    let model = ModelInstanceId(7);

    shadows.add_shadow_to_model(shadow, model);
    shadows.add_shadow_to_model(flashlight, model);
    assert!(shadows.model_has_shadows(model));

    let states = shadows.model_shadow_states(model);
    assert_eq!(states.len(), 2);
    assert!(matches!(
        &states[0],
        ModelShadowState::Shadow { handle, material: Some(m), .. } if *handle == shadow && m.id == MaterialId(5)
    ));
    assert!(matches!(&states[1], ModelShadowState::Flashlight { handle, .. } if *handle == flashlight));

    shadows.destroy_shadow(&mut world, shadow);
    assert_eq!(shadows.model_shadow_states(model).len(), 1);
    shadows.remove_all_shadows_from_model(model);
    assert!(!shadows.model_has_shadows(model));
}

#[test]
fn test_level_shutdown_keeps_projectors() {
    let (mut world, floor) = unit_floor();
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::CACHE_VERTS);
    shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));
    let decal = shadows.decals_on_surface(floor).next().unwrap();
    shadows.ensure_computed(&world, decal, None);

    shadows.level_shutdown();
    assert_eq!(shadows.decal_count(), 0);
    assert_eq!(shadows.vertex_usage().total(), 0);
    assert_eq!(shadows.shadow_count(), 1);

    shadows.level_init(world.surface_count());
    shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));
    assert_eq!(surfaces_of(&shadows, handle), BTreeSet::from([floor]));
}

fn flashlight_world() -> (MockWorld, SurfaceId, SurfaceId) {
    let mut world = MockWorld::new();
    let floor = world.add_floor(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), 0.0, 2);
    let displacement = world.add_displacement(Vec2::new(-1.0, -1.0), Vec2::new(0.0, 0.0), 0.0, 2);
    (world, floor, displacement)
}

fn project_box_flashlight(shadows: &mut ShadowManager, world: &mut MockWorld) -> ShadowHandle {
    let handle = shadows.create_shadow(None, None, None, ShadowCreateFlags::FLASHLIGHT).unwrap();
    shadows.update_flashlight_state(
        handle,
        FlashlightState { light_origin: Vec3::new(0.0, 0.0, 5.0), ..FlashlightState::default() },
    );
    shadows.project_flashlight(world, handle, &box_flashlight_world_to_shadow(), &LEAVES);
    handle
}

#[test]
fn test_flashlight_draws_by_world_material() {
    let (mut world, floor, displacement) = flashlight_world();
    let mut shadows = manager_for(&world, ShadowConfig::default());
    shadows.set_num_world_material_buckets(4);
    let handle = project_box_flashlight(&mut shadows, &mut world);

    assert_eq!(shadows.flashlight_phase(handle), Some(FlashlightPhase::Projected));
    assert_eq!(surfaces_of(&shadows, handle), BTreeSet::from([floor, displacement]));
    let occluders = shadows.flashlight_occluders(handle).unwrap();
    assert_eq!(occluders.bucket_count(), 4);
    assert_eq!(occluders.elements(2), &[floor]);
    assert_eq!(world.disp_decals.len(), 1);

    shadows.add_shadows_on_surface_to_render_list(&world, floor);
    shadows.add_shadows_on_surface_to_render_list(&world, displacement);
    assert_eq!(shadows.decals_to_render(), 2);

    let mut ctx = RecordingRasterizer::new();
    shadows.render_flashlights(&world, &mut ctx, false);
    assert_eq!(
        ctx.events,
        vec![
            RenderEvent::FlashlightMode(true),
            RenderEvent::FlashlightState { light_origin: Vec3::new(0.0, 0.0, 5.0), depth_texture: None },
            RenderEvent::BindWorldMaterial(2),
            RenderEvent::DrawWorldIndices(vec![0, 1, 2, 0, 2, 3]),
            RenderEvent::DrawDisplacement(displacement),
            RenderEvent::FlashlightMode(false),
            RenderEvent::Scissor(None),
        ]
    );
    assert_eq!(shadows.flashlight_phase(handle), Some(FlashlightPhase::Rendered));

    shadows.clear_render_queue();
    assert!(shadows.flashlight_surfaces(handle).unwrap().is_empty());

    let mut ctx = RecordingRasterizer::new();
    shadows.render_flashlights(&world, &mut ctx, false);
    assert!(ctx.events.is_empty());
}

#[test]
fn test_surfaces_shared_by_leaves_get_one_decal() {
    let (mut world, floor, displacement) = flashlight_world();
    let second = world.add_leaf();
    world.add_to_leaf(second, floor);
    world.add_to_leaf(second, displacement);
    let leaves = [LeafId(0), second];
    let mut shadows = manager_for(&world, ShadowConfig::default());

    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::empty());
    let projection = ShadowProjection { leaves: &leaves, ..top_down_projection(50.0, 100.0, 255.0) };
    shadows.project_shadow(&mut world, handle, &projection);
    assert_eq!(surfaces_of(&shadows, handle), BTreeSet::from([floor, displacement]));
    assert_eq!(shadows.decal_count(), 2);
    assert_eq!(world.disp_decals.len(), 1);
    shadows.destroy_shadow(&mut world, handle);

    let flashlight = shadows.create_shadow(None, None, None, ShadowCreateFlags::FLASHLIGHT).unwrap();
    shadows.update_flashlight_state(
        flashlight,
        FlashlightState { light_origin: Vec3::new(0.0, 0.0, 5.0), ..FlashlightState::default() },
    );
    shadows.project_flashlight(&mut world, flashlight, &box_flashlight_world_to_shadow(), &leaves);
    assert_eq!(surfaces_of(&shadows, flashlight), BTreeSet::from([floor, displacement]));
    assert_eq!(shadows.decal_count(), 2);
    assert_eq!(world.disp_decals.len(), 1);
    assert_eq!(shadows.flashlight_occluders(flashlight).unwrap().elements(2), &[floor]);
}

#[test]
fn test_flashlight_lights_surfaces_shadows_skip() {
    let mut world = MockWorld::new();
    let unit = |world: &mut MockWorld| world.add_floor(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), 0.0, 2);
    let plain = unit(&mut world);
    let translucent = unit(&mut world);
    let alpha_tested = unit(&mut world);
    let unshadowed = unit(&mut world);
    world.set_flags(translucent, SurfaceFlags::TRANS);
    world.set_flags(alpha_tested, SurfaceFlags::ALPHATEST);
    world.set_flags(unshadowed, SurfaceFlags::NOSHADOWS);
    let mut shadows = manager_for(&world, ShadowConfig::default());

    let handle = blob_shadow(&mut shadows, 1, ShadowCreateFlags::empty());
    shadows.project_shadow(&mut world, handle, &top_down_projection(50.0, 100.0, 255.0));
    assert_eq!(surfaces_of(&shadows, handle), BTreeSet::from([plain]));

    let flashlight = project_box_flashlight(&mut shadows, &mut world);
    assert_eq!(
        surfaces_of(&shadows, flashlight),
        BTreeSet::from([plain, translucent, alpha_tested, unshadowed])
    );
}

#[test]
fn test_flashlight_render_switch() {
    let (mut world, floor, _) = flashlight_world();
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = project_box_flashlight(&mut shadows, &mut world);
    shadows.add_shadows_on_surface_to_render_list(&world, floor);

    shadows.set_config(ShadowConfig { flashlight_render: false, ..ShadowConfig::default() });
    let mut ctx = RecordingRasterizer::new();
    shadows.render_flashlights(&world, &mut ctx, true);
    assert!(ctx.events.is_empty());
    assert_eq!(shadows.flashlight_phase(handle), Some(FlashlightPhase::Projected));
}

#[test]
fn test_flashlight_stencil_and_scissor() {
    let (mut world, floor, _) = flashlight_world();
    let mut shadows = manager_for(&world, ShadowConfig::default().with_flashlight_masking(true, true));
    let handle = project_box_flashlight(&mut shadows, &mut world);
    shadows.set_flashlight_depth_texture(handle, Some(TextureId(3)));
    let view = view_from_above();

    let mut ctx = RecordingRasterizer::new();
    shadows.set_flashlight_stencil_masks(&view, &mut ctx);
    assert_eq!(
        ctx.events,
        vec![
            RenderEvent::Stencil(StencilState::WriteMask { reference: FLASHLIGHT_STENCIL_BIT }),
            RenderEvent::StencilPolygon(4),
            RenderEvent::Stencil(StencilState::Disabled),
        ]
    );
    assert_eq!(shadows.flashlight_phase(handle), Some(FlashlightPhase::StencilComputed));

    let masks = shadows.flashlight_masks(handle).unwrap();
    assert_eq!(masks.polygons.len(), 6);
    assert_eq!(masks.polygons.iter().filter(|p| p.front_facing).count(), 1);
    let rect = masks.scissor.unwrap();
    assert!(rect.left < 400 && rect.right > 400);
    assert!(rect.top < 300 && rect.bottom > 300);
    assert!(rect.left > 200 && rect.right < 600);

    shadows.add_shadows_on_surface_to_render_list(&world, floor);
    let mut ctx = RecordingRasterizer::new();
    shadows.render_flashlights(&world, &mut ctx, true);
    assert_eq!(&ctx.events[..4], &[
        RenderEvent::FlashlightMode(true),
        RenderEvent::FlashlightState { light_origin: Vec3::new(0.0, 0.0, 5.0), depth_texture: Some(TextureId(3)) },
        RenderEvent::Stencil(StencilState::TestEqual { reference: FLASHLIGHT_STENCIL_BIT }),
        RenderEvent::Scissor(Some(rect)),
    ]);
    assert_eq!(&ctx.events[ctx.events.len() - 3..], &[
        RenderEvent::FlashlightMode(false),
        RenderEvent::Stencil(StencilState::Disabled),
        RenderEvent::Scissor(None),
    ]);
}

#[test]
fn test_unshadowed_flashlight_skips_stencil() {
    let (mut world, _, _) = flashlight_world();
    let mut shadows = manager_for(&world, ShadowConfig::default().with_flashlight_masking(true, false));
    let handle = project_box_flashlight(&mut shadows, &mut world);

    let mut ctx = RecordingRasterizer::new();
    shadows.set_stencil_and_scissor(handle, &view_from_above(), &mut ctx);
    assert!(ctx.events.is_empty());
    let masks = shadows.flashlight_masks(handle).unwrap();
    assert_eq!(masks.polygons.len(), 6);
    assert!(masks.scissor.is_none());
}

#[test]
fn test_masks_off_computes_nothing() {
    let (mut world, _, _) = flashlight_world();
    let mut shadows = manager_for(&world, ShadowConfig::default().with_flashlight_masking(false, false));
    let handle = project_box_flashlight(&mut shadows, &mut world);
    assert!(shadows.compute_flashlight_masks(handle, &view_from_above()).is_none());
    assert_eq!(shadows.flashlight_phase(handle), Some(FlashlightPhase::Projected));
}

#[test]
fn test_flashlight_pass_per_flashlight() {
    let (mut world, _, _) = flashlight_world();
    let mut shadows = manager_for(&world, ShadowConfig::default());
    let handle = project_box_flashlight(&mut shadows, &mut world);
    shadows.add_flashlight_renderable(handle, ModelInstanceId(4));
    assert_eq!(shadows.flashlight_renderables(handle), &[ModelInstanceId(4)]);

    let mut seen = Vec::new();
    let mut ctx = RecordingRasterizer::new();
    shadows.for_each_flashlight_pass(&mut ctx, false, |flashlight, ctx| {
        seen.push(flashlight);
        ctx.draw_displacement(SurfaceId(99));
    });
    assert_eq!(seen, vec![handle]);
    assert!(ctx.events.contains(&RenderEvent::DrawDisplacement(SurfaceId(99))));

    shadows.project_flashlight(&mut world, handle, &box_flashlight_world_to_shadow(), &LEAVES);
    assert!(shadows.flashlight_renderables(handle).is_empty());
}
