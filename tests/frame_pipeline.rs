use std::rc::Rc;

use penumbra::{
    Camera, CameraSettings, Entity, FRAME_PASSES, FrameSettings, HeadlessBackend, Light, Mesh,
    RecordedCommand, RenderBackend, RenderError, Renderer, Scene, ShaderStage, ShadowSettings,
    TextureViewHandle, Transform, Vec3, render_frame,
};

/// Two shadow-casting suns: L0 shines along +Z, L1 along +X.
fn two_sun_scene(backend: &mut HeadlessBackend, renderer: &Renderer) -> Scene {
    let mut scene = Scene::new();
    scene.cameras.push(
        Camera::new(Vec3::new(0.0, 3.0, -6.0), 1.0, CameraSettings::new()).look_at(Vec3::ZERO),
    );
    scene.lights.push(Light::directional(Vec3::Z, Vec3::ONE, 1.0));
    scene.lights.push(Light::directional(Vec3::X, Vec3::ONE, 0.5));

    let settings = ShadowSettings::new()
        .resolution(32)
        .projection_size(10.0)
        .clip(0.1, 50.0)
        .backup_distance(20.0);
    renderer
        .add_shadow_caster(backend, &mut scene, 0, settings)
        .unwrap();
    renderer
        .add_shadow_caster(backend, &mut scene, 1, settings)
        .unwrap();
    scene
}

fn add_occluder(backend: &mut HeadlessBackend, renderer: &Renderer, scene: &mut Scene) {
    let cube = Rc::new(Mesh::cube(backend).unwrap());
    let material = renderer.create_material().shared();
    // On L0's axis, far outside L1's 10x10 volume.
    scene.entities.push(
        Entity::new(cube, material).with_transform(Transform::from_position(Vec3::new(
            0.0, 0.0, 8.0,
        ))),
    );
}

fn shadow_views(scene: &Scene) -> Vec<TextureViewHandle> {
    scene.shadow_maps().iter().map(|m| m.depth_view()).collect()
}

#[test]
fn passes_run_in_fixed_order() {
    let names: Vec<_> = FRAME_PASSES.iter().map(|(name, _)| *name).collect();
    assert_eq!(names, ["shadow", "color", "sky", "post_process", "present"]);
}

#[test]
fn each_slice_holds_its_own_lights_depth() {
    let mut backend = HeadlessBackend::new(64, 64);
    let renderer = Renderer::new(&mut backend).unwrap();
    let mut scene = two_sun_scene(&mut backend, &renderer);
    add_occluder(&mut backend, &renderer, &mut scene);

    render_frame(
        &mut backend,
        &renderer,
        &mut scene,
        &FrameSettings::default(),
        0.0,
    )
    .unwrap();

    let array = scene.shadow_array().unwrap();
    assert_eq!(array.count(), 2);
    let slice0 = backend.depth_texels(array.texture(), 0).unwrap();
    let slice1 = backend.depth_texels(array.texture(), 1).unwrap();
    assert!(slice0.iter().any(|d| *d < 1.0));
    assert!(slice1.iter().all(|d| *d == 1.0));
}

#[test]
fn every_shadow_pass_finishes_before_the_main_pass() {
    let mut backend = HeadlessBackend::new(64, 64);
    let renderer = Renderer::new(&mut backend).unwrap();
    let mut scene = two_sun_scene(&mut backend, &renderer);
    add_occluder(&mut backend, &renderer, &mut scene);
    let floor = Rc::new(Mesh::plane(&mut backend, 20.0).unwrap());
    let material = renderer.create_material().shared();
    scene.entities.push(
        Entity::new(floor, material)
            .with_transform(Transform::from_position(Vec3::new(0.0, -1.0, 0.0))),
    );
    backend.clear_commands();

    render_frame(
        &mut backend,
        &renderer,
        &mut scene,
        &FrameSettings::default(),
        0.0,
    )
    .unwrap();

    let maps = shadow_views(&scene);
    let main_target = renderer.blur().target();
    let mut shadow_draws = Vec::new();
    let mut first_main_draw = None;
    for (i, command) in backend.commands().iter().enumerate() {
        let RecordedCommand::Draw {
            color_target,
            depth_target,
            ..
        } = command
        else {
            continue;
        };
        if let Some(map) = maps.iter().position(|v| Some(*v) == *depth_target) {
            assert!(color_target.is_none(), "shadow draws are depth-only");
            shadow_draws.push((i, map));
        } else if *color_target == Some(main_target) && first_main_draw.is_none() {
            first_main_draw = Some(i);
        }
    }

    // Two entities into each of two maps, map 0 first.
    let order: Vec<_> = shadow_draws.iter().map(|(_, map)| *map).collect();
    assert_eq!(order, [0, 0, 1, 1]);
    let first_main_draw = first_main_draw.unwrap();
    assert!(shadow_draws.iter().all(|(i, _)| *i < first_main_draw));

    // The array is assembled between the shadow passes and the main pass.
    let copies: Vec<_> = backend
        .commands()
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, RecordedCommand::CopyTextureToLayer { .. }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(copies.len(), 2);
    assert!(copies.iter().all(|i| *i > shadow_draws[3].0 && *i < first_main_draw));
}

#[test]
fn main_pass_samples_the_shadow_array() {
    let mut backend = HeadlessBackend::new(64, 64);
    let renderer = Renderer::new(&mut backend).unwrap();
    let mut scene = two_sun_scene(&mut backend, &renderer);
    add_occluder(&mut backend, &renderer, &mut scene);
    backend.clear_commands();

    render_frame(
        &mut backend,
        &renderer,
        &mut scene,
        &FrameSettings::default(),
        0.0,
    )
    .unwrap();

    let array_view = scene.shadow_array().unwrap().view();
    assert!(backend.commands().contains(&RecordedCommand::SetTexture {
        stage: ShaderStage::Pixel,
        slot: 2,
        view: Some(array_view),
    }));

    let material = scene.entities[0].material().borrow();
    let vs = material.vertex_shader();
    assert_eq!(
        vs.read_data("shadow_count"),
        Some(2u32.to_ne_bytes().to_vec())
    );
    let views = vs.read_data("shadow_views").unwrap();
    let second: [f32; 16] = bytemuck::pod_read_unaligned(&views[64..128]);
    assert_eq!(
        second,
        scene.shadow_maps()[1].view_matrix().to_cols_array()
    );
}

#[test]
fn empty_scene_still_clears_maps_and_restores_output() {
    let mut backend = HeadlessBackend::new(64, 48);
    let renderer = Renderer::new(&mut backend).unwrap();
    let mut scene = two_sun_scene(&mut backend, &renderer);
    let output = backend.output();
    backend.clear_commands();

    render_frame(
        &mut backend,
        &renderer,
        &mut scene,
        &FrameSettings::default(),
        0.0,
    )
    .unwrap();

    let commands = backend.commands();
    let maps = shadow_views(&scene);
    let last_shadow_clear = commands
        .iter()
        .rposition(|c| matches!(c, RecordedCommand::ClearDepth { view, .. } if maps.contains(view)))
        .unwrap();
    let color_clear = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::ClearRenderTarget { .. }))
        .unwrap();
    let between = &commands[last_shadow_clear..color_clear];

    assert!(between.contains(&RecordedCommand::SetViewport(output.viewport())));
    assert!(between.contains(&RecordedCommand::SetRenderTargets {
        color: Some(output.color),
        depth: Some(output.depth),
    }));
    assert!(between.contains(&RecordedCommand::SetRasterizerState(None)));
    assert!(!commands.iter().any(|c| matches!(
        c,
        RecordedCommand::Draw { depth_target: Some(v), .. } if maps.contains(v)
    )));

    for map in scene.shadow_maps() {
        let depth = backend.depth_texels(map.texture(), 0).unwrap();
        assert!(depth.iter().all(|d| *d == 1.0));
    }
    assert_eq!(backend.frames_presented(), 1);
}

#[test]
fn rotating_a_light_leaves_its_shadow_view_until_rebuilt() {
    let mut backend = HeadlessBackend::new(32, 32);
    let renderer = Renderer::new(&mut backend).unwrap();
    let mut scene = two_sun_scene(&mut backend, &renderer);
    let before = scene.shadow_maps()[0].view_matrix();

    scene.lights[0].direction = Vec3::new(0.0, -1.0, 0.0);
    render_frame(
        &mut backend,
        &renderer,
        &mut scene,
        &FrameSettings::default(),
        0.0,
    )
    .unwrap();
    assert_eq!(scene.shadow_maps()[0].view_matrix(), before);

    scene.rebuild_shadow_views();
    assert_ne!(scene.shadow_maps()[0].view_matrix(), before);
}

#[test]
fn a_failed_frame_leaves_nothing_for_the_next_one() {
    let mut backend = HeadlessBackend::new(32, 32);
    let renderer = Renderer::new(&mut backend).unwrap();
    let mut scene = two_sun_scene(&mut backend, &renderer);
    add_occluder(&mut backend, &renderer, &mut scene);
    backend.clear_commands();

    let broken = FrameSettings {
        active_camera: 7,
        ..FrameSettings::default()
    };
    for _ in 0..3 {
        let result = render_frame(&mut backend, &renderer, &mut scene, &broken, 0.0);
        assert!(matches!(result, Err(RenderError::InvalidCameraIndex(7))));
        assert!(backend.pending_commands().is_empty());
    }
    assert_eq!(backend.frames_discarded(), 3);

    render_frame(
        &mut backend,
        &renderer,
        &mut scene,
        &FrameSettings::default(),
        0.0,
    )
    .unwrap();

    // One shadow pass per map, exactly one frame's worth.
    let maps = shadow_views(&scene);
    let shadow_clears = backend
        .commands()
        .iter()
        .filter(|c| matches!(c, RecordedCommand::ClearDepth { view, .. } if maps.contains(view)))
        .count();
    assert_eq!(shadow_clears, maps.len());
    let presents = backend
        .commands()
        .iter()
        .filter(|c| matches!(c, RecordedCommand::Present))
        .count();
    assert_eq!(presents, 1);
    assert_eq!(backend.frames_presented(), 1);
}
