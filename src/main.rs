use std::f32::consts::FRAC_PI_4;
use std::rc::Rc;

use penumbra::{
    AppConfig, CameraSettings, Cubemap, Frame, KeyCode, Light, Mesh, ShadowSettings, Texture,
    Transform, Vec2, Vec3, Vec4, run_with_config,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::new().title("Penumbra").size(1280, 720);
    let result = run_with_config(config, |ctx| {
        let cube = Rc::new(Mesh::cube(ctx.backend)?);
        let sphere = Rc::new(Mesh::sphere(ctx.backend, 32, 16)?);
        let plane = Rc::new(Mesh::plane(ctx.backend, 30.0)?);

        let checker = Texture::checker(ctx.backend, 256, 8, [200, 200, 200, 255], [90, 90, 90, 255])?;
        let floor = ctx
            .material()
            .texture("SurfaceTexture", checker.view())
            .uv_scale(Vec2::splat(6.0))
            .roughness(0.9)
            .shared();
        let red = ctx
            .material()
            .color_tint(Vec4::new(0.9, 0.25, 0.2, 1.0))
            .roughness(0.4)
            .shared();
        let blue = ctx
            .material()
            .color_tint(Vec4::new(0.2, 0.4, 0.9, 1.0))
            .roughness(0.15)
            .shared();

        ctx.add_entity(&plane, &floor, Transform::new());
        for i in 0..5 {
            let x = (i as f32 - 2.0) * 2.5;
            let mut transform = Transform::from_position(Vec3::new(x, 0.5 + i as f32 * 0.25, 0.0));
            transform.set_rotation(0.0, i as f32 * FRAC_PI_4, 0.0);
            transform.set_scale(Vec3::splat(1.0 + i as f32 * 0.15));
            ctx.add_entity(&cube, &red, transform);
        }
        let sphere_index = ctx.add_entity(
            &sphere,
            &blue,
            Transform::from_position(Vec3::new(0.0, 1.5, 4.0)),
        );

        ctx.add_camera_looking_at(Vec3::new(0.0, 4.0, -12.0), Vec3::ZERO, CameraSettings::new());
        ctx.add_camera_looking_at(
            Vec3::new(12.0, 8.0, 6.0),
            Vec3::ZERO,
            CameraSettings::new().fov_degrees(60.0),
        );

        let shadows = ShadowSettings::new().resolution(2048).projection_size(30.0);
        let sun = ctx.add_light(Light::directional(
            Vec3::new(0.4, -1.0, 0.6),
            Vec3::new(1.0, 0.95, 0.85),
            1.0,
        ));
        let fill = ctx.add_light(Light::directional(
            Vec3::new(-0.7, -0.8, -0.2),
            Vec3::new(0.5, 0.6, 0.8),
            0.4,
        ));
        ctx.add_shadow_caster(sun, shadows)?;
        ctx.add_shadow_caster(fill, shadows)?;
        ctx.add_light(Light::point(
            Vec3::new(0.0, 2.0, 2.0),
            8.0,
            Vec3::new(1.0, 0.6, 0.2),
            2.0,
        ));

        let sky = Cubemap::gradient(ctx.backend, 128, [40, 90, 170], [200, 220, 240], [60, 55, 50])?;
        ctx.sky(sky)?;

        Ok(move |frame: &mut Frame| {
            let input = frame.input;
            if input.key_pressed(KeyCode::KeyB) {
                frame.settings.blur_radius += 1;
            }
            if input.key_pressed(KeyCode::KeyN) {
                frame.settings.blur_radius = (frame.settings.blur_radius - 1).max(0);
            }
            if input.key_pressed(KeyCode::Tab) {
                let count = frame.scene.cameras.len().max(1);
                frame.settings.active_camera = (frame.settings.active_camera + 1) % count;
            }

            let bob = (frame.time * 1.5).sin() * 0.5;
            if let Some(sphere) = frame.scene.entities.get_mut(sphere_index) {
                sphere.transform.set_position(Vec3::new(0.0, 1.5 + bob, 4.0));
            }
            for cube in frame.scene.entities.iter_mut().skip(1).take(5) {
                cube.transform.rotate(0.0, frame.dt * 0.5, 0.0);
            }
        })
    });

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
