//! Fly camera with cached left-handed view and projection matrices.
//!
//! ```
//! use penumbra::{Camera, CameraSettings};
//! use glam::Vec3;
//!
//! let mut camera = Camera::new(
//!     Vec3::new(0.0, 2.0, -8.0),
//!     16.0 / 9.0,
//!     CameraSettings::new().fov_degrees(60.0).speed(6.0),
//! );
//! camera.on_resize(4.0 / 3.0);
//! assert!((camera.aspect() - 4.0 / 3.0).abs() < 1e-6);
//! ```
//!
//! # Controls
//!
//! - **W/S**: forward/backward
//! - **A/D**: strafe
//! - **Space / Left Shift**: up / down
//! - **Left mouse + drag**: look around

use std::f32::consts::FRAC_PI_2;

use glam::{Mat4, Vec3};
use winit::event::MouseButton;
use winit::keyboard::KeyCode;

use crate::input::Input;
use crate::transform::Transform;

/// Largest pitch magnitude; looking straight up or down would flip the view.
pub const PITCH_LIMIT: f32 = FRAC_PI_2 - 0.01;

/// Lens and movement settings for a [`Camera`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSettings {
    /// Vertical field of view in radians.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    /// Units per second.
    pub speed: f32,
    /// Radians per pixel of mouse motion per second.
    pub look_speed: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            fov: FRAC_PI_2,
            near: 0.01,
            far: 1000.0,
            speed: 5.0,
            look_speed: 0.25,
        }
    }
}

impl CameraSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fov(mut self, radians: f32) -> Self {
        self.fov = radians;
        self
    }

    pub fn fov_degrees(mut self, degrees: f32) -> Self {
        self.fov = degrees.to_radians();
        self
    }

    pub fn clip(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    pub fn speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn look_speed(mut self, look_speed: f32) -> Self {
        self.look_speed = look_speed;
        self
    }
}

/// A camera that owns its [`Transform`] and caches view and projection.
///
/// The projection is rebuilt on [`Camera::on_resize`]; the view is rebuilt by
/// [`Camera::update`] or an explicit [`Camera::update_view_matrix`].
#[derive(Debug, Clone)]
pub struct Camera {
    transform: Transform,
    settings: CameraSettings,
    aspect: f32,
    view: Mat4,
    projection: Mat4,
}

impl Camera {
    pub fn new(position: Vec3, aspect: f32, settings: CameraSettings) -> Self {
        let mut camera = Self {
            transform: Transform::from_position(position),
            settings,
            aspect,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        };
        camera.update_projection_matrix(aspect);
        camera.update_view_matrix();
        camera
    }

    /// Turn the camera to face `target`. Roll is reset.
    pub fn look_at(mut self, target: Vec3) -> Self {
        let direction = (target - self.transform.position()).normalize_or_zero();
        if direction != Vec3::ZERO {
            let pitch = (-direction.y).clamp(-1.0, 1.0).asin().clamp(-PITCH_LIMIT, PITCH_LIMIT);
            let yaw = direction.x.atan2(direction.z);
            self.transform.set_rotation(pitch, yaw, 0.0);
            self.update_view_matrix();
        }
        self
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Mutable access for scripted movement. Call [`Camera::update_view_matrix`] afterwards.
    pub fn transform_mut(&mut self) -> &mut Transform {
        &mut self.transform
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    pub fn position(&self) -> Vec3 {
        self.transform.position()
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection
    }

    pub fn update_projection_matrix(&mut self, aspect: f32) {
        self.aspect = aspect;
        let CameraSettings { fov, near, far, .. } = self.settings;
        self.projection = Mat4::perspective_lh(fov, aspect, near, far);
    }

    /// Rebuild the projection after the output was resized.
    pub fn on_resize(&mut self, aspect: f32) {
        self.update_projection_matrix(aspect);
    }

    pub fn update_view_matrix(&mut self) {
        self.view = Mat4::look_to_lh(self.transform.position(), self.transform.forward(), Vec3::Y);
    }

    /// Apply one frame of keyboard movement and mouse look, then rebuild the view.
    pub fn update(&mut self, input: &Input, dt: f32) {
        let step = self.settings.speed * dt;
        let moves = [
            (KeyCode::KeyW, Vec3::Z),
            (KeyCode::KeyS, Vec3::NEG_Z),
            (KeyCode::KeyA, Vec3::NEG_X),
            (KeyCode::KeyD, Vec3::X),
            (KeyCode::Space, Vec3::Y),
            (KeyCode::ShiftLeft, Vec3::NEG_Y),
        ];
        for (key, direction) in moves {
            if input.key_down(key) {
                self.transform.move_relative(direction * step);
            }
        }

        if input.mouse_down(MouseButton::Left) {
            let delta = input.mouse_delta() * self.settings.look_speed * dt;
            self.transform.rotate(delta.y, delta.x, 0.0);
        }

        let Vec3 {
            x: pitch,
            y: yaw,
            z: roll,
        } = self.transform.pitch_yaw_roll();
        let clamped = pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
        if clamped != pitch {
            self.transform.set_rotation(clamped, yaw, roll);
        }

        self.update_view_matrix();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4Swizzles;

    fn camera() -> Camera {
        Camera::new(Vec3::ZERO, 1.0, CameraSettings::default())
    }

    #[test]
    fn pitch_stays_inside_the_limit() {
        let mut camera = camera();
        let input = Input::new();
        for _ in 0..5 {
            camera.transform_mut().rotate(10.0, 0.0, 0.0);
            camera.update(&input, 0.016);
            let pitch = camera.transform().pitch_yaw_roll().x;
            assert!(pitch > -FRAC_PI_2 && pitch < FRAC_PI_2, "pitch {pitch}");
        }
        for _ in 0..5 {
            camera.transform_mut().rotate(-10.0, 0.0, 0.0);
            camera.update(&input, 0.016);
            let pitch = camera.transform().pitch_yaw_roll().x;
            assert!(pitch > -FRAC_PI_2 && pitch < FRAC_PI_2, "pitch {pitch}");
        }
    }

    #[test]
    fn mouse_look_clamps_pitch() {
        let mut camera = camera();
        let mut input = Input::new();
        input.set_mouse_button_down(MouseButton::Left, true);
        input.add_mouse_delta(glam::Vec2::new(0.0, 1.0e6));
        camera.update(&input, 1.0);
        assert_eq!(camera.transform().pitch_yaw_roll().x, PITCH_LIMIT);
    }

    #[test]
    fn mouse_look_needs_the_button() {
        let mut camera = camera();
        let mut input = Input::new();
        input.add_mouse_delta(glam::Vec2::new(50.0, 50.0));
        camera.update(&input, 1.0);
        assert_eq!(camera.transform().pitch_yaw_roll(), Vec3::ZERO);
    }

    #[test]
    fn w_moves_along_forward() {
        let mut camera = Camera::new(Vec3::ZERO, 1.0, CameraSettings::new().speed(2.0));
        let mut input = Input::new();
        input.set_key_down(KeyCode::KeyW, true);
        camera.update(&input, 0.5);
        assert!((camera.position() - Vec3::new(0.0, 0.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn view_puts_points_ahead_at_positive_depth() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, -5.0), 1.0, CameraSettings::default());
        let view_space = camera.view_matrix() * Vec3::ZERO.extend(1.0);
        assert!((view_space.xyz() - Vec3::new(0.0, 0.0, 5.0)).length() < 1e-5);

        let clip = camera.projection_matrix() * view_space;
        let depth = clip.z / clip.w;
        assert!((0.0..=1.0).contains(&depth));
    }

    #[test]
    fn resize_rebuilds_projection() {
        let mut camera = camera();
        let before = camera.projection_matrix();
        camera.on_resize(2.0);
        assert_ne!(before, camera.projection_matrix());
        assert_eq!(camera.aspect(), 2.0);
    }

    #[test]
    fn look_at_faces_the_target() {
        let camera = Camera::new(Vec3::new(0.0, 5.0, 0.0), 1.0, CameraSettings::default())
            .look_at(Vec3::new(5.0, 0.0, 0.0));
        let forward = camera.transform().forward();
        let expected = Vec3::new(1.0, -1.0, 0.0).normalize();
        assert!((forward - expected).length() < 1e-4);
    }
}
