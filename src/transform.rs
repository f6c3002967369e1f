//! Position, Euler rotation and scale with a lazily cached world matrix.
//!
//! [`Transform`] stores its components separately and only rebuilds the
//! world matrix (and the inverse-transpose used for normals) when one of them
//! has changed since the last read. Any run of mutations costs exactly one
//! recomputation, performed by whichever matrix getter is called first.
//!
//! # Conventions
//!
//! - Rotation is stored as pitch (X), yaw (Y) and roll (Z) in radians and
//!   applied roll first, then pitch, then yaw.
//! - The world matrix scales, then rotates, then translates.
//! - Forward is `+Z`, right is `+X` and up is `+Y` before rotation.
//!
//! ```
//! use penumbra::Transform;
//! use glam::Vec3;
//!
//! let mut transform = Transform::new();
//! transform.set_position(Vec3::new(2.0, 0.0, 0.0));
//! let world = transform.world_matrix();
//! assert_eq!(world.transform_point3(Vec3::ZERO), Vec3::new(2.0, 0.0, 0.0));
//! ```

use std::cell::Cell;

use glam::{EulerRot, Mat4, Quat, Vec3};

/// Whether the cached matrices reflect the current components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Clean,
    Dirty,
}

#[derive(Debug, Clone, Copy)]
struct CachedMatrices {
    world: Mat4,
    world_inverse_transpose: Mat4,
}

/// Position, rotation and scale of an entity or camera.
///
/// Mutators are O(1) and only mark the cache dirty. The matrix getters take
/// `&self` and fill the cache on demand.
#[derive(Debug, Clone)]
pub struct Transform {
    position: Vec3,
    pitch_yaw_roll: Vec3,
    scale: Vec3,
    cache: Cell<CachedMatrices>,
    state: Cell<CacheState>,
    recomputations: Cell<u64>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            pitch_yaw_roll: Vec3::ZERO,
            scale: Vec3::ONE,
            cache: Cell::new(CachedMatrices {
                world: Mat4::IDENTITY,
                world_inverse_transpose: Mat4::IDENTITY,
            }),
            state: Cell::new(CacheState::Dirty),
            recomputations: Cell::new(0),
        }
    }
}

impl Transform {
    /// Identity transform: origin, no rotation, unit scale.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transform positioned at `position`.
    pub fn from_position(position: Vec3) -> Self {
        let mut transform = Self::default();
        transform.position = position;
        transform
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Rotation as `(pitch, yaw, roll)` in radians.
    pub fn pitch_yaw_roll(&self) -> Vec3 {
        self.pitch_yaw_roll
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn cache_state(&self) -> CacheState {
        self.state.get()
    }

    /// How many times the cached matrices have been rebuilt.
    pub fn recompute_count(&self) -> u64 {
        self.recomputations.get()
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.mark_dirty();
    }

    pub fn set_rotation(&mut self, pitch: f32, yaw: f32, roll: f32) {
        self.pitch_yaw_roll = Vec3::new(pitch, yaw, roll);
        self.mark_dirty();
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.mark_dirty();
    }

    /// Offset the position along the world axes.
    pub fn move_absolute(&mut self, offset: Vec3) {
        self.position += offset;
        self.mark_dirty();
    }

    /// Offset the position along the transform's own axes.
    ///
    /// `Vec3::Z` moves forward, `Vec3::X` moves right.
    pub fn move_relative(&mut self, offset: Vec3) {
        self.position += self.quat() * offset;
        self.mark_dirty();
    }

    /// Add to the current pitch, yaw and roll.
    pub fn rotate(&mut self, pitch: f32, yaw: f32, roll: f32) {
        self.pitch_yaw_roll += Vec3::new(pitch, yaw, roll);
        self.mark_dirty();
    }

    /// Multiply the scale per axis.
    pub fn scale_by(&mut self, factor: Vec3) {
        self.scale *= factor;
        self.mark_dirty();
    }

    pub fn right(&self) -> Vec3 {
        self.quat() * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.quat() * Vec3::Y
    }

    pub fn forward(&self) -> Vec3 {
        self.quat() * Vec3::Z
    }

    /// Object-to-world matrix.
    pub fn world_matrix(&self) -> Mat4 {
        self.matrices().world
    }

    /// Inverse-transpose of the world matrix, for transforming normals.
    pub fn world_inverse_transpose_matrix(&self) -> Mat4 {
        self.matrices().world_inverse_transpose
    }

    fn quat(&self) -> Quat {
        let Vec3 {
            x: pitch,
            y: yaw,
            z: roll,
        } = self.pitch_yaw_roll;
        Quat::from_euler(EulerRot::YXZ, yaw, pitch, roll)
    }

    fn mark_dirty(&mut self) {
        self.state.set(CacheState::Dirty);
    }

    fn matrices(&self) -> CachedMatrices {
        if self.state.get() == CacheState::Dirty {
            let world = Mat4::from_scale_rotation_translation(self.scale, self.quat(), self.position);
            self.cache.set(CachedMatrices {
                world,
                world_inverse_transpose: world.inverse().transpose(),
            });
            self.state.set(CacheState::Clean);
            self.recomputations.set(self.recomputations.get() + 1);
        }
        self.cache.get()
    }
}
