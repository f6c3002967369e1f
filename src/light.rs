//! Dynamic lights and their GPU representation.

use glam::Vec3;

/// Most lights uploaded to the lit shader per frame.
pub const MAX_LIGHTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LightType {
    Directional = 0,
    Point = 1,
    Spot = 2,
}

/// A light source. Plain data; nothing is cached.
///
/// Spot cone angles are full angles in radians; light inside `spot_inner`
/// is at full strength and fades out towards `spot_outer`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub kind: LightType,
    pub direction: Vec3,
    pub position: Vec3,
    pub range: f32,
    pub color: Vec3,
    pub intensity: f32,
    pub spot_inner: f32,
    pub spot_outer: f32,
}

impl Light {
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightType::Directional,
            direction,
            position: Vec3::ZERO,
            range: 0.0,
            color,
            intensity,
            spot_inner: 0.0,
            spot_outer: 0.0,
        }
    }

    pub fn point(position: Vec3, range: f32, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightType::Point,
            position,
            range,
            ..Self::directional(Vec3::ZERO, color, intensity)
        }
    }

    pub fn spot(
        position: Vec3,
        direction: Vec3,
        range: f32,
        inner: f32,
        outer: f32,
        color: Vec3,
        intensity: f32,
    ) -> Self {
        Self {
            kind: LightType::Spot,
            direction,
            position,
            range,
            color,
            intensity,
            spot_inner: inner,
            spot_outer: outer,
        }
    }

    /// Pack for the lit shader. `shadow_index` is the shadow array slice this
    /// light samples, if any.
    pub fn to_gpu(&self, shadow_index: Option<usize>) -> GpuLight {
        GpuLight {
            direction: self.direction.normalize_or_zero().to_array(),
            kind: self.kind as u32,
            position: self.position.to_array(),
            range: self.range,
            color: self.color.to_array(),
            intensity: self.intensity,
            spot_inner: (self.spot_inner * 0.5).cos(),
            spot_outer: (self.spot_outer * 0.5).cos(),
            shadow_index: shadow_index.map_or(-1, |i| i as i32),
            _pad: 0.0,
        }
    }
}

/// Layout of one entry of the lit shader's `lights` array (64 bytes).
///
/// Spot angles are stored as cosines of the half angles.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuLight {
    pub direction: [f32; 3],
    pub kind: u32,
    pub position: [f32; 3],
    pub range: f32,
    pub color: [f32; 3],
    pub intensity: f32,
    pub spot_inner: f32,
    pub spot_outer: f32,
    pub shadow_index: i32,
    pub _pad: f32,
}

impl GpuLight {
    pub const SIZE: usize = std::mem::size_of::<GpuLight>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_light_is_64_bytes() {
        assert_eq!(GpuLight::SIZE, 64);
    }

    #[test]
    fn packing_normalizes_direction_and_marks_shadows() {
        let light = Light::directional(Vec3::new(0.0, -2.0, 0.0), Vec3::ONE, 1.0);
        let gpu = light.to_gpu(Some(2));
        assert_eq!(gpu.direction, [0.0, -1.0, 0.0]);
        assert_eq!(gpu.kind, 0);
        assert_eq!(gpu.shadow_index, 2);
        assert_eq!(light.to_gpu(None).shadow_index, -1);
    }

    #[test]
    fn spot_angles_become_half_angle_cosines() {
        let light = Light::spot(
            Vec3::ZERO,
            Vec3::NEG_Y,
            10.0,
            std::f32::consts::FRAC_PI_2,
            std::f32::consts::PI,
            Vec3::ONE,
            1.0,
        );
        let gpu = light.to_gpu(None);
        assert_eq!(gpu.kind, LightType::Spot as u32);
        assert!((gpu.spot_inner - std::f32::consts::FRAC_PI_4.cos()).abs() < 1e-6);
        assert!(gpu.spot_outer.abs() < 1e-6);
    }
}
