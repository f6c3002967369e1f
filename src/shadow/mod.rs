//! Shadow maps for directional lights.
//!
//! Each shadow-casting light gets a [`ShadowMap`]: a square depth target plus
//! an orthographic light-space camera fixed when the map is created. Every
//! frame each map renders the entity list depth-only, then
//! [`ShadowMapArray::assemble`] copies all maps into the slices of one array
//! texture that the lit shader samples with a comparison sampler.
//!
//! Slice `i` always belongs to the `i`-th registered map, and the light-space
//! matrices uploaded to the lit shader use the same order.
//!
//! # Limitations
//!
//! The light-space view is a snapshot of the light direction at creation.
//! Rotating the light afterwards leaves the shadows where they were until
//! [`ShadowMap::rebuild_light_view`] is called.

mod array;
mod map;

pub use array::ShadowMapArray;
pub use map::ShadowMap;

/// Most shadow maps the lit shader can sample.
pub const MAX_SHADOW_MAPS: usize = 4;

/// Resolution and light-space volume of a shadow map.
///
/// ```
/// use penumbra::ShadowSettings;
///
/// let settings = ShadowSettings::new()
///     .resolution(2048)
///     .projection_size(30.0)
///     .clip(0.1, 80.0)
///     .backup_distance(40.0);
/// assert_eq!(settings.resolution, 2048);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowSettings {
    /// Width and height of the depth texture in texels.
    pub resolution: u32,
    /// Width and height of the orthographic volume in world units.
    pub projection_size: f32,
    pub near: f32,
    pub far: f32,
    /// How far behind the origin, against the light direction, the light camera sits.
    pub backup_distance: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            resolution: 1024,
            projection_size: 20.0,
            near: 0.1,
            far: 50.0,
            backup_distance: 20.0,
        }
    }
}

impl ShadowSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolution(mut self, resolution: u32) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn projection_size(mut self, size: f32) -> Self {
        self.projection_size = size;
        self
    }

    pub fn clip(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    pub fn backup_distance(mut self, distance: f32) -> Self {
        self.backup_distance = distance;
        self
    }
}
