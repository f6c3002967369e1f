use std::rc::Rc;

use glam::{Mat4, Vec3};

use super::ShadowSettings;
use crate::entity::Entity;
use crate::error::{RenderError, Result};
use crate::gpu::{
    OutputTargets, RasterizerHandle, RenderBackend, ShaderStage, TextureDesc, TextureFormat,
    TextureHandle, TextureUsage, TextureViewHandle, ViewKind, Viewport,
};
use crate::light::Light;
use crate::shader::Shader;

/// Depth target and fixed light-space camera for one directional light.
#[derive(Debug)]
pub struct ShadowMap {
    settings: ShadowSettings,
    texture: TextureHandle,
    depth_view: TextureViewHandle,
    shader: Rc<Shader>,
    view: Mat4,
    projection: Mat4,
}

impl ShadowMap {
    /// Create the depth texture and its depth view and snapshot the light's view.
    ///
    /// The map is only ever copied into the [`super::ShadowMapArray`]; the
    /// lit shader never samples it directly.
    ///
    /// `shader` is the depth-only vertex shader with `world`, `view` and
    /// `projection` matrices.
    pub fn new(
        backend: &mut dyn RenderBackend,
        light: &Light,
        shader: Rc<Shader>,
        settings: ShadowSettings,
    ) -> Result<Self> {
        let resolution = settings.resolution;
        if resolution == 0 {
            return Err(RenderError::InvalidShadowResolution(resolution));
        }
        let max = backend.max_texture_dimension();
        if resolution > max {
            return Err(RenderError::ShadowResolutionTooLarge { resolution, max });
        }

        let texture = backend.create_texture(&TextureDesc::new(
            "Shadow Map",
            resolution,
            resolution,
            TextureFormat::Depth32Float,
            TextureUsage::DEPTH_STENCIL | TextureUsage::COPY_SRC,
        ))?;
        let depth_view = backend.create_view(texture, ViewKind::DepthStencil)?;

        let half = settings.projection_size * 0.5;
        let projection = Mat4::orthographic_lh(-half, half, -half, half, settings.near, settings.far);
        log::debug!(
            "Shadow map {}x{} for light direction {}",
            resolution,
            resolution,
            light.direction
        );

        Ok(Self {
            settings,
            texture,
            depth_view,
            shader,
            view: light_view(light.direction, settings.backup_distance),
            projection,
        })
    }

    pub fn resolution(&self) -> u32 {
        self.settings.resolution
    }

    pub fn settings(&self) -> &ShadowSettings {
        &self.settings
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn depth_view(&self) -> TextureViewHandle {
        self.depth_view
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection
    }

    /// Re-aim the light camera at the light's current direction.
    pub fn rebuild_light_view(&mut self, light: &Light) {
        self.view = light_view(light.direction, self.settings.backup_distance);
    }

    /// Render every entity's depth into this map, then restore the main output.
    ///
    /// Entities are drawn with the shadow shader only; their materials are not
    /// touched. `rasterizer` is normally the depth-bias state.
    pub fn draw(
        &self,
        backend: &mut dyn RenderBackend,
        entities: &[Entity],
        rasterizer: Option<RasterizerHandle>,
        output: &OutputTargets,
    ) {
        backend.clear_depth(self.depth_view, 1.0);
        backend.set_render_targets(None, Some(self.depth_view));
        backend.set_shader(ShaderStage::Pixel, None);
        backend.set_viewport(Viewport::new(self.resolution(), self.resolution()));
        backend.set_rasterizer_state(rasterizer);

        self.shader.set_shader(backend);
        self.shader.set_matrix4x4("view", self.view);
        self.shader.set_matrix4x4("projection", self.projection);
        for entity in entities {
            self.shader
                .set_matrix4x4("world", entity.transform.world_matrix());
            self.shader.copy_all_buffer_data(backend);
            entity.mesh().draw(backend);
        }

        backend.set_viewport(output.viewport());
        backend.set_render_targets(Some(output.color), Some(output.depth));
        backend.set_rasterizer_state(None);
    }
}

/// Look along `direction` from `backup` units behind the origin.
fn light_view(direction: Vec3, backup: f32) -> Mat4 {
    let direction = direction.normalize_or(Vec3::NEG_Y);
    let up = if direction.y.abs() > 0.999 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    Mat4::look_to_lh(-direction * backup, direction, up)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{HeadlessBackend, RecordedCommand};
    use crate::shaders;

    fn shadow_shader(backend: &mut HeadlessBackend) -> Rc<Shader> {
        Rc::new(Shader::new(backend, shaders::shadow_vertex()).unwrap())
    }

    fn sun() -> Light {
        Light::directional(Vec3::new(0.0, -1.0, 1.0), Vec3::ONE, 1.0)
    }

    #[test]
    fn zero_resolution_is_rejected() {
        let mut backend = HeadlessBackend::new(64, 64);
        let shader = shadow_shader(&mut backend);
        let result = ShadowMap::new(
            &mut backend,
            &sun(),
            shader,
            ShadowSettings::new().resolution(0),
        );
        assert!(matches!(result, Err(RenderError::InvalidShadowResolution(0))));
    }

    #[test]
    fn resolution_past_the_device_limit_reports_the_limit() {
        let mut backend = HeadlessBackend::new(64, 64);
        let shader = shadow_shader(&mut backend);
        let max = backend.max_texture_dimension();
        let result = ShadowMap::new(
            &mut backend,
            &sun(),
            shader,
            ShadowSettings::new().resolution(max * 2),
        );
        assert!(matches!(
            result,
            Err(RenderError::ShadowResolutionTooLarge { resolution, max: limit })
                if resolution == max * 2 && limit == max
        ));
    }

    #[test]
    fn map_texture_is_depth_and_copy_source_only() {
        let mut backend = HeadlessBackend::new(64, 64);
        let shader = shadow_shader(&mut backend);
        let map = ShadowMap::new(&mut backend, &sun(), shader, ShadowSettings::new().resolution(16))
            .unwrap();
        let desc = backend.texture_desc(map.texture()).unwrap();
        assert_eq!(desc.usage, TextureUsage::DEPTH_STENCIL | TextureUsage::COPY_SRC);
        assert_eq!(backend.view_kind(map.depth_view()), Some(ViewKind::DepthStencil));
    }

    #[test]
    fn light_camera_backs_up_against_the_light() {
        let mut backend = HeadlessBackend::new(64, 64);
        let shader = shadow_shader(&mut backend);
        let settings = ShadowSettings::new().resolution(16).backup_distance(10.0);
        let map = ShadowMap::new(&mut backend, &sun(), shader, settings).unwrap();

        let eye = map.view_matrix().inverse().transform_point3(Vec3::ZERO);
        let expected = -Vec3::new(0.0, -1.0, 1.0).normalize() * 10.0;
        assert!((eye - expected).length() < 1e-4);

        // The origin sits 10 units in front of the light camera.
        let origin = map.view_matrix().transform_point3(Vec3::ZERO);
        assert!((origin.z - 10.0).abs() < 1e-4);
    }

    #[test]
    fn light_straight_down_still_has_a_view() {
        let view = light_view(Vec3::NEG_Y, 5.0);
        assert!(view.is_finite());
        assert!((view.transform_point3(Vec3::ZERO).z - 5.0).abs() < 1e-4);
    }

    #[test]
    fn light_view_is_a_snapshot_until_rebuilt() {
        let mut backend = HeadlessBackend::new(64, 64);
        let shader = shadow_shader(&mut backend);
        let mut light = sun();
        let mut map =
            ShadowMap::new(&mut backend, &light, shader, ShadowSettings::new().resolution(16))
                .unwrap();
        let before = map.view_matrix();

        light.direction = Vec3::X;
        assert_eq!(map.view_matrix(), before);
        map.rebuild_light_view(&light);
        assert_ne!(map.view_matrix(), before);
    }

    #[test]
    fn empty_entity_list_still_clears_and_restores() {
        let mut backend = HeadlessBackend::new(64, 48);
        let shader = shadow_shader(&mut backend);
        let map =
            ShadowMap::new(&mut backend, &sun(), shader, ShadowSettings::new().resolution(32))
                .unwrap();
        let output = backend.output();
        backend.clear_commands();

        map.draw(&mut backend, &[], None, &output);

        let commands = backend.commands();
        assert_eq!(
            commands.first(),
            Some(&RecordedCommand::ClearDepth {
                view: map.depth_view(),
                depth: 1.0
            })
        );
        assert!(commands.contains(&RecordedCommand::SetViewport(Viewport::new(32, 32))));
        assert!(!commands.iter().any(|c| matches!(c, RecordedCommand::Draw { .. })));

        let state = backend.state();
        assert_eq!(state.viewport, output.viewport());
        assert_eq!(state.color_target, Some(output.color));
        assert_eq!(state.depth_target, Some(output.depth));
        assert_eq!(state.rasterizer, None);
        assert!(backend.depth_texels(map.texture(), 0).unwrap().iter().all(|d| *d == 1.0));
    }
}
