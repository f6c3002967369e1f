//! Cubemap skybox drawn behind everything else.

use std::rc::Rc;

use crate::camera::Camera;
use crate::error::Result;
use crate::gpu::{
    CompareFunction, CullMode, DepthStencilDesc, DepthStencilHandle, RasterizerDesc,
    RasterizerHandle, RenderBackend, SamplerHandle,
};
use crate::mesh::Mesh;
use crate::shader::Shader;
use crate::texture::Cubemap;

/// A cube seen from the inside, textured with a [`Cubemap`].
///
/// The vertex shader pins every vertex to the far plane, so the sky passes the
/// less-equal depth test only where nothing else was drawn.
#[derive(Debug)]
pub struct Sky {
    mesh: Mesh,
    cubemap: Cubemap,
    vertex_shader: Rc<Shader>,
    pixel_shader: Rc<Shader>,
    sampler: SamplerHandle,
    rasterizer: RasterizerHandle,
    depth_state: DepthStencilHandle,
}

impl Sky {
    pub fn new(
        backend: &mut dyn RenderBackend,
        cubemap: Cubemap,
        vertex_shader: Rc<Shader>,
        pixel_shader: Rc<Shader>,
        sampler: SamplerHandle,
    ) -> Result<Self> {
        let mesh = Mesh::cube(backend)?;
        let rasterizer = backend.create_rasterizer_state(&RasterizerDesc {
            cull_mode: CullMode::Front,
            ..Default::default()
        })?;
        let depth_state = backend.create_depth_stencil_state(&DepthStencilDesc {
            depth_write: true,
            depth_compare: CompareFunction::LessEqual,
        })?;

        Ok(Self {
            mesh,
            cubemap,
            vertex_shader,
            pixel_shader,
            sampler,
            rasterizer,
            depth_state,
        })
    }

    pub fn cubemap(&self) -> &Cubemap {
        &self.cubemap
    }

    /// Swap in a different cubemap, e.g. after loading new faces.
    pub fn set_cubemap(&mut self, cubemap: Cubemap) {
        self.cubemap = cubemap;
    }

    pub fn draw(&self, backend: &mut dyn RenderBackend, camera: &Camera) {
        backend.set_rasterizer_state(Some(self.rasterizer));
        backend.set_depth_stencil_state(Some(self.depth_state));

        self.vertex_shader.set_shader(backend);
        self.pixel_shader.set_shader(backend);
        self.vertex_shader.set_matrix4x4("view", camera.view_matrix());
        self.vertex_shader
            .set_matrix4x4("projection", camera.projection_matrix());
        self.vertex_shader.copy_all_buffer_data(backend);
        self.pixel_shader
            .set_shader_resource_view(backend, "SkyTexture", self.cubemap.view());
        self.pixel_shader
            .set_sampler_state(backend, "BasicSampler", self.sampler);

        self.mesh.draw(backend);

        backend.set_rasterizer_state(None);
        backend.set_depth_stencil_state(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraSettings;
    use crate::gpu::{HeadlessBackend, RecordedCommand, SamplerDesc};
    use crate::shaders;
    use glam::Vec3;

    #[test]
    fn draw_sets_and_resets_sky_states() {
        let mut backend = HeadlessBackend::new(32, 32);
        let cubemap = Cubemap::gradient(&mut backend, 4, [0, 0, 255], [255; 3], [0; 3]).unwrap();
        let vs = Rc::new(Shader::new(&mut backend, shaders::sky_vertex()).unwrap());
        let ps = Rc::new(Shader::new(&mut backend, shaders::sky_pixel()).unwrap());
        let sampler = backend
            .create_sampler(&SamplerDesc::linear_wrap("sky"))
            .unwrap();
        let sky = Sky::new(&mut backend, cubemap, vs, ps, sampler).unwrap();
        let camera = Camera::new(Vec3::ZERO, 1.0, CameraSettings::default());
        backend.clear_commands();

        sky.draw(&mut backend, &camera);

        let commands = backend.commands();
        assert_eq!(
            commands.first(),
            Some(&RecordedCommand::SetRasterizerState(Some(sky.rasterizer)))
        );
        assert!(commands.iter().any(|c| matches!(
            c,
            RecordedCommand::Draw { count: 36, .. }
        )));
        assert_eq!(backend.state().rasterizer, None);
        assert_eq!(backend.state().depth_stencil, None);
        assert_eq!(
            backend.state().pixel_textures.get(&0),
            Some(&sky.cubemap().view())
        );
    }
}
