//! Surface appearance shared between entities.
//!
//! A [`Material`] pairs a vertex and pixel [`Shader`] with per-surface values
//! (tint, UV transform, roughness) and named texture and sampler bindings.
//! Entities hold materials as `Rc<RefCell<Material>>`, so editing one at
//! runtime changes every entity that uses it.
//!
//! ```ignore
//! let material = Material::new(lit_vs.clone(), lit_ps.clone())
//!     .color_tint(Vec4::new(0.8, 0.2, 0.2, 1.0))
//!     .roughness(0.4)
//!     .texture("SurfaceTexture", brick.view())
//!     .sampler("BasicSampler", wrap_sampler)
//!     .shared();
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use glam::{Vec2, Vec4};

use crate::gpu::{RenderBackend, SamplerHandle, TextureViewHandle};
use crate::shader::Shader;

#[derive(Debug, Clone)]
pub struct Material {
    vertex_shader: Rc<Shader>,
    pixel_shader: Rc<Shader>,
    pub color_tint: Vec4,
    pub uv_scale: Vec2,
    pub uv_offset: Vec2,
    pub roughness: f32,
    textures: Vec<(String, TextureViewHandle)>,
    samplers: Vec<(String, SamplerHandle)>,
}

impl Material {
    pub fn new(vertex_shader: Rc<Shader>, pixel_shader: Rc<Shader>) -> Self {
        Self {
            vertex_shader,
            pixel_shader,
            color_tint: Vec4::ONE,
            uv_scale: Vec2::ONE,
            uv_offset: Vec2::ZERO,
            roughness: 0.5,
            textures: Vec::new(),
            samplers: Vec::new(),
        }
    }

    pub fn color_tint(mut self, tint: Vec4) -> Self {
        self.color_tint = tint;
        self
    }

    pub fn uv_scale(mut self, scale: Vec2) -> Self {
        self.uv_scale = scale;
        self
    }

    pub fn uv_offset(mut self, offset: Vec2) -> Self {
        self.uv_offset = offset;
        self
    }

    pub fn roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness.clamp(0.0, 1.0);
        self
    }

    pub fn texture(mut self, name: impl Into<String>, view: TextureViewHandle) -> Self {
        self.set_texture(name, view);
        self
    }

    pub fn sampler(mut self, name: impl Into<String>, sampler: SamplerHandle) -> Self {
        self.set_sampler(name, sampler);
        self
    }

    /// Wrap for sharing between entities.
    pub fn shared(self) -> Rc<RefCell<Material>> {
        Rc::new(RefCell::new(self))
    }

    pub fn vertex_shader(&self) -> &Rc<Shader> {
        &self.vertex_shader
    }

    pub fn pixel_shader(&self) -> &Rc<Shader> {
        &self.pixel_shader
    }

    pub fn set_vertex_shader(&mut self, shader: Rc<Shader>) {
        self.vertex_shader = shader;
    }

    pub fn set_pixel_shader(&mut self, shader: Rc<Shader>) {
        self.pixel_shader = shader;
    }

    /// Bind `view` to the pixel shader's texture slot `name`, replacing any earlier binding.
    pub fn set_texture(&mut self, name: impl Into<String>, view: TextureViewHandle) {
        let name = name.into();
        match self.textures.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = view,
            None => self.textures.push((name, view)),
        }
    }

    pub fn set_sampler(&mut self, name: impl Into<String>, sampler: SamplerHandle) {
        let name = name.into();
        match self.samplers.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = sampler,
            None => self.samplers.push((name, sampler)),
        }
    }

    pub fn textures(&self) -> &[(String, TextureViewHandle)] {
        &self.textures
    }

    /// Bind both shaders and every named texture and sampler.
    pub fn bind(&self, backend: &mut dyn RenderBackend) {
        self.vertex_shader.set_shader(backend);
        self.pixel_shader.set_shader(backend);
        for (name, view) in &self.textures {
            self.pixel_shader.set_shader_resource_view(backend, name, *view);
        }
        for (name, sampler) in &self.samplers {
            self.pixel_shader.set_sampler_state(backend, name, *sampler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{HeadlessBackend, SamplerDesc, ShaderStage};
    use crate::shader::{ResourceKind, ShaderDesc};
    use crate::gpu::ViewDimension;

    fn shaders(backend: &mut HeadlessBackend) -> (Rc<Shader>, Rc<Shader>) {
        let vs = Shader::new(backend, ShaderDesc::vertex("vs", "", "vs_main")).unwrap();
        let ps = Shader::new(
            backend,
            ShaderDesc::pixel("ps", "", "fs_main")
                .resource("SurfaceTexture", 0, ResourceKind::Texture(ViewDimension::D2))
                .resource("BasicSampler", 1, ResourceKind::Sampler),
        )
        .unwrap();
        (Rc::new(vs), Rc::new(ps))
    }

    #[test]
    fn bind_sets_shaders_and_named_resources() {
        let mut backend = HeadlessBackend::new(8, 8);
        let (vs, ps) = shaders(&mut backend);
        let white = crate::texture::Texture::solid(&mut backend, [255; 4], "white").unwrap();
        let sampler = backend
            .create_sampler(&SamplerDesc::linear_wrap("wrap"))
            .unwrap();
        let material = Material::new(vs.clone(), ps.clone())
            .texture("SurfaceTexture", white.view())
            .sampler("BasicSampler", sampler);

        material.bind(&mut backend);

        let state = backend.state();
        assert_eq!(state.vertex_shader, Some(vs.handle()));
        assert_eq!(state.pixel_shader, Some(ps.handle()));
        assert_eq!(state.pixel_textures.get(&0), Some(&white.view()));
        assert_eq!(state.pixel_samplers.get(&1), Some(&sampler));
        assert_eq!(ps.stage(), ShaderStage::Pixel);
    }

    #[test]
    fn shared_material_edits_are_visible_to_every_holder() {
        let mut backend = HeadlessBackend::new(8, 8);
        let (vs, ps) = shaders(&mut backend);
        let material = Material::new(vs, ps).shared();
        let other = Rc::clone(&material);
        material.borrow_mut().color_tint = Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert_eq!(other.borrow().color_tint, Vec4::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn rebinding_a_texture_name_replaces_it() {
        let mut backend = HeadlessBackend::new(8, 8);
        let (vs, ps) = shaders(&mut backend);
        let a = crate::texture::Texture::solid(&mut backend, [0; 4], "a").unwrap();
        let b = crate::texture::Texture::solid(&mut backend, [255; 4], "b").unwrap();
        let mut material = Material::new(vs, ps).texture("SurfaceTexture", a.view());
        material.set_texture("SurfaceTexture", b.view());
        assert_eq!(material.textures(), &[("SurfaceTexture".to_string(), b.view())]);
    }
}
