//! Screen-space box blur applied after the scene is drawn.
//!
//! The color and sky passes render into [`BlurPass::target`], an offscreen
//! texture the size of the output. The blur pass then binds the back buffer,
//! samples that texture and draws one fullscreen triangle.
//!
//! The shader receives:
//! - `blur_radius`: box radius in texels, 0 copies the scene unchanged
//! - `pixel_width`, `pixel_height`: size of one texel in UV units
//! - `Pixels` + `ClampSampler`: the offscreen scene

use crate::error::Result;
use crate::gpu::{
    OutputTargets, RenderBackend, SamplerDesc, SamplerHandle, ShaderStage, TextureDesc,
    TextureFormat, TextureHandle, TextureUsage, TextureViewHandle, ViewDimension, ViewKind,
};
use crate::shader::Shader;
use crate::shaders;

/// Offscreen scene target plus the blur program that resolves it to the screen.
#[derive(Debug)]
pub struct BlurPass {
    texture: TextureHandle,
    render_view: TextureViewHandle,
    resource_view: TextureViewHandle,
    width: u32,
    height: u32,
    sampler: SamplerHandle,
    vertex_shader: Shader,
    pixel_shader: Shader,
}

impl BlurPass {
    /// Create the blur program and a target matching the current output size.
    pub fn new(backend: &mut dyn RenderBackend) -> Result<Self> {
        let vertex_shader = Shader::new(backend, shaders::blur_vertex())?;
        let pixel_shader = Shader::new(backend, shaders::blur_pixel())?;
        let sampler = backend.create_sampler(&SamplerDesc::linear_clamp("Blur Sampler"))?;

        let output = backend.output();
        let (texture, render_view, resource_view) =
            create_target(backend, output.width, output.height)?;

        Ok(Self {
            texture,
            render_view,
            resource_view,
            width: output.width,
            height: output.height,
            sampler,
            vertex_shader,
            pixel_shader,
        })
    }

    /// Render-target view the scene should be drawn into.
    pub fn target(&self) -> TextureViewHandle {
        self.render_view
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Recreate the offscreen target at a new size. Zero sizes are ignored.
    pub fn resize(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 || (width, height) == (self.width, self.height) {
            return Ok(());
        }
        let (texture, render_view, resource_view) = create_target(backend, width, height)?;
        backend.destroy_texture(self.texture);

        self.texture = texture;
        self.render_view = render_view;
        self.resource_view = resource_view;
        self.width = width;
        self.height = height;
        log::debug!("Blur target resized to {}x{}", width, height);
        Ok(())
    }

    /// Blur the offscreen target onto the back buffer.
    ///
    /// Leaves the back buffer bound without depth and unbinds the offscreen
    /// texture from the pixel stage, so it can be rendered to next frame.
    pub fn draw(&self, backend: &mut dyn RenderBackend, radius: i32, output: &OutputTargets) {
        backend.set_render_targets(Some(output.color), None);
        backend.set_viewport(output.viewport());

        self.vertex_shader.set_shader(backend);
        self.pixel_shader.set_shader(backend);
        self.pixel_shader.set_int("blur_radius", radius.max(0));
        self.pixel_shader
            .set_float("pixel_width", 1.0 / self.width as f32);
        self.pixel_shader
            .set_float("pixel_height", 1.0 / self.height as f32);
        self.pixel_shader.copy_all_buffer_data(backend);
        self.pixel_shader
            .set_shader_resource_view(backend, "Pixels", self.resource_view);
        self.pixel_shader
            .set_sampler_state(backend, "ClampSampler", self.sampler);

        backend.draw(3);

        backend.set_texture(ShaderStage::Pixel, 0, None);
    }
}

fn create_target(
    backend: &mut dyn RenderBackend,
    width: u32,
    height: u32,
) -> Result<(TextureHandle, TextureViewHandle, TextureViewHandle)> {
    let texture = backend.create_texture(&TextureDesc::new(
        "Blur Target",
        width,
        height,
        TextureFormat::Rgba8UnormSrgb,
        TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
    ))?;
    let render_view = backend.create_view(texture, ViewKind::RenderTarget)?;
    let resource_view = backend.create_view(texture, ViewKind::ShaderResource(ViewDimension::D2))?;
    Ok((texture, render_view, resource_view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{HeadlessBackend, RecordedCommand};

    #[test]
    fn draw_is_one_fullscreen_triangle_to_the_back_buffer() {
        let mut backend = HeadlessBackend::new(40, 20);
        let blur = BlurPass::new(&mut backend).unwrap();
        let output = backend.output();
        backend.clear_commands();

        blur.draw(&mut backend, 2, &output);

        let draws: Vec<_> = backend
            .commands()
            .iter()
            .filter(|c| matches!(c, RecordedCommand::Draw { .. }))
            .collect();
        assert_eq!(draws.len(), 1);
        assert!(matches!(
            draws[0],
            RecordedCommand::Draw {
                count: 3,
                color_target: Some(color),
                depth_target: None,
                ..
            } if *color == output.color
        ));
        assert!(backend.state().pixel_textures.get(&0).is_none());
    }

    #[test]
    fn negative_radius_is_clamped_to_a_copy() {
        let mut backend = HeadlessBackend::new(8, 8);
        let blur = BlurPass::new(&mut backend).unwrap();
        let output = backend.output();

        blur.draw(&mut backend, -3, &output);

        assert_eq!(blur.pixel_shader.read_data("blur_radius"), Some(0i32.to_ne_bytes().to_vec()));
    }

    #[test]
    fn resize_replaces_the_target() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut blur = BlurPass::new(&mut backend).unwrap();
        let old = blur.texture();

        blur.resize(&mut backend, 32, 24).unwrap();

        assert_ne!(blur.texture(), old);
        assert_eq!(blur.size(), (32, 24));
        assert!(backend.texture_desc(old).is_none());
        let desc = backend.texture_desc(blur.texture()).unwrap();
        assert_eq!((desc.width, desc.height), (32, 24));

        blur.resize(&mut backend, 0, 10).unwrap();
        assert_eq!(blur.size(), (32, 24));
    }
}
