//! In-memory backend that records commands instead of executing them on a GPU.
//!
//! Besides the command log and the currently bound state, it keeps CPU copies
//! of buffers and textures. Draws into a depth target are approximated by
//! transforming every referenced vertex with the bound vertex shader's
//! `world`, `view` and `projection` matrices and depth-testing it into the
//! texel it lands on. That is enough to tell which shadow map saw which
//! occluder without a rasterizer.

use std::collections::{BTreeMap, HashMap};

use glam::{Mat4, Vec3, Vec4};

use super::{
    BACK_BUFFER_VIEW, BufferHandle, BufferKind, DepthStencilDesc, DepthStencilHandle,
    FIRST_USER_ID, MAIN_DEPTH_VIEW, OutputTargets, RasterizerDesc, RasterizerHandle,
    RenderBackend, SamplerDesc, SamplerHandle, ShaderHandle, ShaderStage, TextureDesc,
    TextureFormat, TextureHandle, TextureUsage, TextureViewHandle, ViewKind, Viewport,
};
use crate::error::{RenderError, Result};
use crate::shader::{ShaderDesc, UniformKind};

/// One entry of the headless command log.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    ClearRenderTarget {
        view: TextureViewHandle,
        color: [f32; 4],
    },
    ClearDepth {
        view: TextureViewHandle,
        depth: f32,
    },
    SetRenderTargets {
        color: Option<TextureViewHandle>,
        depth: Option<TextureViewHandle>,
    },
    SetViewport(Viewport),
    SetRasterizerState(Option<RasterizerHandle>),
    SetDepthStencilState(Option<DepthStencilHandle>),
    SetShader {
        stage: ShaderStage,
        shader: Option<ShaderHandle>,
    },
    SetUniforms {
        stage: ShaderStage,
        size: usize,
    },
    SetTexture {
        stage: ShaderStage,
        slot: u32,
        view: Option<TextureViewHandle>,
    },
    SetSampler {
        stage: ShaderStage,
        slot: u32,
        sampler: Option<SamplerHandle>,
    },
    Draw {
        color_target: Option<TextureViewHandle>,
        depth_target: Option<TextureViewHandle>,
        vertex_shader: Option<ShaderHandle>,
        pixel_shader: Option<ShaderHandle>,
        count: u32,
    },
    CopyTextureToLayer {
        source: TextureHandle,
        destination: TextureHandle,
        layer: u32,
    },
    Present,
}

/// The pipeline state as of the last recorded command.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundState {
    pub color_target: Option<TextureViewHandle>,
    pub depth_target: Option<TextureViewHandle>,
    pub viewport: Viewport,
    pub rasterizer: Option<RasterizerHandle>,
    pub depth_stencil: Option<DepthStencilHandle>,
    pub vertex_shader: Option<ShaderHandle>,
    pub pixel_shader: Option<ShaderHandle>,
    pub vertex_uniforms: Vec<u8>,
    pub pixel_uniforms: Vec<u8>,
    pub vertex_textures: BTreeMap<u32, TextureViewHandle>,
    pub pixel_textures: BTreeMap<u32, TextureViewHandle>,
    pub vertex_samplers: BTreeMap<u32, SamplerHandle>,
    pub pixel_samplers: BTreeMap<u32, SamplerHandle>,
}

impl BoundState {
    fn new(output: &OutputTargets) -> Self {
        Self {
            color_target: Some(output.color),
            depth_target: Some(output.depth),
            viewport: output.viewport(),
            rasterizer: None,
            depth_stencil: None,
            vertex_shader: None,
            pixel_shader: None,
            vertex_uniforms: Vec::new(),
            pixel_uniforms: Vec::new(),
            vertex_textures: BTreeMap::new(),
            pixel_textures: BTreeMap::new(),
            vertex_samplers: BTreeMap::new(),
            pixel_samplers: BTreeMap::new(),
        }
    }
}

struct HeadlessBuffer {
    kind: BufferKind,
    data: Vec<u8>,
}

struct HeadlessTexture {
    desc: TextureDesc,
    /// One texel grid per layer. Depth textures store depth in `x`.
    layers: Vec<Vec<Vec4>>,
}

impl HeadlessTexture {
    fn new(desc: TextureDesc) -> Self {
        let texels = (desc.width * desc.height) as usize;
        let layers = vec![vec![Vec4::ZERO; texels]; desc.layers as usize];
        Self { desc, layers }
    }
}

struct HeadlessView {
    texture: TextureHandle,
    kind: ViewKind,
}

/// A [`RenderBackend`] that runs entirely on the CPU.
pub struct HeadlessBackend {
    width: u32,
    height: u32,
    next_id: u64,
    back_buffer: TextureHandle,
    main_depth: TextureHandle,
    buffers: HashMap<BufferHandle, HeadlessBuffer>,
    textures: HashMap<TextureHandle, HeadlessTexture>,
    views: HashMap<TextureViewHandle, HeadlessView>,
    samplers: HashMap<SamplerHandle, SamplerDesc>,
    rasterizers: HashMap<RasterizerHandle, RasterizerDesc>,
    depth_states: HashMap<DepthStencilHandle, DepthStencilDesc>,
    shaders: HashMap<ShaderHandle, ShaderDesc>,
    state: BoundState,
    commands: Vec<RecordedCommand>,
    /// Start of the current frame in `commands`.
    frame_start: usize,
    frames_presented: u64,
    frames_discarded: u64,
}

impl HeadlessBackend {
    /// Create a backend whose swapchain is `width` x `height`.
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let output = OutputTargets {
            color: BACK_BUFFER_VIEW,
            depth: MAIN_DEPTH_VIEW,
            width,
            height,
        };
        let mut backend = Self {
            width,
            height,
            next_id: FIRST_USER_ID,
            back_buffer: TextureHandle(0),
            main_depth: TextureHandle(1),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            samplers: HashMap::new(),
            rasterizers: HashMap::new(),
            depth_states: HashMap::new(),
            shaders: HashMap::new(),
            state: BoundState::new(&output),
            commands: Vec::new(),
            frame_start: 0,
            frames_presented: 0,
            frames_discarded: 0,
        };
        backend.create_output_textures();
        backend
    }

    fn create_output_textures(&mut self) {
        let color = TextureDesc::new(
            "Back Buffer",
            self.width,
            self.height,
            TextureFormat::Rgba8UnormSrgb,
            TextureUsage::RENDER_TARGET,
        );
        let depth = TextureDesc::new(
            "Main Depth",
            self.width,
            self.height,
            TextureFormat::Depth32Float,
            TextureUsage::DEPTH_STENCIL,
        );
        self.textures
            .insert(self.back_buffer, HeadlessTexture::new(color));
        self.textures
            .insert(self.main_depth, HeadlessTexture::new(depth));
        self.views.insert(
            BACK_BUFFER_VIEW,
            HeadlessView {
                texture: self.back_buffer,
                kind: ViewKind::RenderTarget,
            },
        );
        self.views.insert(
            MAIN_DEPTH_VIEW,
            HeadlessView {
                texture: self.main_depth,
                kind: ViewKind::DepthStencil,
            },
        );
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Every command recorded since creation or the last [`Self::clear_commands`].
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
        self.frame_start = 0;
    }

    /// Commands recorded since the last present or discard.
    pub fn pending_commands(&self) -> &[RecordedCommand] {
        &self.commands[self.frame_start.min(self.commands.len())..]
    }

    pub fn state(&self) -> &BoundState {
        &self.state
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn frames_discarded(&self) -> u64 {
        self.frames_discarded
    }

    pub fn texture_desc(&self, texture: TextureHandle) -> Option<&TextureDesc> {
        self.textures.get(&texture).map(|t| &t.desc)
    }

    /// The texture a view was created from.
    pub fn view_texture(&self, view: TextureViewHandle) -> Option<TextureHandle> {
        self.views.get(&view).map(|v| v.texture)
    }

    pub fn view_kind(&self, view: TextureViewHandle) -> Option<ViewKind> {
        self.views.get(&view).map(|v| v.kind)
    }

    pub fn rasterizer_desc(&self, state: RasterizerHandle) -> Option<&RasterizerDesc> {
        self.rasterizers.get(&state)
    }

    pub fn sampler_desc(&self, sampler: SamplerHandle) -> Option<&SamplerDesc> {
        self.samplers.get(&sampler)
    }

    pub fn shader_desc(&self, shader: ShaderHandle) -> Option<&ShaderDesc> {
        self.shaders.get(&shader)
    }

    /// Depth values of one layer of a depth texture, row-major.
    pub fn depth_texels(&self, texture: TextureHandle, layer: u32) -> Option<Vec<f32>> {
        let texture = self.textures.get(&texture)?;
        if !texture.desc.format.is_depth() {
            return None;
        }
        let layer = texture.layers.get(layer as usize)?;
        Some(layer.iter().map(|t| t.x).collect())
    }

    /// RGBA values of one layer of a color texture, row-major.
    pub fn color_texels(&self, texture: TextureHandle, layer: u32) -> Option<&[Vec4]> {
        let texture = self.textures.get(&texture)?;
        if texture.desc.format.is_depth() {
            return None;
        }
        texture.layers.get(layer as usize).map(|l| l.as_slice())
    }

    fn record(&mut self, command: RecordedCommand) {
        self.commands.push(command);
    }

    fn fill_view(&mut self, view: TextureViewHandle, value: Vec4) {
        let Some(texture) = self.views.get(&view).map(|v| v.texture) else {
            log::warn!("Clear of unknown view {:?}", view);
            return;
        };
        if let Some(texture) = self.textures.get_mut(&texture) {
            for layer in &mut texture.layers {
                layer.fill(value);
            }
        }
    }

    fn matrix(&self, desc: &ShaderDesc, name: &str) -> Option<Mat4> {
        let field = desc.uniforms.get(name)?;
        if field.kind != UniformKind::Matrix4 {
            return None;
        }
        let start = field.offset as usize;
        let bytes = self.state.vertex_uniforms.get(start..start + 64)?;
        let cols: [f32; 16] = bytemuck::pod_read_unaligned(bytes);
        Some(Mat4::from_cols_array(&cols))
    }

    /// Splat the referenced vertices into the bound depth target.
    fn rasterize_depth(&mut self, vertices: BufferHandle, indices: BufferHandle, count: u32) {
        let Some(depth_view) = self.state.depth_target else {
            return;
        };
        let Some(shader) = self
            .state
            .vertex_shader
            .and_then(|s| self.shaders.get(&s))
        else {
            return;
        };
        let (Some(world), Some(view), Some(projection)) = (
            self.matrix(shader, "world"),
            self.matrix(shader, "view"),
            self.matrix(shader, "projection"),
        ) else {
            return;
        };
        let clip_from_model = projection * view * world;

        let (Some(vertex_buffer), Some(index_buffer)) =
            (self.buffers.get(&vertices), self.buffers.get(&indices))
        else {
            return;
        };
        let BufferKind::Vertex { stride } = vertex_buffer.kind else {
            return;
        };
        let stride = stride as usize;
        let index_data: &[u8] = &index_buffer.data;
        let positions: Vec<Vec3> = index_data
            .chunks_exact(4)
            .take(count as usize)
            .filter_map(|chunk| {
                let index = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize;
                let bytes = vertex_buffer
                    .data
                    .get(index * stride..index * stride + 12)?;
                let xyz: [f32; 3] = bytemuck::pod_read_unaligned(bytes);
                Some(Vec3::from(xyz))
            })
            .collect();

        let depth_state = self
            .state
            .depth_stencil
            .and_then(|s| self.depth_states.get(&s).copied())
            .unwrap_or_default();
        let viewport = self.state.viewport;
        let Some(texture) = self
            .views
            .get(&depth_view)
            .and_then(|v| self.textures.get_mut(&v.texture))
        else {
            return;
        };
        let (width, height) = (texture.desc.width, texture.desc.height);

        for position in positions {
            let clip = clip_from_model * position.extend(1.0);
            if clip.w <= 0.0 {
                continue;
            }
            let ndc = clip.truncate() / clip.w;
            if ndc.x.abs() > 1.0 || ndc.y.abs() > 1.0 || !(0.0..=1.0).contains(&ndc.z) {
                continue;
            }
            let px = viewport.x + (ndc.x * 0.5 + 0.5) * viewport.width;
            let py = viewport.y + (0.5 - ndc.y * 0.5) * viewport.height;
            let x = (px.floor().max(0.0) as u32).min(width - 1);
            let y = (py.floor().max(0.0) as u32).min(height - 1);
            let depth = viewport.min_depth + ndc.z * (viewport.max_depth - viewport.min_depth);

            for layer in &mut texture.layers {
                let texel = &mut layer[(y * width + x) as usize];
                if depth_state.depth_compare.test(depth, texel.x) && depth_state.depth_write {
                    texel.x = depth;
                }
            }
        }
    }
}

impl RenderBackend for HeadlessBackend {
    fn output(&self) -> OutputTargets {
        OutputTargets {
            color: BACK_BUFFER_VIEW,
            depth: MAIN_DEPTH_VIEW,
            width: self.width,
            height: self.height,
        }
    }

    fn max_texture_dimension(&self) -> u32 {
        8192
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
            self.create_output_textures();
        }
        Ok(())
    }

    fn create_buffer_init(
        &mut self,
        label: &str,
        kind: BufferKind,
        data: &[u8],
    ) -> Result<BufferHandle> {
        let handle = BufferHandle(self.next());
        log::trace!("Headless buffer '{}' ({} bytes)", label, data.len());
        self.buffers.insert(
            handle,
            HeadlessBuffer {
                kind,
                data: data.to_vec(),
            },
        );
        Ok(handle)
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        let max = self.max_texture_dimension();
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(RenderError::creation(&desc.label, "zero-sized texture"));
        }
        if desc.width > max || desc.height > max {
            return Err(RenderError::creation(
                &desc.label,
                format!("{}x{} exceeds {}", desc.width, desc.height, max),
            ));
        }
        let handle = TextureHandle(self.next());
        self.textures
            .insert(handle, HeadlessTexture::new(desc.clone()));
        Ok(handle)
    }

    fn write_texture(&mut self, texture: TextureHandle, layer: u32, data: &[u8]) -> Result<()> {
        let texture = self
            .textures
            .get_mut(&texture)
            .ok_or(RenderError::UnknownHandle("texture"))?;
        let desc = &texture.desc;
        let expected = (desc.width * desc.height * desc.format.bytes_per_texel()) as usize;
        if data.len() != expected || desc.format.is_depth() {
            return Err(RenderError::creation(
                &desc.label,
                format!("expected {} bytes of color data, got {}", expected, data.len()),
            ));
        }
        let target = texture
            .layers
            .get_mut(layer as usize)
            .ok_or_else(|| RenderError::creation(&desc.label, "layer out of range"))?;
        if desc.format.bytes_per_texel() == 4 {
            for (texel, rgba) in target.iter_mut().zip(data.chunks_exact(4)) {
                *texel = Vec4::new(
                    rgba[0] as f32 / 255.0,
                    rgba[1] as f32 / 255.0,
                    rgba[2] as f32 / 255.0,
                    rgba[3] as f32 / 255.0,
                );
            }
        }
        Ok(())
    }

    fn create_view(&mut self, texture: TextureHandle, kind: ViewKind) -> Result<TextureViewHandle> {
        let desc = &self
            .textures
            .get(&texture)
            .ok_or(RenderError::UnknownHandle("texture"))?
            .desc;
        let allowed = match kind {
            ViewKind::RenderTarget => desc.usage.contains(TextureUsage::RENDER_TARGET),
            ViewKind::DepthStencil => desc.usage.contains(TextureUsage::DEPTH_STENCIL),
            ViewKind::ShaderResource(_) => desc.usage.contains(TextureUsage::SHADER_RESOURCE),
        };
        if !allowed {
            return Err(RenderError::creation(
                &desc.label,
                format!("texture usage does not allow a {:?} view", kind),
            ));
        }
        let handle = TextureViewHandle(self.next());
        self.views
            .insert(handle, HeadlessView { texture, kind });
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
        self.views.retain(|_, v| v.texture != texture);
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerHandle> {
        let handle = SamplerHandle(self.next());
        self.samplers.insert(handle, desc.clone());
        Ok(handle)
    }

    fn create_rasterizer_state(&mut self, desc: &RasterizerDesc) -> Result<RasterizerHandle> {
        let handle = RasterizerHandle(self.next());
        self.rasterizers.insert(handle, *desc);
        Ok(handle)
    }

    fn create_depth_stencil_state(
        &mut self,
        desc: &DepthStencilDesc,
    ) -> Result<DepthStencilHandle> {
        let handle = DepthStencilHandle(self.next());
        self.depth_states.insert(handle, *desc);
        Ok(handle)
    }

    fn create_shader(&mut self, desc: &ShaderDesc) -> Result<ShaderHandle> {
        let handle = ShaderHandle(self.next());
        self.shaders.insert(handle, desc.clone());
        Ok(handle)
    }

    fn clear_render_target(&mut self, view: TextureViewHandle, color: [f32; 4]) {
        self.record(RecordedCommand::ClearRenderTarget { view, color });
        self.fill_view(view, Vec4::from(color));
    }

    fn clear_depth(&mut self, view: TextureViewHandle, depth: f32) {
        self.record(RecordedCommand::ClearDepth { view, depth });
        self.fill_view(view, Vec4::new(depth, 0.0, 0.0, 0.0));
    }

    fn set_render_targets(
        &mut self,
        color: Option<TextureViewHandle>,
        depth: Option<TextureViewHandle>,
    ) {
        self.record(RecordedCommand::SetRenderTargets { color, depth });
        self.state.color_target = color;
        self.state.depth_target = depth;
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.record(RecordedCommand::SetViewport(viewport));
        self.state.viewport = viewport;
    }

    fn set_rasterizer_state(&mut self, state: Option<RasterizerHandle>) {
        self.record(RecordedCommand::SetRasterizerState(state));
        self.state.rasterizer = state;
    }

    fn set_depth_stencil_state(&mut self, state: Option<DepthStencilHandle>) {
        self.record(RecordedCommand::SetDepthStencilState(state));
        self.state.depth_stencil = state;
    }

    fn set_shader(&mut self, stage: ShaderStage, shader: Option<ShaderHandle>) {
        self.record(RecordedCommand::SetShader { stage, shader });
        match stage {
            ShaderStage::Vertex => self.state.vertex_shader = shader,
            ShaderStage::Pixel => self.state.pixel_shader = shader,
        }
    }

    fn set_uniforms(&mut self, stage: ShaderStage, data: &[u8]) {
        self.record(RecordedCommand::SetUniforms {
            stage,
            size: data.len(),
        });
        match stage {
            ShaderStage::Vertex => self.state.vertex_uniforms = data.to_vec(),
            ShaderStage::Pixel => self.state.pixel_uniforms = data.to_vec(),
        }
    }

    fn set_texture(&mut self, stage: ShaderStage, slot: u32, view: Option<TextureViewHandle>) {
        self.record(RecordedCommand::SetTexture { stage, slot, view });
        let slots = match stage {
            ShaderStage::Vertex => &mut self.state.vertex_textures,
            ShaderStage::Pixel => &mut self.state.pixel_textures,
        };
        match view {
            Some(view) => slots.insert(slot, view),
            None => slots.remove(&slot),
        };
    }

    fn set_sampler(&mut self, stage: ShaderStage, slot: u32, sampler: Option<SamplerHandle>) {
        self.record(RecordedCommand::SetSampler {
            stage,
            slot,
            sampler,
        });
        let slots = match stage {
            ShaderStage::Vertex => &mut self.state.vertex_samplers,
            ShaderStage::Pixel => &mut self.state.pixel_samplers,
        };
        match sampler {
            Some(sampler) => slots.insert(slot, sampler),
            None => slots.remove(&slot),
        };
    }

    fn draw_indexed(&mut self, vertices: BufferHandle, indices: BufferHandle, index_count: u32) {
        self.record(RecordedCommand::Draw {
            color_target: self.state.color_target,
            depth_target: self.state.depth_target,
            vertex_shader: self.state.vertex_shader,
            pixel_shader: self.state.pixel_shader,
            count: index_count,
        });
        self.rasterize_depth(vertices, indices, index_count);
    }

    fn draw(&mut self, vertex_count: u32) {
        self.record(RecordedCommand::Draw {
            color_target: self.state.color_target,
            depth_target: self.state.depth_target,
            vertex_shader: self.state.vertex_shader,
            pixel_shader: self.state.pixel_shader,
            count: vertex_count,
        });
    }

    fn copy_texture_to_layer(
        &mut self,
        source: TextureHandle,
        destination: TextureHandle,
        layer: u32,
    ) {
        self.record(RecordedCommand::CopyTextureToLayer {
            source,
            destination,
            layer,
        });
        let Some(data) = self.textures.get(&source).and_then(|t| t.layers.first()).cloned() else {
            log::warn!("Copy from unknown texture {:?}", source);
            return;
        };
        match self
            .textures
            .get_mut(&destination)
            .and_then(|t| t.layers.get_mut(layer as usize))
        {
            Some(target) if target.len() == data.len() => *target = data,
            _ => log::warn!(
                "Copy into {:?} layer {} does not fit the source",
                destination,
                layer
            ),
        }
    }

    fn present(&mut self, _vsync: bool) -> Result<()> {
        self.record(RecordedCommand::Present);
        self.frame_start = self.commands.len();
        self.frames_presented += 1;
        Ok(())
    }

    /// Removes the frame's commands from the log. CPU-side texture contents
    /// written by its clears and draws are kept.
    fn discard_frame(&mut self) {
        self.commands.truncate(self.frame_start);
        self.frames_discarded += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::ViewDimension;

    #[test]
    fn starts_bound_to_the_output() {
        let backend = HeadlessBackend::new(320, 240);
        let output = backend.output();
        assert_eq!(backend.state().color_target, Some(output.color));
        assert_eq!(backend.state().depth_target, Some(output.depth));
        assert_eq!(backend.state().viewport, Viewport::new(320, 240));
    }

    #[test]
    fn copy_moves_depth_into_the_requested_layer() {
        let mut backend = HeadlessBackend::new(8, 8);
        let usage = TextureUsage::DEPTH_STENCIL | TextureUsage::COPY_SRC;
        let source = backend
            .create_texture(&TextureDesc::new("src", 4, 4, TextureFormat::Depth32Float, usage))
            .unwrap();
        let array = backend
            .create_texture(
                &TextureDesc::new(
                    "dst",
                    4,
                    4,
                    TextureFormat::Depth32Float,
                    TextureUsage::COPY_DST | TextureUsage::SHADER_RESOURCE,
                )
                .layers(2),
            )
            .unwrap();
        let dsv = backend.create_view(source, ViewKind::DepthStencil).unwrap();

        backend.clear_depth(dsv, 0.25);
        backend.copy_texture_to_layer(source, array, 1);

        assert!(backend.depth_texels(array, 0).unwrap().iter().all(|d| *d == 0.0));
        assert!(backend.depth_texels(array, 1).unwrap().iter().all(|d| *d == 0.25));
    }

    #[test]
    fn views_respect_texture_usage() {
        let mut backend = HeadlessBackend::new(8, 8);
        let texture = backend
            .create_texture(&TextureDesc::new(
                "color",
                2,
                2,
                TextureFormat::Rgba8Unorm,
                TextureUsage::SHADER_RESOURCE,
            ))
            .unwrap();
        assert!(backend.create_view(texture, ViewKind::DepthStencil).is_err());
        assert!(
            backend
                .create_view(texture, ViewKind::ShaderResource(ViewDimension::D2))
                .is_ok()
        );
    }

    #[test]
    fn rejects_zero_sized_textures() {
        let mut backend = HeadlessBackend::new(8, 8);
        let desc = TextureDesc::new(
            "empty",
            0,
            0,
            TextureFormat::Depth32Float,
            TextureUsage::DEPTH_STENCIL,
        );
        assert!(matches!(
            backend.create_texture(&desc),
            Err(RenderError::ResourceCreation { .. })
        ));
    }

    #[test]
    fn discard_drops_only_the_unpresented_frame() {
        let mut backend = HeadlessBackend::new(8, 8);
        let output = backend.output();
        backend.clear_depth(output.depth, 1.0);
        backend.present(true).unwrap();
        let presented = backend.commands().len();

        backend.clear_depth(output.depth, 1.0);
        backend.set_viewport(Viewport::new(4, 4));
        assert_eq!(backend.pending_commands().len(), 2);
        backend.discard_frame();

        assert!(backend.pending_commands().is_empty());
        assert_eq!(backend.commands().len(), presented);
        assert_eq!(backend.frames_discarded(), 1);
        assert_eq!(backend.frames_presented(), 1);
    }
}
