//! [`RenderBackend`] on top of wgpu.
//!
//! wgpu has no immediate-mode context: state lives in pipelines and bind
//! groups, and output is grouped into render passes. Commands issued through
//! the trait are recorded and translated when the frame is presented:
//!
//! 1. **Resolve** walks the commands while tracking the bound state. Each
//!    clear becomes its own pass, runs of draws against the same targets are
//!    grouped into one pass, and every draw gets a cached pipeline (keyed by
//!    shaders, states and target formats). The uniform data current at each
//!    draw is packed into one persistent buffer and bound with a dynamic
//!    offset.
//! 2. **Encode** replays the resolved operations into a command encoder that
//!    is submitted before presenting.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;

use wgpu::util::DeviceExt;
use winit::window::Window;

use super::{
    BACK_BUFFER_VIEW, BufferHandle, BufferKind, CompareFunction, CullMode, DepthStencilDesc,
    DepthStencilHandle, FIRST_USER_ID, GpuContext, MAIN_DEPTH_VIEW, OutputTargets,
    RasterizerDesc, RasterizerHandle, RenderBackend, SamplerDesc, SamplerHandle, ShaderHandle,
    ShaderStage, TextureDesc, TextureFormat, TextureHandle, TextureUsage, TextureViewHandle,
    ViewDimension, ViewKind, Viewport,
};
use crate::error::{RenderError, Result};
use crate::mesh::Vertex3d;
use crate::shader::{ResourceKind, ShaderDesc, VertexInput};

const MAIN_DEPTH_TEXTURE: TextureHandle = TextureHandle(1);
const INITIAL_UNIFORM_CAPACITY: u64 = 64 * 1024;

/// Vertex and optional pixel shader of a pipeline.
type ProgramKey = (ShaderHandle, Option<ShaderHandle>);

/// Recorded trait call, replayed at present.
enum Command {
    ClearColor(TextureViewHandle, [f32; 4]),
    ClearDepth(TextureViewHandle, f32),
    Targets(Option<TextureViewHandle>, Option<TextureViewHandle>),
    Viewport(Viewport),
    Rasterizer(Option<RasterizerHandle>),
    DepthStencil(Option<DepthStencilHandle>),
    Shader(ShaderStage, Option<ShaderHandle>),
    Uniforms(ShaderStage, Vec<u8>),
    Texture(ShaderStage, u32, Option<TextureViewHandle>),
    Sampler(ShaderStage, u32, Option<SamplerHandle>),
    DrawIndexed(BufferHandle, BufferHandle, u32),
    Draw(u32),
    Copy(TextureHandle, TextureHandle, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    vertex: ShaderHandle,
    pixel: Option<ShaderHandle>,
    rasterizer: Option<RasterizerHandle>,
    depth_stencil: Option<DepthStencilHandle>,
    color_format: Option<wgpu::TextureFormat>,
    depth_format: Option<wgpu::TextureFormat>,
}

enum Geometry {
    Indexed(BufferHandle, BufferHandle, u32),
    Vertices(u32),
}

/// One stage's slice of the uniform buffer for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UniformSlice {
    stage: ShaderStage,
    size: u32,
    offset: u32,
}

struct ResolvedDraw {
    pipeline: PipelineKey,
    viewport: Viewport,
    /// Bind groups 0 and 1, in group order.
    uniforms: Vec<UniformSlice>,
    /// Bind group 2.
    resources: Option<wgpu::BindGroup>,
    geometry: Geometry,
}

enum Op {
    ClearColor(TextureViewHandle, [f32; 4]),
    ClearDepth(TextureViewHandle, f32),
    Pass {
        color: Option<TextureViewHandle>,
        depth: Option<TextureViewHandle>,
        draws: Vec<ResolvedDraw>,
    },
    Copy(TextureHandle, TextureHandle, u32),
}

/// Bound state while resolving a frame.
struct ReplayState {
    color: Option<TextureViewHandle>,
    depth: Option<TextureViewHandle>,
    viewport: Viewport,
    rasterizer: Option<RasterizerHandle>,
    depth_stencil: Option<DepthStencilHandle>,
    vertex: Option<ShaderHandle>,
    pixel: Option<ShaderHandle>,
    vertex_uniforms: Vec<u8>,
    pixel_uniforms: Vec<u8>,
    textures: HashMap<u32, TextureViewHandle>,
    samplers: HashMap<u32, SamplerHandle>,
}

struct WgpuTexture {
    texture: wgpu::Texture,
    desc: TextureDesc,
}

struct WgpuView {
    view: wgpu::TextureView,
    texture: TextureHandle,
    format: wgpu::TextureFormat,
}

struct WgpuShader {
    module: wgpu::ShaderModule,
    desc: ShaderDesc,
}

struct ProgramLayout {
    groups: Vec<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
}

/// A frame's uniform blocks, packed at the device's offset alignment.
#[derive(Debug)]
struct UniformStaging {
    alignment: u32,
    bytes: Vec<u8>,
}

impl UniformStaging {
    fn new(alignment: u32) -> Self {
        Self {
            alignment: alignment.max(1),
            bytes: Vec::new(),
        }
    }

    fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Append `data`, zero-padded or cut to `size`, and return its offset.
    fn push(&mut self, data: &[u8], size: u32) -> u32 {
        let offset = self.bytes.len().next_multiple_of(self.alignment as usize);
        let end = offset + size as usize;
        self.bytes.resize(offset, 0);
        self.bytes
            .extend_from_slice(&data[..data.len().min(size as usize)]);
        self.bytes.resize(end, 0);
        offset as u32
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Persistent uniform buffer reused every frame, grown when a frame needs more.
struct UniformRing {
    buffer: wgpu::Buffer,
    capacity: u64,
    staging: UniformStaging,
    /// Bind groups over `buffer`, one per program and stage.
    bind_groups: HashMap<(ProgramKey, ShaderStage), wgpu::BindGroup>,
}

impl UniformRing {
    fn new(device: &wgpu::Device) -> Self {
        let alignment = device.limits().min_uniform_buffer_offset_alignment;
        Self {
            buffer: uniform_buffer(device, INITIAL_UNIFORM_CAPACITY),
            capacity: INITIAL_UNIFORM_CAPACITY,
            staging: UniformStaging::new(alignment),
            bind_groups: HashMap::new(),
        }
    }

    /// Copy this frame's staged uniforms to the GPU.
    fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        let copy_len = self
            .staging
            .bytes
            .len()
            .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT as usize);
        self.staging.bytes.resize(copy_len, 0);
        if self.staging.len() > self.capacity {
            let capacity = self.staging.len().next_power_of_two();
            log::debug!("Growing uniform buffer to {} bytes", capacity);
            self.buffer = uniform_buffer(device, capacity);
            self.capacity = capacity;
            self.bind_groups.clear();
        }
        if !self.staging.bytes.is_empty() {
            queue.write_buffer(&self.buffer, 0, &self.staging.bytes);
        }
    }

    fn bind_group(
        &mut self,
        device: &wgpu::Device,
        program: ProgramKey,
        slice: UniformSlice,
        layout: &wgpu::BindGroupLayout,
    ) {
        let buffer = &self.buffer;
        self.bind_groups
            .entry((program, slice.stage))
            .or_insert_with(|| {
                let binding = NonZeroU64::new(slice.size as u64).map(|size| {
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer,
                            offset: 0,
                            size: Some(size),
                        }),
                    }
                });
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Uniforms Bind Group"),
                    layout,
                    entries: binding.as_slice(),
                })
            });
    }
}

/// Views and samplers bound in place of missing resources.
struct Fallbacks {
    white: wgpu::TextureView,
    white_array: wgpu::TextureView,
    white_cube: wgpu::TextureView,
    depth: wgpu::TextureView,
    depth_array: wgpu::TextureView,
    sampler: wgpu::Sampler,
    comparison: wgpu::Sampler,
}

/// Renders to a window surface through wgpu.
pub struct WgpuBackend {
    gpu: GpuContext,
    next_id: u64,
    buffers: HashMap<BufferHandle, wgpu::Buffer>,
    textures: HashMap<TextureHandle, WgpuTexture>,
    views: HashMap<TextureViewHandle, WgpuView>,
    samplers: HashMap<SamplerHandle, wgpu::Sampler>,
    rasterizers: HashMap<RasterizerHandle, RasterizerDesc>,
    depth_states: HashMap<DepthStencilHandle, DepthStencilDesc>,
    shaders: HashMap<ShaderHandle, WgpuShader>,
    layouts: HashMap<ProgramKey, ProgramLayout>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    commands: Vec<Command>,
    uniforms: UniformRing,
    fallbacks: Fallbacks,
}

impl WgpuBackend {
    pub fn new(window: Arc<Window>, vsync: bool) -> Result<Self> {
        let gpu = GpuContext::new(window, vsync)?;
        let fallbacks = Fallbacks::new(&gpu);
        let uniforms = UniformRing::new(&gpu.device);
        let mut backend = Self {
            gpu,
            next_id: FIRST_USER_ID,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            samplers: HashMap::new(),
            rasterizers: HashMap::new(),
            depth_states: HashMap::new(),
            shaders: HashMap::new(),
            layouts: HashMap::new(),
            pipelines: HashMap::new(),
            commands: Vec::new(),
            uniforms,
            fallbacks,
        };
        backend.create_main_depth();
        Ok(backend)
    }

    /// The underlying wgpu context.
    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn create_main_depth(&mut self) {
        let desc = TextureDesc::new(
            "Main Depth",
            self.gpu.width(),
            self.gpu.height(),
            TextureFormat::Depth32Float,
            TextureUsage::DEPTH_STENCIL,
        );
        let texture = self.gpu.device.create_texture(&texture_descriptor(&desc));
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.views.insert(
            MAIN_DEPTH_VIEW,
            WgpuView {
                view,
                texture: MAIN_DEPTH_TEXTURE,
                format: wgpu::TextureFormat::Depth32Float,
            },
        );
        self.textures
            .insert(MAIN_DEPTH_TEXTURE, WgpuTexture { texture, desc });
    }

    /// Run `create` inside a validation error scope.
    fn scoped<T>(&self, label: &str, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T> {
        self.gpu
            .device
            .push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.gpu.device);
        match pollster::block_on(self.gpu.device.pop_error_scope()) {
            Some(error) => Err(RenderError::creation(label, error)),
            None => Ok(value),
        }
    }

    fn view_format(&self, view: TextureViewHandle) -> Option<wgpu::TextureFormat> {
        if view == BACK_BUFFER_VIEW {
            Some(self.gpu.config.format)
        } else {
            self.views.get(&view).map(|v| v.format)
        }
    }

    fn program_layout(&mut self, vertex: ShaderHandle, pixel: Option<ShaderHandle>) -> bool {
        if self.layouts.contains_key(&(vertex, pixel)) {
            return true;
        }
        let Some(vs) = self.shaders.get(&vertex) else {
            return false;
        };
        let device = &self.gpu.device;

        let mut groups = vec![uniform_group_layout(
            device,
            "Vertex Uniforms Layout",
            vs.desc.uniforms.size(),
            wgpu::ShaderStages::VERTEX,
        )];
        if let Some(ps) = pixel.and_then(|p| self.shaders.get(&p)) {
            groups.push(uniform_group_layout(
                device,
                "Pixel Uniforms Layout",
                ps.desc.uniforms.size(),
                wgpu::ShaderStages::FRAGMENT,
            ));
            let entries: Vec<_> = ps
                .desc
                .resources
                .iter()
                .map(|slot| wgpu::BindGroupLayoutEntry {
                    binding: slot.binding,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: binding_type(slot.kind),
                    count: None,
                })
                .collect();
            groups.push(
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Pixel Resources Layout"),
                    entries: &entries,
                }),
            );
        }

        let refs: Vec<&wgpu::BindGroupLayout> = groups.iter().collect();
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} Pipeline Layout", vs.desc.label)),
            bind_group_layouts: &refs,
            push_constant_ranges: &[],
        });
        self.layouts.insert(
            (vertex, pixel),
            ProgramLayout {
                groups,
                pipeline_layout,
            },
        );
        true
    }

    fn pipeline(&mut self, key: PipelineKey) -> bool {
        if self.pipelines.contains_key(&key) {
            return true;
        }
        if !self.program_layout(key.vertex, key.pixel) {
            return false;
        }
        let (Some(layout), Some(vs)) = (
            self.layouts.get(&(key.vertex, key.pixel)),
            self.shaders.get(&key.vertex),
        ) else {
            return false;
        };
        let ps = key.pixel.and_then(|p| self.shaders.get(&p));
        let raster = key
            .rasterizer
            .and_then(|r| self.rasterizers.get(&r))
            .copied()
            .unwrap_or_default();
        let depth_state = key
            .depth_stencil
            .and_then(|d| self.depth_states.get(&d))
            .copied()
            .unwrap_or_default();

        let vertex_buffers: &[wgpu::VertexBufferLayout] = match vs.desc.vertex_input {
            VertexInput::Mesh => &[Vertex3d::LAYOUT],
            VertexInput::None => &[],
        };
        let color_targets = [key.color_format.map(|format| wgpu::ColorTargetState {
            format,
            blend: Some(wgpu::BlendState::REPLACE),
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let targets: &[Option<wgpu::ColorTargetState>] = if key.color_format.is_some() {
            &color_targets
        } else {
            &[]
        };
        let label = match ps {
            Some(ps) => format!("{} + {} Pipeline", vs.desc.label, ps.desc.label),
            None => format!("{} Depth-Only Pipeline", vs.desc.label),
        };

        let created = self.scoped(&label, |device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&label),
                layout: Some(&layout.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vs.module,
                    entry_point: Some(&vs.desc.entry_point),
                    buffers: vertex_buffers,
                    compilation_options: Default::default(),
                },
                fragment: ps.map(|ps| wgpu::FragmentState {
                    module: &ps.module,
                    entry_point: Some(&ps.desc.entry_point),
                    targets,
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    // Left-handed projection: outward faces wind clockwise on screen.
                    front_face: wgpu::FrontFace::Cw,
                    cull_mode: match raster.cull_mode {
                        CullMode::None => None,
                        CullMode::Front => Some(wgpu::Face::Front),
                        CullMode::Back => Some(wgpu::Face::Back),
                    },
                    ..Default::default()
                },
                depth_stencil: key.depth_format.map(|format| wgpu::DepthStencilState {
                    format,
                    depth_write_enabled: depth_state.depth_write,
                    depth_compare: compare_function(depth_state.depth_compare),
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState {
                        constant: raster.depth_bias,
                        slope_scale: raster.slope_scaled_depth_bias,
                        clamp: 0.0,
                    },
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        });

        match created {
            Ok(pipeline) => {
                log::debug!("Created pipeline '{}'", label);
                self.pipelines.insert(key, pipeline);
                true
            }
            Err(e) => {
                log::error!("{}", e);
                false
            }
        }
    }

    fn resource_bind_group(
        &self,
        layout: &wgpu::BindGroupLayout,
        pixel: &ShaderDesc,
        state: &ReplayState,
    ) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry> = pixel
            .resources
            .iter()
            .map(|slot| {
                let resource = match slot.kind {
                    ResourceKind::Sampler | ResourceKind::ComparisonSampler => {
                        let sampler = state
                            .samplers
                            .get(&slot.binding)
                            .and_then(|s| self.samplers.get(s))
                            .unwrap_or_else(|| self.fallbacks.sampler(slot.kind));
                        wgpu::BindingResource::Sampler(sampler)
                    }
                    ResourceKind::Texture(_) | ResourceKind::DepthTexture(_) => {
                        let view = state
                            .textures
                            .get(&slot.binding)
                            .and_then(|v| self.views.get(v))
                            .map(|v| &v.view)
                            .unwrap_or_else(|| self.fallbacks.view(slot.kind));
                        wgpu::BindingResource::TextureView(view)
                    }
                };
                wgpu::BindGroupEntry {
                    binding: slot.binding,
                    resource,
                }
            })
            .collect();
        self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Resources", pixel.label)),
            layout,
            entries: &entries,
        })
    }

    fn resolve_draw(&mut self, state: &ReplayState, geometry: Geometry) -> Option<ResolvedDraw> {
        let Some(vertex) = state.vertex else {
            log::warn!("Draw skipped: no vertex shader bound");
            return None;
        };
        let key = PipelineKey {
            vertex,
            pixel: state.pixel,
            rasterizer: state.rasterizer,
            depth_stencil: state.depth_stencil,
            color_format: state.color.and_then(|v| self.view_format(v)),
            depth_format: state.depth.and_then(|v| self.view_format(v)),
        };
        if !self.pipeline(key) {
            return None;
        }

        let layout = self.layouts.get(&(vertex, state.pixel))?;
        let vs = &self.shaders.get(&vertex)?.desc;
        let size = vs.uniforms.size();
        let mut uniforms = vec![UniformSlice {
            stage: ShaderStage::Vertex,
            size,
            offset: self.uniforms.staging.push(&state.vertex_uniforms, size),
        }];
        let mut resources = None;
        if let Some(ps) = state.pixel.and_then(|p| self.shaders.get(&p)) {
            let size = ps.desc.uniforms.size();
            uniforms.push(UniformSlice {
                stage: ShaderStage::Pixel,
                size,
                offset: self.uniforms.staging.push(&state.pixel_uniforms, size),
            });
            resources = Some(self.resource_bind_group(&layout.groups[2], &ps.desc, state));
        }

        Some(ResolvedDraw {
            pipeline: key,
            viewport: state.viewport,
            uniforms,
            resources,
            geometry,
        })
    }

    /// Upload the staged uniforms and make sure every draw's uniform bind
    /// groups exist over the current buffer.
    fn prepare_uniforms(&mut self, ops: &[Op]) {
        let device = &self.gpu.device;
        self.uniforms.upload(device, &self.gpu.queue);
        let draws = ops.iter().flat_map(|op| match op {
            Op::Pass { draws, .. } => draws.as_slice(),
            _ => &[],
        });
        for draw in draws {
            let program = (draw.pipeline.vertex, draw.pipeline.pixel);
            let Some(layout) = self.layouts.get(&program) else {
                continue;
            };
            for (group, slice) in draw.uniforms.iter().enumerate() {
                self.uniforms
                    .bind_group(device, program, *slice, &layout.groups[group]);
            }
        }
    }

    fn resolve(&mut self, commands: Vec<Command>) -> Vec<Op> {
        self.uniforms.staging.clear();
        let mut state = ReplayState {
            color: Some(BACK_BUFFER_VIEW),
            depth: Some(MAIN_DEPTH_VIEW),
            viewport: self.output().viewport(),
            rasterizer: None,
            depth_stencil: None,
            vertex: None,
            pixel: None,
            vertex_uniforms: Vec::new(),
            pixel_uniforms: Vec::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
        };
        let mut ops = Vec::new();

        for command in commands {
            match command {
                Command::ClearColor(view, color) => ops.push(Op::ClearColor(view, color)),
                Command::ClearDepth(view, depth) => ops.push(Op::ClearDepth(view, depth)),
                Command::Copy(source, destination, layer) => {
                    ops.push(Op::Copy(source, destination, layer))
                }
                Command::Targets(color, depth) => {
                    state.color = color;
                    state.depth = depth;
                }
                Command::Viewport(viewport) => state.viewport = viewport,
                Command::Rasterizer(rasterizer) => state.rasterizer = rasterizer,
                Command::DepthStencil(depth_stencil) => state.depth_stencil = depth_stencil,
                Command::Shader(ShaderStage::Vertex, shader) => state.vertex = shader,
                Command::Shader(ShaderStage::Pixel, shader) => state.pixel = shader,
                Command::Uniforms(ShaderStage::Vertex, data) => state.vertex_uniforms = data,
                Command::Uniforms(ShaderStage::Pixel, data) => state.pixel_uniforms = data,
                Command::Texture(ShaderStage::Pixel, slot, view) => match view {
                    Some(view) => {
                        state.textures.insert(slot, view);
                    }
                    None => {
                        state.textures.remove(&slot);
                    }
                },
                Command::Sampler(ShaderStage::Pixel, slot, sampler) => match sampler {
                    Some(sampler) => {
                        state.samplers.insert(slot, sampler);
                    }
                    None => {
                        state.samplers.remove(&slot);
                    }
                },
                Command::Texture(ShaderStage::Vertex, ..)
                | Command::Sampler(ShaderStage::Vertex, ..) => {
                    log::trace!("Vertex-stage resources are not bound on wgpu");
                }
                Command::DrawIndexed(vertices, indices, count) => {
                    let geometry = Geometry::Indexed(vertices, indices, count);
                    if let Some(draw) = self.resolve_draw(&state, geometry) {
                        push_draw(&mut ops, &state, draw);
                    }
                }
                Command::Draw(count) => {
                    if let Some(draw) = self.resolve_draw(&state, Geometry::Vertices(count)) {
                        push_draw(&mut ops, &state, draw);
                    }
                }
            }
        }
        ops
    }

    fn target_view<'a>(
        &'a self,
        view: TextureViewHandle,
        surface: &'a wgpu::TextureView,
    ) -> Option<&'a wgpu::TextureView> {
        if view == BACK_BUFFER_VIEW {
            Some(surface)
        } else {
            self.views.get(&view).map(|v| &v.view)
        }
    }

    fn encode(&self, ops: &[Op], surface: &wgpu::TextureView) -> wgpu::CommandBuffer {
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        for op in ops {
            match op {
                Op::ClearColor(view, color) => {
                    let Some(view) = self.target_view(*view, surface) else {
                        continue;
                    };
                    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("Clear Color"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(wgpu::Color {
                                    r: color[0] as f64,
                                    g: color[1] as f64,
                                    b: color[2] as f64,
                                    a: color[3] as f64,
                                }),
                                store: wgpu::StoreOp::Store,
                            },
                            depth_slice: None,
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                }
                Op::ClearDepth(view, depth) => {
                    let Some(view) = self.target_view(*view, surface) else {
                        continue;
                    };
                    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("Clear Depth"),
                        color_attachments: &[],
                        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                            view,
                            depth_ops: Some(wgpu::Operations {
                                load: wgpu::LoadOp::Clear(*depth),
                                store: wgpu::StoreOp::Store,
                            }),
                            stencil_ops: None,
                        }),
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                }
                Op::Pass { color, depth, draws } => {
                    let color_view = color.and_then(|v| self.target_view(v, surface));
                    let depth_view = depth.and_then(|v| self.target_view(v, surface));
                    let attachments = [color_view.map(|view| {
                        wgpu::RenderPassColorAttachment {
                            view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Load,
                                store: wgpu::StoreOp::Store,
                            },
                            depth_slice: None,
                        }
                    })];
                    let color_attachments: &[Option<wgpu::RenderPassColorAttachment>] =
                        if color_view.is_some() { &attachments } else { &[] };
                    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("Draw Pass"),
                        color_attachments,
                        depth_stencil_attachment: depth_view.map(|view| {
                            wgpu::RenderPassDepthStencilAttachment {
                                view,
                                depth_ops: Some(wgpu::Operations {
                                    load: wgpu::LoadOp::Load,
                                    store: wgpu::StoreOp::Store,
                                }),
                                stencil_ops: None,
                            }
                        }),
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    for draw in draws {
                        self.encode_draw(&mut pass, draw);
                    }
                }
                Op::Copy(source, destination, layer) => {
                    let (Some(src), Some(dst)) =
                        (self.textures.get(source), self.textures.get(destination))
                    else {
                        log::warn!("Copy between unknown textures skipped");
                        continue;
                    };
                    encoder.copy_texture_to_texture(
                        wgpu::TexelCopyTextureInfo {
                            texture: &src.texture,
                            mip_level: 0,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        wgpu::TexelCopyTextureInfo {
                            texture: &dst.texture,
                            mip_level: 0,
                            origin: wgpu::Origin3d {
                                x: 0,
                                y: 0,
                                z: *layer,
                            },
                            aspect: wgpu::TextureAspect::All,
                        },
                        wgpu::Extent3d {
                            width: src.desc.width,
                            height: src.desc.height,
                            depth_or_array_layers: 1,
                        },
                    );
                }
            }
        }
        encoder.finish()
    }

    fn encode_draw(&self, pass: &mut wgpu::RenderPass<'_>, draw: &ResolvedDraw) {
        let Some(pipeline) = self.pipelines.get(&draw.pipeline) else {
            return;
        };
        let v = draw.viewport;
        pass.set_pipeline(pipeline);
        pass.set_viewport(v.x, v.y, v.width, v.height, v.min_depth, v.max_depth);
        let program = (draw.pipeline.vertex, draw.pipeline.pixel);
        for (index, slice) in draw.uniforms.iter().enumerate() {
            let Some(group) = self.uniforms.bind_groups.get(&(program, slice.stage)) else {
                return;
            };
            let offsets = if slice.size > 0 {
                std::slice::from_ref(&slice.offset)
            } else {
                &[]
            };
            pass.set_bind_group(index as u32, group, offsets);
        }
        if let Some(resources) = &draw.resources {
            pass.set_bind_group(draw.uniforms.len() as u32, resources, &[]);
        }
        match draw.geometry {
            Geometry::Indexed(vertices, indices, count) => {
                let (Some(vb), Some(ib)) = (self.buffers.get(&vertices), self.buffers.get(&indices))
                else {
                    return;
                };
                pass.set_vertex_buffer(0, vb.slice(..));
                pass.set_index_buffer(ib.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..count, 0, 0..1);
            }
            Geometry::Vertices(count) => pass.draw(0..count, 0..1),
        }
    }
}

/// Append a draw, opening a new pass when the targets changed.
fn push_draw(ops: &mut Vec<Op>, state: &ReplayState, draw: ResolvedDraw) {
    if let Some(Op::Pass { color, depth, draws }) = ops.last_mut() {
        if *color == state.color && *depth == state.depth {
            draws.push(draw);
            return;
        }
    }
    ops.push(Op::Pass {
        color: state.color,
        depth: state.depth,
        draws: vec![draw],
    });
}

impl RenderBackend for WgpuBackend {
    fn output(&self) -> OutputTargets {
        OutputTargets {
            color: BACK_BUFFER_VIEW,
            depth: MAIN_DEPTH_VIEW,
            width: self.gpu.width(),
            height: self.gpu.height(),
        }
    }

    fn max_texture_dimension(&self) -> u32 {
        self.gpu.device.limits().max_texture_dimension_2d
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width > 0 && height > 0 {
            self.gpu.resize(width, height);
            self.create_main_depth();
        }
        Ok(())
    }

    fn create_buffer_init(
        &mut self,
        label: &str,
        kind: BufferKind,
        data: &[u8],
    ) -> Result<BufferHandle> {
        let usage = match kind {
            BufferKind::Vertex { .. } => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
        };
        let buffer = self.scoped(label, |device| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: data,
                usage,
            })
        })?;
        let handle = BufferHandle(self.next());
        self.buffers.insert(handle, buffer);
        Ok(handle)
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle> {
        let max = self.max_texture_dimension();
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(RenderError::creation(
                &desc.label,
                format!("{}x{} is outside 1..={}", desc.width, desc.height, max),
            ));
        }
        let texture = self.scoped(&desc.label, |device| {
            device.create_texture(&texture_descriptor(desc))
        })?;
        log::trace!(
            "Created texture '{}' {}x{}x{}",
            desc.label,
            desc.width,
            desc.height,
            desc.layers
        );
        let handle = TextureHandle(self.next());
        self.textures.insert(
            handle,
            WgpuTexture {
                texture,
                desc: desc.clone(),
            },
        );
        Ok(handle)
    }

    fn write_texture(&mut self, texture: TextureHandle, layer: u32, data: &[u8]) -> Result<()> {
        let texture = self
            .textures
            .get(&texture)
            .ok_or(RenderError::UnknownHandle("texture"))?;
        let desc = &texture.desc;
        let bytes_per_row = desc.width * desc.format.bytes_per_texel();
        if data.len() != (bytes_per_row * desc.height) as usize || layer >= desc.layers {
            return Err(RenderError::creation(
                &desc.label,
                "texel data does not match the texture",
            ));
        }
        self.gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn create_view(&mut self, texture: TextureHandle, kind: ViewKind) -> Result<TextureViewHandle> {
        let source = self
            .textures
            .get(&texture)
            .ok_or(RenderError::UnknownHandle("texture"))?;
        let (dimension, layer_count) = match kind {
            ViewKind::RenderTarget | ViewKind::DepthStencil => {
                (wgpu::TextureViewDimension::D2, Some(1))
            }
            ViewKind::ShaderResource(dimension) => (view_dimension(dimension), None),
        };
        let label = format!("{} {:?} View", source.desc.label, kind);
        let view = self.scoped(&label, |_| {
            source.texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(&label),
                dimension: Some(dimension),
                array_layer_count: layer_count,
                ..Default::default()
            })
        })?;
        let format = texture_format(source.desc.format);
        let handle = TextureViewHandle(self.next());
        self.views.insert(
            handle,
            WgpuView {
                view,
                texture,
                format,
            },
        );
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(removed) = self.textures.remove(&texture) {
            removed.texture.destroy();
        }
        self.views.retain(|_, v| v.texture != texture);
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerHandle> {
        let sampler = self.scoped(&desc.label, |device| {
            device.create_sampler(&sampler_descriptor(desc))
        })?;
        let handle = SamplerHandle(self.next());
        self.samplers.insert(handle, sampler);
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
        let module = self.scoped(&desc.label, |device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&desc.label),
                source: wgpu::ShaderSource::Wgsl(desc.source.clone()),
            })
        })?;
        let handle = ShaderHandle(self.next());
        self.shaders.insert(
            handle,
            WgpuShader {
                module,
                desc: desc.clone(),
            },
        );
        Ok(handle)
    }

    fn clear_render_target(&mut self, view: TextureViewHandle, color: [f32; 4]) {
        self.commands.push(Command::ClearColor(view, color));
    }

    fn clear_depth(&mut self, view: TextureViewHandle, depth: f32) {
        self.commands.push(Command::ClearDepth(view, depth));
    }

    fn set_render_targets(
        &mut self,
        color: Option<TextureViewHandle>,
        depth: Option<TextureViewHandle>,
    ) {
        self.commands.push(Command::Targets(color, depth));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.commands.push(Command::Viewport(viewport));
    }

    fn set_rasterizer_state(&mut self, state: Option<RasterizerHandle>) {
        self.commands.push(Command::Rasterizer(state));
    }

    fn set_depth_stencil_state(&mut self, state: Option<DepthStencilHandle>) {
        self.commands.push(Command::DepthStencil(state));
    }

    fn set_shader(&mut self, stage: ShaderStage, shader: Option<ShaderHandle>) {
        self.commands.push(Command::Shader(stage, shader));
    }

    fn set_uniforms(&mut self, stage: ShaderStage, data: &[u8]) {
        self.commands.push(Command::Uniforms(stage, data.to_vec()));
    }

    fn set_texture(&mut self, stage: ShaderStage, slot: u32, view: Option<TextureViewHandle>) {
        self.commands.push(Command::Texture(stage, slot, view));
    }

    fn set_sampler(&mut self, stage: ShaderStage, slot: u32, sampler: Option<SamplerHandle>) {
        self.commands.push(Command::Sampler(stage, slot, sampler));
    }

    fn draw_indexed(&mut self, vertices: BufferHandle, indices: BufferHandle, index_count: u32) {
        self.commands
            .push(Command::DrawIndexed(vertices, indices, index_count));
    }

    fn draw(&mut self, vertex_count: u32) {
        self.commands.push(Command::Draw(vertex_count));
    }

    fn copy_texture_to_layer(
        &mut self,
        source: TextureHandle,
        destination: TextureHandle,
        layer: u32,
    ) {
        self.commands.push(Command::Copy(source, destination, layer));
    }

    fn present(&mut self, vsync: bool) -> Result<()> {
        self.gpu.set_vsync(vsync);
        let commands = std::mem::take(&mut self.commands);

        let frame = match self.gpu.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(e @ (wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost)) => {
                self.gpu.reconfigure();
                return Err(RenderError::Surface(e.to_string()));
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(RenderError::DeviceLost),
            Err(e) => return Err(RenderError::Surface(e.to_string())),
        };
        let surface_view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let ops = self.resolve(commands);
        self.prepare_uniforms(&ops);
        let buffer = self.encode(&ops, &surface_view);
        self.gpu.queue.submit(std::iter::once(buffer));
        frame.present();
        Ok(())
    }

    fn discard_frame(&mut self) {
        log::debug!("Discarding {} recorded commands", self.commands.len());
        self.commands.clear();
    }
}

impl Fallbacks {
    fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;
        let color = |label: &str, layers: u32, dimension| {
            let texture = device.create_texture_with_data(
                &gpu.queue,
                &wgpu::TextureDescriptor {
                    label: Some(label),
                    size: wgpu::Extent3d {
                        width: 1,
                        height: 1,
                        depth_or_array_layers: layers,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8UnormSrgb,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                },
                wgpu::util::TextureDataOrder::LayerMajor,
                &vec![255u8; 4 * layers as usize],
            );
            texture.create_view(&wgpu::TextureViewDescriptor {
                dimension: Some(dimension),
                ..Default::default()
            })
        };
        let depth = |label: &str, dimension| {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Depth32Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            });
            texture.create_view(&wgpu::TextureViewDescriptor {
                dimension: Some(dimension),
                ..Default::default()
            })
        };

        Self {
            white: color("Fallback White", 1, wgpu::TextureViewDimension::D2),
            white_array: color("Fallback White Array", 1, wgpu::TextureViewDimension::D2Array),
            white_cube: color("Fallback White Cube", 6, wgpu::TextureViewDimension::Cube),
            depth: depth("Fallback Depth", wgpu::TextureViewDimension::D2),
            depth_array: depth("Fallback Depth Array", wgpu::TextureViewDimension::D2Array),
            sampler: device.create_sampler(&sampler_descriptor(&SamplerDesc::linear_wrap(
                "Fallback Sampler",
            ))),
            comparison: device.create_sampler(&sampler_descriptor(&SamplerDesc::comparison(
                "Fallback Comparison Sampler",
                CompareFunction::Less,
            ))),
        }
    }

    fn view(&self, kind: ResourceKind) -> &wgpu::TextureView {
        match kind {
            ResourceKind::Texture(ViewDimension::D2) => &self.white,
            ResourceKind::Texture(ViewDimension::D2Array) => &self.white_array,
            ResourceKind::Texture(ViewDimension::Cube) => &self.white_cube,
            ResourceKind::DepthTexture(ViewDimension::D2Array) => &self.depth_array,
            ResourceKind::DepthTexture(_) => &self.depth,
            ResourceKind::Sampler | ResourceKind::ComparisonSampler => &self.white,
        }
    }

    fn sampler(&self, kind: ResourceKind) -> &wgpu::Sampler {
        match kind {
            ResourceKind::ComparisonSampler => &self.comparison,
            _ => &self.sampler,
        }
    }
}

fn uniform_group_layout(
    device: &wgpu::Device,
    label: &str,
    size: u32,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayout {
    let entry = wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: NonZeroU64::new(size as u64),
        },
        count: None,
    };
    let entries: &[wgpu::BindGroupLayoutEntry] = if size > 0 { &[entry] } else { &[] };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries,
    })
}

fn uniform_buffer(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Frame Uniforms"),
        size,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn binding_type(kind: ResourceKind) -> wgpu::BindingType {
    match kind {
        ResourceKind::Texture(dimension) => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: view_dimension(dimension),
            multisampled: false,
        },
        ResourceKind::DepthTexture(dimension) => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Depth,
            view_dimension: view_dimension(dimension),
            multisampled: false,
        },
        ResourceKind::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        ResourceKind::ComparisonSampler => {
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison)
        }
    }
}

fn view_dimension(dimension: ViewDimension) -> wgpu::TextureViewDimension {
    match dimension {
        ViewDimension::D2 => wgpu::TextureViewDimension::D2,
        ViewDimension::D2Array => wgpu::TextureViewDimension::D2Array,
        ViewDimension::Cube => wgpu::TextureViewDimension::Cube,
    }
}

fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn texture_descriptor(desc: &TextureDesc) -> wgpu::TextureDescriptor<'_> {
    let mut usage = wgpu::TextureUsages::empty();
    if desc.usage.contains(TextureUsage::RENDER_TARGET)
        || desc.usage.contains(TextureUsage::DEPTH_STENCIL)
    {
        usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if desc.usage.contains(TextureUsage::SHADER_RESOURCE) {
        usage |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if desc.usage.contains(TextureUsage::COPY_SRC) {
        usage |= wgpu::TextureUsages::COPY_SRC;
    }
    if desc.usage.contains(TextureUsage::COPY_DST) {
        usage |= wgpu::TextureUsages::COPY_DST;
    }
    wgpu::TextureDescriptor {
        label: Some(&desc.label),
        size: wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: desc.layers,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: texture_format(desc.format),
        usage,
        view_formats: &[],
    }
}

fn sampler_descriptor(desc: &SamplerDesc) -> wgpu::SamplerDescriptor<'_> {
    let address_mode = match desc.address_mode {
        super::AddressMode::Repeat => wgpu::AddressMode::Repeat,
        super::AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
    };
    let filter = match desc.filter {
        super::FilterMode::Nearest => wgpu::FilterMode::Nearest,
        super::FilterMode::Linear => wgpu::FilterMode::Linear,
    };
    wgpu::SamplerDescriptor {
        label: Some(&desc.label),
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::FilterMode::Nearest,
        compare: desc.compare.map(compare_function),
        ..Default::default()
    }
}

fn compare_function(compare: CompareFunction) -> wgpu::CompareFunction {
    match compare {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_blocks_start_on_the_offset_alignment() {
        let mut staging = UniformStaging::new(256);
        assert_eq!(staging.push(&[1; 64], 64), 0);
        assert_eq!(staging.push(&[2; 592], 592), 256);
        assert_eq!(staging.push(&[3; 16], 16), 1024);
        assert_eq!(staging.len(), 1040);
        assert_eq!(staging.bytes[256], 2);
        assert_eq!(staging.bytes[64], 0);
    }

    #[test]
    fn staged_blocks_are_padded_or_cut_to_the_layout_size() {
        let mut staging = UniformStaging::new(4);
        staging.push(&[7; 2], 8);
        assert_eq!(staging.bytes, [7, 7, 0, 0, 0, 0, 0, 0]);
        staging.clear();
        staging.push(&[9; 12], 4);
        assert_eq!(staging.bytes, [9; 4]);
    }

    #[test]
    fn staging_is_reused_across_frames() {
        let mut staging = UniformStaging::new(256);
        for _ in 0..3 {
            staging.clear();
            for _ in 0..10 {
                staging.push(&[0; 784], 784);
            }
        }
        assert_eq!(staging.len(), 9 * 1024 + 784);
    }
}
