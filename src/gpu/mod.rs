//! GPU device abstraction.
//!
//! Everything above this module talks to the GPU through [`RenderBackend`]:
//! an immediate-mode context that creates resources and state objects, binds
//! them, and issues draws and copies in submission order. Resources are named
//! by small copyable handles, so scene objects can hold them without borrowing
//! the backend.
//!
//! Two implementations ship with the crate:
//!
//! - [`WgpuBackend`] renders to a window surface through wgpu.
//! - [`HeadlessBackend`] records every command, tracks the bound state and
//!   approximates depth-only rendering on the CPU. Tests and tools use it to
//!   inspect a frame without a GPU.
//!
//! # Binding model
//!
//! Each shader stage has one uniform block, uploaded with
//! [`RenderBackend::set_uniforms`]. Textures and samplers are bound to numbered
//! slots per stage and stay bound across shader changes until replaced. In
//! WGSL, vertex uniforms live at `@group(0) @binding(0)`, pixel uniforms at
//! `@group(1) @binding(0)` and pixel resources in `@group(2)` at their slot
//! index.

mod context;
mod headless;
mod wgpu_backend;

pub use context::GpuContext;
pub use headless::{BoundState, HeadlessBackend, RecordedCommand};
pub use wgpu_backend::WgpuBackend;

use bitflags::bitflags;

use crate::error::Result;
use crate::shader::ShaderDesc;

/// Handle to a vertex or index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a render-target, depth-stencil or shader-resource view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewHandle(pub(crate) u64);

/// Handle to a sampler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerHandle(pub(crate) u64);

/// Handle to a rasterizer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterizerHandle(pub(crate) u64);

/// Handle to a depth-stencil state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilHandle(pub(crate) u64);

/// Handle to a compiled shader stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub(crate) u64);

// Reserved view ids for the swapchain image and the main depth buffer.
pub(crate) const BACK_BUFFER_VIEW: TextureViewHandle = TextureViewHandle(0);
pub(crate) const MAIN_DEPTH_VIEW: TextureViewHandle = TextureViewHandle(1);
pub(crate) const FIRST_USER_ID: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8UnormSrgb,
    Rgba16Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn bytes_per_texel(self) -> u32 {
        match self {
            TextureFormat::Rgba16Float => 8,
            _ => 4,
        }
    }
}

bitflags! {
    /// What a texture may be bound or copied as.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const RENDER_TARGET = 1 << 0;
        const DEPTH_STENCIL = 1 << 1;
        const SHADER_RESOURCE = 1 << 2;
        const COPY_SRC = 1 << 3;
        const COPY_DST = 1 << 4;
    }
}

/// Description of a 2D texture, texture array or cubemap (an array of 6).
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl TextureDesc {
    pub fn new(
        label: impl Into<String>,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            layers: 1,
            format,
            usage,
        }
    }

    pub fn layers(mut self, layers: u32) -> Self {
        self.layers = layers;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewDimension {
    D2,
    D2Array,
    Cube,
}

/// How a view exposes its texture to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    RenderTarget,
    DepthStencil,
    ShaderResource(ViewDimension),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex { stride: u32 },
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizerDesc {
    pub cull_mode: CullMode,
    pub depth_bias: i32,
    pub slope_scaled_depth_bias: f32,
}

impl Default for RasterizerDesc {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            depth_bias: 0,
            slope_scaled_depth_bias: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    LessEqual,
    Equal,
    Greater,
    Always,
}

impl CompareFunction {
    pub fn test(self, incoming: f32, stored: f32) -> bool {
        match self {
            CompareFunction::Never => false,
            CompareFunction::Less => incoming < stored,
            CompareFunction::LessEqual => incoming <= stored,
            CompareFunction::Equal => incoming == stored,
            CompareFunction::Greater => incoming > stored,
            CompareFunction::Always => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilDesc {
    pub depth_write: bool,
    pub depth_compare: CompareFunction,
}

impl Default for DepthStencilDesc {
    fn default() -> Self {
        Self {
            depth_write: true,
            depth_compare: CompareFunction::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Repeat,
    Clamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone)]
pub struct SamplerDesc {
    pub label: String,
    pub address_mode: AddressMode,
    pub filter: FilterMode,
    /// Makes this a comparison sampler for depth textures.
    pub compare: Option<CompareFunction>,
}

impl SamplerDesc {
    pub fn linear_wrap(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            address_mode: AddressMode::Repeat,
            filter: FilterMode::Linear,
            compare: None,
        }
    }

    pub fn linear_clamp(label: impl Into<String>) -> Self {
        Self {
            address_mode: AddressMode::Clamp,
            ..Self::linear_wrap(label)
        }
    }

    pub fn comparison(label: impl Into<String>, compare: CompareFunction) -> Self {
        Self {
            compare: Some(compare),
            ..Self::linear_clamp(label)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// A full-target viewport at the origin with the [0, 1] depth range.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

/// The main output configuration: swapchain color target, depth buffer and size.
///
/// Passes that redirect output (shadow maps, the blur pass) restore to this
/// when they finish.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputTargets {
    pub color: TextureViewHandle,
    pub depth: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

impl OutputTargets {
    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.width, self.height)
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// Immediate-mode GPU context.
///
/// Creation methods return errors; command methods record into the current
/// frame and only surface problems at [`RenderBackend::present`]. Commands are
/// executed strictly in the order they were issued.
pub trait RenderBackend {
    /// The swapchain color target and main depth buffer.
    fn output(&self) -> OutputTargets;

    /// Largest width or height a texture may have.
    fn max_texture_dimension(&self) -> u32;

    /// Resize the swapchain and main depth buffer. Zero sizes are ignored.
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    // Resource creation

    fn create_buffer_init(
        &mut self,
        label: &str,
        kind: BufferKind,
        data: &[u8],
    ) -> Result<BufferHandle>;

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle>;

    /// Upload tightly packed texel data into one array layer.
    fn write_texture(&mut self, texture: TextureHandle, layer: u32, data: &[u8]) -> Result<()>;

    fn create_view(&mut self, texture: TextureHandle, kind: ViewKind) -> Result<TextureViewHandle>;

    /// Release a texture and every view created from it.
    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerHandle>;

    fn create_rasterizer_state(&mut self, desc: &RasterizerDesc) -> Result<RasterizerHandle>;

    fn create_depth_stencil_state(&mut self, desc: &DepthStencilDesc)
    -> Result<DepthStencilHandle>;

    fn create_shader(&mut self, desc: &ShaderDesc) -> Result<ShaderHandle>;

    // Commands

    fn clear_render_target(&mut self, view: TextureViewHandle, color: [f32; 4]);

    fn clear_depth(&mut self, view: TextureViewHandle, depth: f32);

    /// Bind the output targets. `None` for color means depth-only rendering.
    fn set_render_targets(
        &mut self,
        color: Option<TextureViewHandle>,
        depth: Option<TextureViewHandle>,
    );

    fn set_viewport(&mut self, viewport: Viewport);

    /// `None` restores the default state (back-face culling, no bias).
    fn set_rasterizer_state(&mut self, state: Option<RasterizerHandle>);

    /// `None` restores the default state (less-than test, depth writes on).
    fn set_depth_stencil_state(&mut self, state: Option<DepthStencilHandle>);

    /// Bind a shader to a stage. Unbinding the pixel stage gives depth-only output.
    fn set_shader(&mut self, stage: ShaderStage, shader: Option<ShaderHandle>);

    /// Replace the uniform block contents for a stage.
    fn set_uniforms(&mut self, stage: ShaderStage, data: &[u8]);

    fn set_texture(&mut self, stage: ShaderStage, slot: u32, view: Option<TextureViewHandle>);

    fn set_sampler(&mut self, stage: ShaderStage, slot: u32, sampler: Option<SamplerHandle>);

    fn draw_indexed(&mut self, vertices: BufferHandle, indices: BufferHandle, index_count: u32);

    /// Non-indexed draw without vertex buffers (fullscreen triangles).
    fn draw(&mut self, vertex_count: u32);

    /// Copy layer 0 of `source` into `layer` of `destination`.
    fn copy_texture_to_layer(
        &mut self,
        source: TextureHandle,
        destination: TextureHandle,
        layer: u32,
    );

    /// Submit the frame and present the swapchain image.
    fn present(&mut self, vsync: bool) -> Result<()>;

    /// Drop every command recorded since the last present. Resources created
    /// in the meantime stay alive.
    fn discard_frame(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_usage_combines_flags() {
        let usage = TextureUsage::DEPTH_STENCIL | TextureUsage::COPY_SRC;
        assert!(usage.contains(TextureUsage::DEPTH_STENCIL));
        assert!(usage.contains(TextureUsage::COPY_SRC));
        assert!(!usage.contains(TextureUsage::SHADER_RESOURCE));
        assert!(!usage.contains(TextureUsage::DEPTH_STENCIL | TextureUsage::COPY_DST));
    }
}
