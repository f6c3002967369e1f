//! Named shader variables on top of raw uniform blocks.
//!
//! A [`Shader`] is one compiled stage (vertex or pixel) plus a CPU staging
//! copy of its uniform block. Variables are addressed by name through a
//! declared [`UniformLayout`], textures and samplers through named
//! [`ResourceSlot`]s. Setters only touch the staging copy;
//! [`Shader::copy_all_buffer_data`] uploads it in one batch.
//!
//! Setting a name the shader does not declare is not an error. The setter
//! returns `false` and, in debug builds, logs one warning per name.
//!
//! # Example
//!
//! ```ignore
//! let layout = UniformLayout::new()
//!     .matrix4("world")
//!     .matrix4("view")
//!     .matrix4("projection");
//! let desc = ShaderDesc::vertex("Shadow VS", include_str!("shaders/shadow.wgsl"), "vs_main")
//!     .uniforms(layout);
//! let shader = Shader::new(backend, desc)?;
//!
//! shader.set_shader(backend);
//! shader.set_matrix4x4("world", transform.world_matrix());
//! shader.copy_all_buffer_data(backend);
//! ```

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashSet;

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::error::Result;
use crate::gpu::{
    RenderBackend, SamplerHandle, ShaderHandle, ShaderStage, TextureViewHandle, ViewDimension,
};

/// Type of a uniform variable, with WGSL uniform-address-space layout rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Int,
    Uint,
    Float2,
    Float3,
    Float4,
    Matrix4,
    /// Fixed-size array; `stride` is the element size rounded up to 16 bytes.
    Array { stride: u32, count: u32 },
}

impl UniformKind {
    fn align(self) -> u32 {
        match self {
            UniformKind::Float | UniformKind::Int | UniformKind::Uint => 4,
            UniformKind::Float2 => 8,
            UniformKind::Float3 | UniformKind::Float4 | UniformKind::Matrix4 => 16,
            UniformKind::Array { .. } => 16,
        }
    }

    fn size(self) -> u32 {
        match self {
            UniformKind::Float | UniformKind::Int | UniformKind::Uint => 4,
            UniformKind::Float2 => 8,
            UniformKind::Float3 => 12,
            UniformKind::Float4 => 16,
            UniformKind::Matrix4 => 64,
            UniformKind::Array { stride, count } => stride * count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformField {
    pub name: String,
    pub kind: UniformKind,
    pub offset: u32,
}

/// Ordered list of uniform variables matching a WGSL uniform struct.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformLayout {
    fields: Vec<UniformField>,
    end: u32,
}

fn round_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

impl UniformLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, placing it at the next offset its alignment allows.
    pub fn field(mut self, name: impl Into<String>, kind: UniformKind) -> Self {
        let offset = round_up(self.end, kind.align());
        self.end = offset + kind.size();
        self.fields.push(UniformField {
            name: name.into(),
            kind,
            offset,
        });
        self
    }

    pub fn float(self, name: impl Into<String>) -> Self {
        self.field(name, UniformKind::Float)
    }

    pub fn int(self, name: impl Into<String>) -> Self {
        self.field(name, UniformKind::Int)
    }

    pub fn uint(self, name: impl Into<String>) -> Self {
        self.field(name, UniformKind::Uint)
    }

    pub fn float2(self, name: impl Into<String>) -> Self {
        self.field(name, UniformKind::Float2)
    }

    pub fn float3(self, name: impl Into<String>) -> Self {
        self.field(name, UniformKind::Float3)
    }

    pub fn float4(self, name: impl Into<String>) -> Self {
        self.field(name, UniformKind::Float4)
    }

    pub fn matrix4(self, name: impl Into<String>) -> Self {
        self.field(name, UniformKind::Matrix4)
    }

    pub fn array(self, name: impl Into<String>, element_size: u32, count: u32) -> Self {
        let stride = round_up(element_size, 16);
        self.field(name, UniformKind::Array { stride, count })
    }

    /// Size of the uniform block in bytes (0 when there are no fields).
    pub fn size(&self) -> u32 {
        round_up(self.end, 16)
    }

    pub fn get(&self, name: &str) -> Option<&UniformField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields(&self) -> &[UniformField] {
        &self.fields
    }
}

/// What a named resource slot expects to be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture(ViewDimension),
    DepthTexture(ViewDimension),
    Sampler,
    ComparisonSampler,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSlot {
    pub name: String,
    pub binding: u32,
    pub kind: ResourceKind,
}

/// Vertex data a vertex shader consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexInput {
    /// [`Vertex3d`](crate::Vertex3d) buffers.
    Mesh,
    /// No vertex buffers; positions come from the vertex index.
    None,
}

/// Everything needed to compile a stage and reflect its variables.
#[derive(Debug, Clone)]
pub struct ShaderDesc {
    pub label: String,
    pub stage: ShaderStage,
    pub source: Cow<'static, str>,
    pub entry_point: String,
    pub uniforms: UniformLayout,
    pub resources: Vec<ResourceSlot>,
    pub vertex_input: VertexInput,
}

impl ShaderDesc {
    pub fn vertex(
        label: impl Into<String>,
        source: impl Into<Cow<'static, str>>,
        entry_point: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            stage: ShaderStage::Vertex,
            source: source.into(),
            entry_point: entry_point.into(),
            uniforms: UniformLayout::new(),
            resources: Vec::new(),
            vertex_input: VertexInput::Mesh,
        }
    }

    pub fn pixel(
        label: impl Into<String>,
        source: impl Into<Cow<'static, str>>,
        entry_point: impl Into<String>,
    ) -> Self {
        Self {
            stage: ShaderStage::Pixel,
            ..Self::vertex(label, source, entry_point)
        }
    }

    pub fn uniforms(mut self, layout: UniformLayout) -> Self {
        self.uniforms = layout;
        self
    }

    pub fn resource(mut self, name: impl Into<String>, binding: u32, kind: ResourceKind) -> Self {
        self.resources.push(ResourceSlot {
            name: name.into(),
            binding,
            kind,
        });
        self
    }

    pub fn vertex_input(mut self, input: VertexInput) -> Self {
        self.vertex_input = input;
        self
    }
}

/// A compiled shader stage with named variables.
///
/// Setters take `&self` so a shader can be shared between materials through
/// an `Rc`. The staging copy persists across draws: values set once (lights,
/// shadow matrices) stay until overwritten.
#[derive(Debug)]
pub struct Shader {
    handle: ShaderHandle,
    label: String,
    stage: ShaderStage,
    layout: UniformLayout,
    resources: Vec<ResourceSlot>,
    staging: RefCell<Vec<u8>>,
    warned: RefCell<HashSet<String>>,
}

impl Shader {
    pub fn new(backend: &mut dyn RenderBackend, desc: ShaderDesc) -> Result<Self> {
        let handle = backend.create_shader(&desc)?;
        log::trace!(
            "Created {:?} shader '{}' ({} uniform bytes, {} resources)",
            desc.stage,
            desc.label,
            desc.uniforms.size(),
            desc.resources.len()
        );
        Ok(Self {
            handle,
            staging: RefCell::new(vec![0; desc.uniforms.size() as usize]),
            label: desc.label,
            stage: desc.stage,
            layout: desc.uniforms,
            resources: desc.resources,
            warned: RefCell::new(HashSet::new()),
        })
    }

    pub fn handle(&self) -> ShaderHandle {
        self.handle
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.layout.get(name).is_some()
    }

    /// Bind this shader to its stage.
    pub fn set_shader(&self, backend: &mut dyn RenderBackend) {
        backend.set_shader(self.stage, Some(self.handle));
    }

    /// Upload the whole staging copy as this stage's uniform block.
    pub fn copy_all_buffer_data(&self, backend: &mut dyn RenderBackend) {
        if self.layout.size() > 0 {
            backend.set_uniforms(self.stage, &self.staging.borrow());
        }
    }

    pub fn set_float(&self, name: &str, value: f32) -> bool {
        self.write(name, UniformKind::Float, bytemuck::bytes_of(&value))
    }

    pub fn set_int(&self, name: &str, value: i32) -> bool {
        self.write(name, UniformKind::Int, bytemuck::bytes_of(&value))
    }

    pub fn set_uint(&self, name: &str, value: u32) -> bool {
        self.write(name, UniformKind::Uint, bytemuck::bytes_of(&value))
    }

    pub fn set_float2(&self, name: &str, value: Vec2) -> bool {
        self.write(name, UniformKind::Float2, bytemuck::bytes_of(&value.to_array()))
    }

    pub fn set_float3(&self, name: &str, value: Vec3) -> bool {
        self.write(name, UniformKind::Float3, bytemuck::bytes_of(&value.to_array()))
    }

    pub fn set_float4(&self, name: &str, value: Vec4) -> bool {
        self.write(name, UniformKind::Float4, bytemuck::bytes_of(&value.to_array()))
    }

    pub fn set_matrix4x4(&self, name: &str, value: Mat4) -> bool {
        self.write(
            name,
            UniformKind::Matrix4,
            bytemuck::bytes_of(&value.to_cols_array()),
        )
    }

    /// Write raw bytes into a field of any type, typically an array of structs.
    pub fn set_data(&self, name: &str, data: &[u8]) -> bool {
        let Some(field) = self.layout.get(name) else {
            return self.mismatch(name, "variable");
        };
        if data.len() > field.kind.size() as usize {
            return self.mismatch(name, "variable large enough");
        }
        let offset = field.offset as usize;
        self.staging.borrow_mut()[offset..offset + data.len()].copy_from_slice(data);
        true
    }

    /// Bind a texture view to the named slot on this shader's stage.
    pub fn set_shader_resource_view(
        &self,
        backend: &mut dyn RenderBackend,
        name: &str,
        view: TextureViewHandle,
    ) -> bool {
        match self.slot(name, false) {
            Some(binding) => {
                backend.set_texture(self.stage, binding, Some(view));
                true
            }
            None => self.mismatch(name, "texture"),
        }
    }

    /// Bind a sampler to the named slot on this shader's stage.
    pub fn set_sampler_state(
        &self,
        backend: &mut dyn RenderBackend,
        name: &str,
        sampler: SamplerHandle,
    ) -> bool {
        match self.slot(name, true) {
            Some(binding) => {
                backend.set_sampler(self.stage, binding, Some(sampler));
                true
            }
            None => self.mismatch(name, "sampler"),
        }
    }

    /// Current staged bytes of a variable.
    pub fn read_data(&self, name: &str) -> Option<Vec<u8>> {
        let field = self.layout.get(name)?;
        let start = field.offset as usize;
        let end = start + field.kind.size() as usize;
        Some(self.staging.borrow()[start..end].to_vec())
    }

    /// Current staged value of a matrix variable.
    pub fn read_matrix4x4(&self, name: &str) -> Option<Mat4> {
        let field = self.layout.get(name)?;
        if field.kind != UniformKind::Matrix4 {
            return None;
        }
        let bytes = self.read_data(name)?;
        let cols: [f32; 16] = bytemuck::pod_read_unaligned(&bytes);
        Some(Mat4::from_cols_array(&cols))
    }

    fn slot(&self, name: &str, sampler: bool) -> Option<u32> {
        self.resources
            .iter()
            .find(|r| {
                r.name == name
                    && matches!(
                        r.kind,
                        ResourceKind::Sampler | ResourceKind::ComparisonSampler
                    ) == sampler
            })
            .map(|r| r.binding)
    }

    fn write(&self, name: &str, kind: UniformKind, bytes: &[u8]) -> bool {
        match self.layout.get(name) {
            Some(field) if field.kind == kind => {
                let offset = field.offset as usize;
                self.staging.borrow_mut()[offset..offset + bytes.len()].copy_from_slice(bytes);
                true
            }
            _ => self.mismatch(name, "variable"),
        }
    }

    fn mismatch(&self, name: &str, what: &str) -> bool {
        if cfg!(debug_assertions) && self.warned.borrow_mut().insert(name.to_owned()) {
            log::warn!("Shader '{}' has no {} named '{}'", self.label, what, name);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessBackend;

    #[test]
    fn layout_follows_wgsl_alignment() {
        let layout = UniformLayout::new()
            .float4("color_tint")
            .float2("uv_scale")
            .float2("uv_offset")
            .float3("camera_position")
            .float("roughness")
            .uint("light_count")
            .array("lights", 64, 8);

        assert_eq!(layout.get("uv_scale").unwrap().offset, 16);
        assert_eq!(layout.get("uv_offset").unwrap().offset, 24);
        assert_eq!(layout.get("camera_position").unwrap().offset, 32);
        // A scalar packs into the tail of a vec3.
        assert_eq!(layout.get("roughness").unwrap().offset, 44);
        assert_eq!(layout.get("light_count").unwrap().offset, 48);
        assert_eq!(layout.get("lights").unwrap().offset, 64);
        assert_eq!(layout.size(), 64 + 512);
    }

    #[test]
    fn empty_layout_has_no_size() {
        assert_eq!(UniformLayout::new().size(), 0);
        assert_eq!(UniformLayout::new().float("t").size(), 16);
    }

    #[test]
    fn setters_write_staging_and_reject_unknown_names() {
        let mut backend = HeadlessBackend::new(64, 64);
        let desc = ShaderDesc::vertex("Test VS", "", "vs_main")
            .uniforms(UniformLayout::new().matrix4("world").float("time"));
        let shader = Shader::new(&mut backend, desc).unwrap();

        let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        assert!(shader.set_matrix4x4("world", world));
        assert!(shader.set_float("time", 2.5));
        assert!(!shader.set_float("missing", 1.0));
        // Wrong type for an existing name is a mismatch too.
        assert!(!shader.set_float4("time", Vec4::ONE));

        assert_eq!(shader.read_matrix4x4("world"), Some(world));
        assert_eq!(shader.read_data("time").unwrap(), 2.5f32.to_ne_bytes().to_vec());
    }

    #[test]
    fn copy_all_buffer_data_uploads_to_its_stage() {
        let mut backend = HeadlessBackend::new(64, 64);
        let desc = ShaderDesc::pixel("Test PS", "", "fs_main")
            .uniforms(UniformLayout::new().float4("color_tint"))
            .resource("SurfaceTexture", 0, ResourceKind::Texture(ViewDimension::D2));
        let shader = Shader::new(&mut backend, desc).unwrap();

        shader.set_float4("color_tint", Vec4::new(1.0, 0.5, 0.25, 1.0));
        shader.copy_all_buffer_data(&mut backend);

        let uploaded = backend.state().pixel_uniforms.clone();
        let tint: [f32; 4] = bytemuck::pod_read_unaligned(&uploaded[..16]);
        assert_eq!(tint, [1.0, 0.5, 0.25, 1.0]);
    }

    #[test]
    fn resources_bind_by_name() {
        let mut backend = HeadlessBackend::new(64, 64);
        let desc = ShaderDesc::pixel("Test PS", "", "fs_main")
            .resource("SurfaceTexture", 0, ResourceKind::Texture(ViewDimension::D2))
            .resource("BasicSampler", 1, ResourceKind::Sampler);
        let shader = Shader::new(&mut backend, desc).unwrap();
        let sampler = backend
            .create_sampler(&crate::gpu::SamplerDesc::linear_wrap("s"))
            .unwrap();
        let output = backend.output();

        assert!(shader.set_sampler_state(&mut backend, "BasicSampler", sampler));
        assert!(shader.set_shader_resource_view(&mut backend, "SurfaceTexture", output.color));
        // Names are checked against the resource kind.
        assert!(!shader.set_sampler_state(&mut backend, "SurfaceTexture", sampler));

        assert_eq!(backend.state().pixel_samplers.get(&1), Some(&sampler));
        assert_eq!(backend.state().pixel_textures.get(&0), Some(&output.color));
    }
}
