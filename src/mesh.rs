//! GPU-resident geometry and built-in primitives.
//!
//! - [`Vertex3d`] is the vertex format every lit and shadow shader consumes.
//! - [`Mesh`] owns immutable vertex and index buffers and knows how to draw
//!   itself through a [`RenderBackend`].
//!
//! # Vertex Layout
//!
//! | Attribute | Format    | Offset | Shader Location |
//! |-----------|-----------|--------|-----------------|
//! | position  | Float32x3 | 0      | 0               |
//! | normal    | Float32x3 | 12     | 1               |
//! | uv        | Float32x2 | 24     | 2               |
//!
//! # Winding Order
//!
//! Built-in primitives wind front faces counter-clockwise when seen from
//! outside in a right-handed frame. Under the left-handed camera they reach
//! the rasterizer clockwise, which is what the pipelines treat as front.

use std::f32::consts::PI;

use crate::error::Result;
use crate::gpu::{BufferHandle, BufferKind, RenderBackend};

/// A vertex with position, normal and texture coordinates (32 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex3d {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex3d {
    pub const STRIDE: u32 = std::mem::size_of::<Vertex3d>() as u32;

    /// The wgpu vertex buffer layout for this vertex type.
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex3d>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2],
    };

    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// Immutable vertex and index buffers plus their element counts.
///
/// Meshes are shared between entities through `Rc<Mesh>`.
#[derive(Debug)]
pub struct Mesh {
    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
    vertex_count: u32,
    index_count: u32,
}

impl Mesh {
    /// Upload vertex and index data into new GPU buffers.
    pub fn new(
        backend: &mut dyn RenderBackend,
        vertices: &[Vertex3d],
        indices: &[u32],
    ) -> Result<Self> {
        let vertex_buffer = backend.create_buffer_init(
            "Mesh Vertex Buffer",
            BufferKind::Vertex {
                stride: Vertex3d::STRIDE,
            },
            bytemuck::cast_slice(vertices),
        )?;
        let index_buffer = backend.create_buffer_init(
            "Mesh Index Buffer",
            BufferKind::Index,
            bytemuck::cast_slice(indices),
        )?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
        })
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Issue an indexed draw of the whole mesh with whatever is bound.
    pub fn draw(&self, backend: &mut dyn RenderBackend) {
        backend.draw_indexed(self.vertex_buffer, self.index_buffer, self.index_count);
    }

    /// Unit cube centered at the origin, 24 vertices with flat normals.
    pub fn cube(backend: &mut dyn RenderBackend) -> Result<Self> {
        let (vertices, indices) = cube_geometry();
        Self::new(backend, &vertices, &indices)
    }

    /// UV sphere of radius 0.5 with `segments` around and `rings` pole to pole.
    pub fn sphere(backend: &mut dyn RenderBackend, segments: u32, rings: u32) -> Result<Self> {
        let (vertices, indices) = sphere_geometry(segments.max(3), rings.max(2));
        Self::new(backend, &vertices, &indices)
    }

    /// Square `size` x `size` plane on XZ facing +Y.
    pub fn plane(backend: &mut dyn RenderBackend, size: f32) -> Result<Self> {
        let half = size * 0.5;
        let vertices = [
            Vertex3d::new([-half, 0.0, -half], [0.0, 1.0, 0.0], [0.0, 0.0]),
            Vertex3d::new([half, 0.0, -half], [0.0, 1.0, 0.0], [1.0, 0.0]),
            Vertex3d::new([half, 0.0, half], [0.0, 1.0, 0.0], [1.0, 1.0]),
            Vertex3d::new([-half, 0.0, half], [0.0, 1.0, 0.0], [0.0, 1.0]),
        ];
        Self::new(backend, &vertices, &[0, 2, 1, 2, 0, 3])
    }
}

fn cube_geometry() -> (Vec<Vertex3d>, Vec<u32>) {
    // (normal, tangent u, tangent v) per face; u x v points along the normal.
    const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in FACES {
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = [
                0.5 * (normal[0] + su * u[0] + sv * v[0]),
                0.5 * (normal[1] + su * u[1] + sv * v[1]),
                0.5 * (normal[2] + su * u[2] + sv * v[2]),
            ];
            let uv = [(su + 1.0) * 0.5, (1.0 - sv) * 0.5];
            vertices.push(Vertex3d::new(position, normal, uv));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    (vertices, indices)
}

fn sphere_geometry(segments: u32, rings: u32) -> (Vec<Vertex3d>, Vec<u32>) {
    let mut vertices = Vec::with_capacity(((segments + 1) * (rings + 1)) as usize);
    let mut indices = Vec::with_capacity((segments * rings * 6) as usize);

    for ring in 0..=rings {
        let phi = PI * ring as f32 / rings as f32;
        let y = phi.cos();
        let ring_radius = phi.sin();

        for seg in 0..=segments {
            let theta = 2.0 * PI * seg as f32 / segments as f32;
            let x = ring_radius * theta.cos();
            let z = ring_radius * theta.sin();
            let uv = [seg as f32 / segments as f32, ring as f32 / rings as f32];
            vertices.push(Vertex3d::new([x * 0.5, y * 0.5, z * 0.5], [x, y, z], uv));
        }
    }

    for ring in 0..rings {
        for seg in 0..segments {
            let current = ring * (segments + 1) + seg;
            let next = current + segments + 1;
            indices.extend_from_slice(&[current, current + 1, next]);
            indices.extend_from_slice(&[current + 1, next + 1, next]);
        }
    }
    (vertices, indices)
}
