//! Built-in WGSL programs and their declared interfaces.
//!
//! Each function returns the [`ShaderDesc`] for one stage: source, entry
//! point, uniform layout and resource slots. The layouts mirror the WGSL
//! structs field for field, so names set through [`Shader`](crate::Shader)
//! land where the shader reads them.

use crate::gpu::ViewDimension;
use crate::light::{GpuLight, MAX_LIGHTS};
use crate::shader::{ResourceKind, ShaderDesc, UniformLayout, VertexInput};
use crate::shadow::MAX_SHADOW_MAPS;

const MATRIX_SIZE: u32 = 64;

/// Lit surface vertex stage.
pub fn lit_vertex() -> ShaderDesc {
    ShaderDesc::vertex("Lit VS", include_str!("lit_vertex.wgsl"), "vs_main")
        .uniforms(
            UniformLayout::new()
                .matrix4("world")
                .matrix4("world_inverse_transpose")
                .matrix4("view")
                .matrix4("projection")
                .array("shadow_views", MATRIX_SIZE, MAX_SHADOW_MAPS as u32)
                .array("shadow_projections", MATRIX_SIZE, MAX_SHADOW_MAPS as u32)
                .uint("shadow_count"),
        )
        .vertex_input(VertexInput::Mesh)
}

/// Lit surface pixel stage: surface texture, lights and shadow array.
pub fn lit_pixel() -> ShaderDesc {
    ShaderDesc::pixel("Lit PS", include_str!("lit_pixel.wgsl"), "fs_main")
        .uniforms(
            UniformLayout::new()
                .float4("color_tint")
                .float2("uv_scale")
                .float2("uv_offset")
                .float3("camera_position")
                .float("roughness")
                .float3("ambient")
                .float("time")
                .uint("light_count")
                .array("lights", GpuLight::SIZE as u32, MAX_LIGHTS as u32),
        )
        .resource("SurfaceTexture", 0, ResourceKind::Texture(ViewDimension::D2))
        .resource("BasicSampler", 1, ResourceKind::Sampler)
        .resource(
            "ShadowMaps",
            2,
            ResourceKind::DepthTexture(ViewDimension::D2Array),
        )
        .resource("ShadowSampler", 3, ResourceKind::ComparisonSampler)
}

/// Depth-only vertex stage for shadow maps.
pub fn shadow_vertex() -> ShaderDesc {
    ShaderDesc::vertex("Shadow VS", include_str!("shadow_vertex.wgsl"), "vs_main")
        .uniforms(
            UniformLayout::new()
                .matrix4("world")
                .matrix4("view")
                .matrix4("projection"),
        )
        .vertex_input(VertexInput::Mesh)
}

pub fn sky_vertex() -> ShaderDesc {
    ShaderDesc::vertex("Sky VS", include_str!("sky_vertex.wgsl"), "vs_main")
        .uniforms(UniformLayout::new().matrix4("view").matrix4("projection"))
        .vertex_input(VertexInput::Mesh)
}

pub fn sky_pixel() -> ShaderDesc {
    ShaderDesc::pixel("Sky PS", include_str!("sky_pixel.wgsl"), "fs_main")
        .resource("SkyTexture", 0, ResourceKind::Texture(ViewDimension::Cube))
        .resource("BasicSampler", 1, ResourceKind::Sampler)
}

/// Fullscreen triangle generated from the vertex index.
pub fn blur_vertex() -> ShaderDesc {
    ShaderDesc::vertex("Blur VS", include_str!("blur_vertex.wgsl"), "vs_main")
        .vertex_input(VertexInput::None)
}

pub fn blur_pixel() -> ShaderDesc {
    ShaderDesc::pixel("Blur PS", include_str!("blur_pixel.wgsl"), "fs_main")
        .uniforms(
            UniformLayout::new()
                .int("blur_radius")
                .float("pixel_width")
                .float("pixel_height"),
        )
        .resource("Pixels", 0, ResourceKind::Texture(ViewDimension::D2))
        .resource("ClampSampler", 1, ResourceKind::Sampler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lit_layouts_match_the_wgsl_structs() {
        let vs = lit_vertex();
        assert_eq!(vs.uniforms.get("shadow_views").map(|f| f.offset), Some(256));
        assert_eq!(vs.uniforms.get("shadow_projections").map(|f| f.offset), Some(512));
        assert_eq!(vs.uniforms.get("shadow_count").map(|f| f.offset), Some(768));
        assert_eq!(vs.uniforms.size(), 784);

        let ps = lit_pixel();
        assert_eq!(ps.uniforms.get("camera_position").map(|f| f.offset), Some(32));
        assert_eq!(ps.uniforms.get("roughness").map(|f| f.offset), Some(44));
        assert_eq!(ps.uniforms.get("ambient").map(|f| f.offset), Some(48));
        assert_eq!(ps.uniforms.get("time").map(|f| f.offset), Some(60));
        assert_eq!(ps.uniforms.get("light_count").map(|f| f.offset), Some(64));
        assert_eq!(ps.uniforms.get("lights").map(|f| f.offset), Some(80));
        assert_eq!(ps.uniforms.size(), 592);
    }

    #[test]
    fn blur_uniforms_pack_into_one_vec4() {
        let ps = blur_pixel();
        assert_eq!(ps.uniforms.get("pixel_height").map(|f| f.offset), Some(8));
        assert_eq!(ps.uniforms.size(), 16);
        assert_eq!(blur_vertex().uniforms.size(), 0);
    }

    #[test]
    fn every_program_names_its_entry_point() {
        for desc in [
            lit_vertex(),
            lit_pixel(),
            shadow_vertex(),
            sky_vertex(),
            sky_pixel(),
            blur_vertex(),
            blur_pixel(),
        ] {
            let entry = format!("fn {}", desc.entry_point);
            assert!(desc.source.contains(&entry), "{} lacks {}", desc.label, entry);
        }
    }
}
