use super::{MAX_SHADOW_MAPS, ShadowMap};
use crate::error::{RenderError, Result};
use crate::gpu::{
    RenderBackend, TextureDesc, TextureFormat, TextureHandle, TextureUsage, TextureViewHandle,
    ViewDimension, ViewKind,
};

/// All shadow maps of a scene as slices of one depth array texture.
///
/// With no maps registered the array still exists as a single 1x1 slice, so
/// the lit shader always has something bound.
#[derive(Debug)]
pub struct ShadowMapArray {
    texture: TextureHandle,
    view: TextureViewHandle,
    resolution: u32,
    count: usize,
}

impl ShadowMapArray {
    /// Allocate an array sized for `maps`.
    ///
    /// Fails if there are more than [`MAX_SHADOW_MAPS`] maps or their
    /// resolutions differ.
    pub fn new(backend: &mut dyn RenderBackend, maps: &[ShadowMap]) -> Result<Self> {
        if maps.len() > MAX_SHADOW_MAPS {
            return Err(RenderError::TooManyShadowMaps {
                max: MAX_SHADOW_MAPS,
            });
        }
        let resolution = maps.first().map_or(1, ShadowMap::resolution);
        if let Some(other) = maps.iter().find(|m| m.resolution() != resolution) {
            return Err(RenderError::ShadowResolutionMismatch {
                expected: resolution,
                found: other.resolution(),
            });
        }

        let layers = maps.len().max(1) as u32;
        let texture = backend.create_texture(
            &TextureDesc::new(
                "Shadow Map Array",
                resolution,
                resolution,
                TextureFormat::Depth32Float,
                TextureUsage::SHADER_RESOURCE | TextureUsage::COPY_DST,
            )
            .layers(layers),
        )?;
        let view = backend.create_view(texture, ViewKind::ShaderResource(ViewDimension::D2Array))?;
        log::debug!("Shadow map array: {} slice(s) at {}", layers, resolution);

        Ok(Self {
            texture,
            view,
            resolution,
            count: maps.len(),
        })
    }

    /// Copy map `i` into slice `i`. Must run after every map has been drawn
    /// and before anything samples the array.
    pub fn assemble(&self, backend: &mut dyn RenderBackend, maps: &[ShadowMap]) {
        for (slice, map) in maps.iter().enumerate().take(self.count) {
            backend.copy_texture_to_layer(map.texture(), self.texture, slice as u32);
        }
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn view(&self) -> TextureViewHandle {
        self.view
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Number of slices holding a real shadow map.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Release the GPU texture; the array must not be used afterwards.
    pub fn destroy(self, backend: &mut dyn RenderBackend) {
        backend.destroy_texture(self.texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{HeadlessBackend, RecordedCommand};
    use crate::light::Light;
    use crate::shader::Shader;
    use crate::shaders;
    use crate::shadow::ShadowSettings;
    use glam::Vec3;
    use std::rc::Rc;

    fn maps(backend: &mut HeadlessBackend, resolutions: &[u32]) -> Vec<ShadowMap> {
        let shader = Rc::new(Shader::new(backend, shaders::shadow_vertex()).unwrap());
        let light = Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0);
        resolutions
            .iter()
            .map(|&r| {
                ShadowMap::new(
                    backend,
                    &light,
                    shader.clone(),
                    ShadowSettings::new().resolution(r),
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn empty_array_has_one_placeholder_slice() {
        let mut backend = HeadlessBackend::new(8, 8);
        let array = ShadowMapArray::new(&mut backend, &[]).unwrap();
        assert_eq!(array.count(), 0);
        assert_eq!(backend.texture_desc(array.texture()).unwrap().layers, 1);
    }

    #[test]
    fn mismatched_resolutions_are_rejected() {
        let mut backend = HeadlessBackend::new(8, 8);
        let maps = maps(&mut backend, &[16, 32]);
        assert!(matches!(
            ShadowMapArray::new(&mut backend, &maps),
            Err(RenderError::ShadowResolutionMismatch {
                expected: 16,
                found: 32
            })
        ));
    }

    #[test]
    fn too_many_maps_are_rejected() {
        let mut backend = HeadlessBackend::new(8, 8);
        let maps = maps(&mut backend, &[4; MAX_SHADOW_MAPS + 1]);
        assert!(matches!(
            ShadowMapArray::new(&mut backend, &maps),
            Err(RenderError::TooManyShadowMaps { .. })
        ));
    }

    #[test]
    fn assemble_copies_in_registration_order() {
        let mut backend = HeadlessBackend::new(8, 8);
        let maps = maps(&mut backend, &[8, 8, 8]);
        let array = ShadowMapArray::new(&mut backend, &maps).unwrap();
        backend.clear_commands();

        array.assemble(&mut backend, &maps);

        let copies: Vec<_> = backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::CopyTextureToLayer { source, layer, .. } => Some((*source, *layer)),
                _ => None,
            })
            .collect();
        let expected: Vec<_> = maps
            .iter()
            .enumerate()
            .map(|(i, m)| (m.texture(), i as u32))
            .collect();
        assert_eq!(copies, expected);
    }
}
