//! Sampled textures: 2D images and six-face cubemaps.

use std::path::Path;

use crate::error::{RenderError, Result};
use crate::gpu::{
    RenderBackend, TextureDesc, TextureFormat, TextureHandle, TextureUsage, TextureViewHandle,
    ViewDimension, ViewKind,
};

/// A 2D texture with a shader-resource view.
#[derive(Debug)]
pub struct Texture {
    texture: TextureHandle,
    view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

impl Texture {
    /// Create a texture from tightly packed sRGB RGBA8 data.
    pub fn from_rgba(
        backend: &mut dyn RenderBackend,
        data: &[u8],
        width: u32,
        height: u32,
        label: &str,
    ) -> Result<Self> {
        let texture = backend.create_texture(&TextureDesc::new(
            label,
            width,
            height,
            TextureFormat::Rgba8UnormSrgb,
            TextureUsage::SHADER_RESOURCE | TextureUsage::COPY_DST,
        ))?;
        backend.write_texture(texture, 0, data)?;
        let view = backend.create_view(texture, ViewKind::ShaderResource(ViewDimension::D2))?;
        log::trace!("Loaded texture '{}' ({}x{})", label, width, height);

        Ok(Self {
            texture,
            view,
            width,
            height,
        })
    }

    /// Load a texture from an image file.
    pub fn from_file(backend: &mut dyn RenderBackend, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path)?.to_rgba8();
        let (width, height) = img.dimensions();
        Self::from_rgba(backend, &img, width, height, &path.display().to_string())
    }

    /// Load a texture from encoded image bytes.
    pub fn from_bytes(backend: &mut dyn RenderBackend, bytes: &[u8], label: &str) -> Result<Self> {
        let img = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = img.dimensions();
        Self::from_rgba(backend, &img, width, height, label)
    }

    /// 1x1 texture of a single color. Materials without a surface texture sample this.
    pub fn solid(backend: &mut dyn RenderBackend, rgba: [u8; 4], label: &str) -> Result<Self> {
        Self::from_rgba(backend, &rgba, 1, 1, label)
    }

    /// Two-tone checkerboard with `cells` squares per side.
    pub fn checker(
        backend: &mut dyn RenderBackend,
        size: u32,
        cells: u32,
        light: [u8; 4],
        dark: [u8; 4],
    ) -> Result<Self> {
        let cell = (size / cells.max(1)).max(1);
        let data: Vec<u8> = (0..size * size)
            .flat_map(|i| {
                let (x, y) = (i % size, i / size);
                if (x / cell + y / cell) % 2 == 0 {
                    light
                } else {
                    dark
                }
            })
            .collect();
        Self::from_rgba(backend, &data, size, size, "Checker Texture")
    }

    pub fn handle(&self) -> TextureHandle {
        self.texture
    }

    pub fn view(&self) -> TextureViewHandle {
        self.view
    }
}

/// Order in which cubemap faces are stored: +X, -X, +Y, -Y, +Z, -Z.
pub const CUBE_FACES: [&str; 6] = ["+X", "-X", "+Y", "-Y", "+Z", "-Z"];

/// Six square faces in one texture, viewed as a cube.
#[derive(Debug)]
pub struct Cubemap {
    texture: TextureHandle,
    view: TextureViewHandle,
    pub size: (u32, u32),
}

impl Cubemap {
    /// Build a cubemap from six decoded RGBA8 faces in [`CUBE_FACES`] order.
    ///
    /// Every face must have the dimensions of the first one.
    pub fn from_faces(
        backend: &mut dyn RenderBackend,
        faces: &[image::RgbaImage; 6],
        label: &str,
    ) -> Result<Self> {
        let size = faces[0].dimensions();
        for (face, image) in faces.iter().enumerate().skip(1) {
            if image.dimensions() != size {
                return Err(RenderError::CubemapFaceMismatch {
                    face: CUBE_FACES[face],
                    expected: size,
                    found: image.dimensions(),
                });
            }
        }

        let texture = backend.create_texture(
            &TextureDesc::new(
                label,
                size.0,
                size.1,
                TextureFormat::Rgba8UnormSrgb,
                TextureUsage::SHADER_RESOURCE | TextureUsage::COPY_DST,
            )
            .layers(6),
        )?;
        for (layer, image) in faces.iter().enumerate() {
            backend.write_texture(texture, layer as u32, image)?;
        }
        let view = backend.create_view(texture, ViewKind::ShaderResource(ViewDimension::Cube))?;

        Ok(Self {
            texture,
            view,
            size,
        })
    }

    /// Load the six faces from image files.
    pub fn from_files<P: AsRef<Path>>(backend: &mut dyn RenderBackend, paths: [P; 6]) -> Result<Self> {
        let mut faces = Vec::with_capacity(6);
        for path in &paths {
            faces.push(image::open(path.as_ref())?.to_rgba8());
        }
        let label = paths[0].as_ref().display().to_string();
        let faces: [image::RgbaImage; 6] = faces
            .try_into()
            .map_err(|_| RenderError::creation(&label, "expected six cubemap faces"))?;
        Self::from_faces(backend, &faces, &label)
    }

    /// Vertical gradient sky: `horizon` around the sides blending to `zenith` on +Y.
    pub fn gradient(
        backend: &mut dyn RenderBackend,
        size: u32,
        zenith: [u8; 3],
        horizon: [u8; 3],
        ground: [u8; 3],
    ) -> Result<Self> {
        let lerp = |a: [u8; 3], b: [u8; 3], t: f32| {
            let mix = |i: usize| (a[i] as f32 + (b[i] as f32 - a[i] as f32) * t) as u8;
            image::Rgba([mix(0), mix(1), mix(2), 255])
        };
        let side = image::RgbaImage::from_fn(size, size, |_, y| {
            let t = y as f32 / (size.max(2) - 1) as f32;
            if t < 0.5 {
                lerp(zenith, horizon, t * 2.0)
            } else {
                lerp(horizon, ground, (t - 0.5) * 2.0)
            }
        });
        let top = image::RgbaImage::from_pixel(size, size, lerp(zenith, zenith, 0.0));
        let bottom = image::RgbaImage::from_pixel(size, size, lerp(ground, ground, 0.0));
        let faces = [
            side.clone(),
            side.clone(),
            top,
            bottom,
            side.clone(),
            side,
        ];
        Self::from_faces(backend, &faces, "Gradient Sky")
    }

    pub fn handle(&self) -> TextureHandle {
        self.texture
    }

    pub fn view(&self) -> TextureViewHandle {
        self.view
    }
}
