//! Per-frame render orchestration.
//!
//! A frame is the fixed sequence in [`FRAME_PASSES`]:
//!
//! 1. **shadow** - every registered [`ShadowMap`] renders the entity list
//!    depth-only, in registration order, then the maps are copied into the
//!    [`ShadowMapArray`].
//! 2. **color** - entities are drawn into the offscreen target with the
//!    lights, ambient color and shadow data bound.
//! 3. **sky** - the skybox fills whatever the entities left at far depth.
//! 4. **post_process** - the offscreen target is blurred onto the back buffer.
//! 5. **present** - the frame is submitted.
//!
//! Passes share nothing but the backend, so submission order is the only
//! synchronization between them.

use std::cell::Cell;
use std::rc::Rc;

use glam::{Mat4, Vec3};

use crate::camera::Camera;
use crate::entity::Entity;
use crate::error::{RenderError, Result};
use crate::gpu::{
    CompareFunction, CullMode, OutputTargets, RasterizerDesc, RasterizerHandle, RenderBackend,
    SamplerDesc, SamplerHandle,
};
use crate::light::{GpuLight, Light, LightType, MAX_LIGHTS};
use crate::material::Material;
use crate::post_process::BlurPass;
use crate::shader::Shader;
use crate::shaders;
use crate::shadow::{MAX_SHADOW_MAPS, ShadowMap, ShadowMapArray, ShadowSettings};
use crate::sky::Sky;
use crate::texture::{Cubemap, Texture};

/// Values the driver may change between frames.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSettings {
    pub background_color: [f32; 4],
    /// Box blur radius in texels; 0 disables the blur.
    pub blur_radius: i32,
    pub vsync: bool,
    /// Index into [`Scene::cameras`] used for rendering and input.
    pub active_camera: usize,
    pub ambient: Vec3,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            background_color: [0.4, 0.6, 0.75, 1.0],
            blur_radius: 0,
            vsync: true,
            active_camera: 0,
            ambient: Vec3::splat(0.1),
        }
    }
}

/// Everything that gets drawn.
///
/// Shadow maps are registered through [`Renderer::add_shadow_caster`] so the
/// array always matches them.
#[derive(Debug, Default)]
pub struct Scene {
    pub entities: Vec<Entity>,
    pub cameras: Vec<Camera>,
    pub lights: Vec<Light>,
    pub sky: Option<Sky>,
    shadow_maps: Vec<ShadowMap>,
    /// Light index of each shadow map, in slice order.
    shadow_lights: Vec<usize>,
    shadow_array: Option<ShadowMapArray>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shadow_maps(&self) -> &[ShadowMap] {
        &self.shadow_maps
    }

    pub fn shadow_array(&self) -> Option<&ShadowMapArray> {
        self.shadow_array.as_ref()
    }

    /// Shadow array slice sampled by light `light`, if it casts shadows.
    pub fn shadow_slice(&self, light: usize) -> Option<usize> {
        self.shadow_lights.iter().position(|&l| l == light)
    }

    /// Re-aim every shadow map at its light's current direction.
    pub fn rebuild_shadow_views(&mut self) {
        for (map, &light) in self.shadow_maps.iter_mut().zip(&self.shadow_lights) {
            if let Some(light) = self.lights.get(light) {
                map.rebuild_light_view(light);
            }
        }
    }

    pub fn camera(&self, settings: &FrameSettings) -> Result<&Camera> {
        self.cameras
            .get(settings.active_camera)
            .ok_or(RenderError::InvalidCameraIndex(settings.active_camera))
    }

    pub fn camera_mut(&mut self, settings: &FrameSettings) -> Result<&mut Camera> {
        self.cameras
            .get_mut(settings.active_camera)
            .ok_or(RenderError::InvalidCameraIndex(settings.active_camera))
    }

    /// Packed lights for the lit shader, capped at [`MAX_LIGHTS`].
    pub fn gpu_lights(&self) -> Vec<GpuLight> {
        self.lights
            .iter()
            .take(MAX_LIGHTS)
            .enumerate()
            .map(|(i, light)| light.to_gpu(self.shadow_slice(i)))
            .collect()
    }
}

/// Shared GPU state for drawing a [`Scene`]: built-in shaders, shadow states,
/// default textures and the blur pass.
#[derive(Debug)]
pub struct Renderer {
    lit_vertex: Rc<Shader>,
    lit_pixel: Rc<Shader>,
    shadow_vertex: Rc<Shader>,
    sky_vertex: Rc<Shader>,
    sky_pixel: Rc<Shader>,
    shadow_rasterizer: RasterizerHandle,
    shadow_sampler: SamplerHandle,
    wrap_sampler: SamplerHandle,
    white: Texture,
    blur: BlurPass,
    warned_lights: Cell<bool>,
}

impl Renderer {
    pub fn new(backend: &mut dyn RenderBackend) -> Result<Self> {
        let lit_vertex = Rc::new(Shader::new(backend, shaders::lit_vertex())?);
        let lit_pixel = Rc::new(Shader::new(backend, shaders::lit_pixel())?);
        let shadow_vertex = Rc::new(Shader::new(backend, shaders::shadow_vertex())?);
        let sky_vertex = Rc::new(Shader::new(backend, shaders::sky_vertex())?);
        let sky_pixel = Rc::new(Shader::new(backend, shaders::sky_pixel())?);

        let shadow_rasterizer = backend.create_rasterizer_state(&RasterizerDesc {
            cull_mode: CullMode::Back,
            depth_bias: 1000,
            slope_scaled_depth_bias: 1.0,
        })?;
        let shadow_sampler = backend
            .create_sampler(&SamplerDesc::comparison("Shadow Sampler", CompareFunction::Less))?;
        let wrap_sampler = backend.create_sampler(&SamplerDesc::linear_wrap("Basic Sampler"))?;
        let white = Texture::solid(backend, [255; 4], "White")?;
        let blur = BlurPass::new(backend)?;

        log::info!("Renderer ready");
        Ok(Self {
            lit_vertex,
            lit_pixel,
            shadow_vertex,
            sky_vertex,
            sky_pixel,
            shadow_rasterizer,
            shadow_sampler,
            wrap_sampler,
            white,
            blur,
            warned_lights: Cell::new(false),
        })
    }

    /// A lit material with a white surface texture and wrapping sampler.
    pub fn create_material(&self) -> Material {
        Material::new(self.lit_vertex.clone(), self.lit_pixel.clone())
            .texture("SurfaceTexture", self.white.view())
            .sampler("BasicSampler", self.wrap_sampler)
    }

    pub fn create_sky(&self, backend: &mut dyn RenderBackend, cubemap: Cubemap) -> Result<Sky> {
        Sky::new(
            backend,
            cubemap,
            self.sky_vertex.clone(),
            self.sky_pixel.clone(),
            self.wrap_sampler,
        )
    }

    pub fn wrap_sampler(&self) -> SamplerHandle {
        self.wrap_sampler
    }

    pub fn shadow_rasterizer(&self) -> RasterizerHandle {
        self.shadow_rasterizer
    }

    pub fn blur(&self) -> &BlurPass {
        &self.blur
    }

    /// Give directional light `light` a shadow map and rebuild the array.
    ///
    /// Each light gets at most one map, and only lights among the first
    /// [`MAX_LIGHTS`] can cast shadows since later ones never reach the shaders.
    ///
    /// Returns the array slice of the new map. On error the scene is unchanged.
    pub fn add_shadow_caster(
        &self,
        backend: &mut dyn RenderBackend,
        scene: &mut Scene,
        light: usize,
        settings: ShadowSettings,
    ) -> Result<usize> {
        let source = scene
            .lights
            .get(light)
            .ok_or(RenderError::InvalidLightIndex(light))?;
        if source.kind != LightType::Directional {
            return Err(RenderError::NotDirectional(light));
        }
        if light >= MAX_LIGHTS {
            return Err(RenderError::ShadowLightNotUploaded {
                light,
                max: MAX_LIGHTS,
            });
        }
        if scene.shadow_lights.contains(&light) {
            return Err(RenderError::DuplicateShadowCaster(light));
        }
        if scene.shadow_maps.len() >= MAX_SHADOW_MAPS {
            return Err(RenderError::TooManyShadowMaps {
                max: MAX_SHADOW_MAPS,
            });
        }

        let map = ShadowMap::new(backend, source, self.shadow_vertex.clone(), settings)?;
        scene.shadow_maps.push(map);
        let array = match ShadowMapArray::new(backend, &scene.shadow_maps) {
            Ok(array) => array,
            Err(e) => {
                if let Some(map) = scene.shadow_maps.pop() {
                    backend.destroy_texture(map.texture());
                }
                return Err(e);
            }
        };
        if let Some(old) = scene.shadow_array.replace(array) {
            old.destroy(backend);
        }
        scene.shadow_lights.push(light);

        let slice = scene.shadow_maps.len() - 1;
        log::info!("Light {} casts shadows into slice {}", light, slice);
        Ok(slice)
    }

    /// Follow a change of output size: swapchain, cameras and blur target.
    pub fn resize(
        &mut self,
        backend: &mut dyn RenderBackend,
        scene: &mut Scene,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        backend.resize(width, height)?;
        let aspect = backend.output().aspect();
        for camera in &mut scene.cameras {
            camera.on_resize(aspect);
        }
        self.blur.resize(backend, width, height)
    }
}

/// Borrowed state handed to each pass.
pub struct FrameContext<'a> {
    pub backend: &'a mut dyn RenderBackend,
    pub renderer: &'a Renderer,
    pub scene: &'a mut Scene,
    pub settings: &'a FrameSettings,
    pub output: OutputTargets,
    /// Seconds since startup.
    pub total_time: f32,
}

pub type PassFn = fn(&mut FrameContext) -> Result<()>;

/// The frame, in submission order.
pub const FRAME_PASSES: [(&str, PassFn); 5] = [
    ("shadow", shadow_pass),
    ("color", color_pass),
    ("sky", sky_pass),
    ("post_process", post_process_pass),
    ("present", present_pass),
];

/// Run every pass of [`FRAME_PASSES`] in order, stopping at the first error.
///
/// A failed frame is discarded from the backend, so nothing it recorded is
/// submitted with the next one.
pub fn render_frame(
    backend: &mut dyn RenderBackend,
    renderer: &Renderer,
    scene: &mut Scene,
    settings: &FrameSettings,
    total_time: f32,
) -> Result<()> {
    let output = backend.output();
    let mut ctx = FrameContext {
        backend,
        renderer,
        scene,
        settings,
        output,
        total_time,
    };
    for (name, pass) in FRAME_PASSES {
        log::debug!("Pass: {}", name);
        if let Err(e) = pass(&mut ctx) {
            log::debug!("Pass {} failed, discarding frame", name);
            ctx.backend.discard_frame();
            return Err(e);
        }
    }
    Ok(())
}

fn shadow_pass(ctx: &mut FrameContext) -> Result<()> {
    let scene = &mut *ctx.scene;
    if scene.shadow_array.is_none() {
        scene.shadow_array = Some(ShadowMapArray::new(ctx.backend, &[])?);
    }
    for map in &scene.shadow_maps {
        map.draw(
            ctx.backend,
            &scene.entities,
            Some(ctx.renderer.shadow_rasterizer),
            &ctx.output,
        );
    }
    if let Some(array) = &scene.shadow_array {
        array.assemble(ctx.backend, &scene.shadow_maps);
    }
    Ok(())
}

fn color_pass(ctx: &mut FrameContext) -> Result<()> {
    let renderer = ctx.renderer;
    let scene = &*ctx.scene;
    let camera = scene.camera(ctx.settings)?;
    let target = renderer.blur.target();

    ctx.backend
        .clear_render_target(target, ctx.settings.background_color);
    ctx.backend.clear_depth(ctx.output.depth, 1.0);
    ctx.backend.set_render_targets(Some(target), Some(ctx.output.depth));
    ctx.backend.set_viewport(ctx.output.viewport());

    if scene.lights.len() > MAX_LIGHTS && !renderer.warned_lights.replace(true) {
        log::warn!(
            "{} lights in the scene, only the first {} are used",
            scene.lights.len(),
            MAX_LIGHTS
        );
    }
    let lights = scene.gpu_lights();
    let (views, projections) = light_matrices(&scene.shadow_maps);
    let shadow_view = scene.shadow_array.as_ref().map(ShadowMapArray::view);

    for entity in &scene.entities {
        {
            let material = entity.material().borrow();
            let ps = material.pixel_shader();
            ps.set_data("lights", bytemuck::cast_slice(&lights));
            ps.set_uint("light_count", lights.len() as u32);
            ps.set_float3("ambient", ctx.settings.ambient);
            if let Some(view) = shadow_view {
                ps.set_shader_resource_view(ctx.backend, "ShadowMaps", view);
            }
            ps.set_sampler_state(ctx.backend, "ShadowSampler", renderer.shadow_sampler);

            let vs = material.vertex_shader();
            vs.set_data("shadow_views", bytemuck::cast_slice(&views));
            vs.set_data("shadow_projections", bytemuck::cast_slice(&projections));
            vs.set_uint("shadow_count", scene.shadow_maps.len() as u32);
        }
        entity.draw(ctx.backend, camera, ctx.total_time);
    }
    Ok(())
}

fn sky_pass(ctx: &mut FrameContext) -> Result<()> {
    if let Some(sky) = &ctx.scene.sky {
        let camera = ctx.scene.camera(ctx.settings)?;
        sky.draw(ctx.backend, camera);
    }
    Ok(())
}

fn post_process_pass(ctx: &mut FrameContext) -> Result<()> {
    ctx.renderer
        .blur
        .draw(ctx.backend, ctx.settings.blur_radius, &ctx.output);
    Ok(())
}

fn present_pass(ctx: &mut FrameContext) -> Result<()> {
    ctx.backend.present(ctx.settings.vsync)
}

/// Column-major light matrices, one per shadow slice, padded to [`MAX_SHADOW_MAPS`].
fn light_matrices(maps: &[ShadowMap]) -> (Vec<[f32; 16]>, Vec<[f32; 16]>) {
    let mut views = vec![Mat4::IDENTITY.to_cols_array(); MAX_SHADOW_MAPS];
    let mut projections = views.clone();
    for (slice, map) in maps.iter().take(MAX_SHADOW_MAPS).enumerate() {
        views[slice] = map.view_matrix().to_cols_array();
        projections[slice] = map.projection_matrix().to_cols_array();
    }
    (views, projections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraSettings;
    use crate::gpu::{HeadlessBackend, RecordedCommand};
    use crate::mesh::Mesh;

    fn setup() -> (HeadlessBackend, Renderer, Scene) {
        let mut backend = HeadlessBackend::new(64, 64);
        let renderer = Renderer::new(&mut backend).unwrap();
        let mut scene = Scene::new();
        scene
            .cameras
            .push(Camera::new(Vec3::new(0.0, 0.0, -5.0), 1.0, CameraSettings::default()));
        (backend, renderer, scene)
    }

    #[test]
    fn shadow_casters_must_be_directional() {
        let (mut backend, renderer, mut scene) = setup();
        scene
            .lights
            .push(Light::point(Vec3::Y, 10.0, Vec3::ONE, 1.0));

        assert!(matches!(
            renderer.add_shadow_caster(&mut backend, &mut scene, 0, ShadowSettings::new()),
            Err(RenderError::NotDirectional(0))
        ));
        assert!(matches!(
            renderer.add_shadow_caster(&mut backend, &mut scene, 3, ShadowSettings::new()),
            Err(RenderError::InvalidLightIndex(3))
        ));
        assert!(scene.shadow_maps().is_empty());
    }

    #[test]
    fn a_light_casts_into_one_map_only() {
        let (mut backend, renderer, mut scene) = setup();
        scene
            .lights
            .push(Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0));
        let settings = ShadowSettings::new().resolution(16);
        renderer
            .add_shadow_caster(&mut backend, &mut scene, 0, settings)
            .unwrap();

        assert!(matches!(
            renderer.add_shadow_caster(&mut backend, &mut scene, 0, settings),
            Err(RenderError::DuplicateShadowCaster(0))
        ));
        assert_eq!(scene.shadow_maps().len(), 1);
        assert_eq!(scene.shadow_array().unwrap().count(), 1);
        assert_eq!(scene.shadow_slice(0), Some(0));
    }

    #[test]
    fn lights_past_the_upload_limit_cannot_cast() {
        let (mut backend, renderer, mut scene) = setup();
        for _ in 0..=MAX_LIGHTS {
            scene
                .lights
                .push(Light::directional(Vec3::NEG_Y, Vec3::ONE, 0.1));
        }

        let result = renderer.add_shadow_caster(
            &mut backend,
            &mut scene,
            MAX_LIGHTS,
            ShadowSettings::new().resolution(16),
        );
        assert!(matches!(
            result,
            Err(RenderError::ShadowLightNotUploaded { light, max })
                if light == MAX_LIGHTS && max == MAX_LIGHTS
        ));
        assert!(scene.shadow_maps().is_empty());
        assert!(
            renderer
                .add_shadow_caster(
                    &mut backend,
                    &mut scene,
                    MAX_LIGHTS - 1,
                    ShadowSettings::new().resolution(16)
                )
                .is_ok()
        );
    }

    #[test]
    fn mismatched_caster_leaves_the_scene_unchanged() {
        let (mut backend, renderer, mut scene) = setup();
        scene
            .lights
            .push(Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0));
        scene
            .lights
            .push(Light::directional(Vec3::X, Vec3::ONE, 1.0));
        renderer
            .add_shadow_caster(&mut backend, &mut scene, 0, ShadowSettings::new().resolution(16))
            .unwrap();

        let result = renderer.add_shadow_caster(
            &mut backend,
            &mut scene,
            1,
            ShadowSettings::new().resolution(32),
        );

        assert!(matches!(
            result,
            Err(RenderError::ShadowResolutionMismatch { .. })
        ));
        assert_eq!(scene.shadow_maps().len(), 1);
        assert_eq!(scene.shadow_array().map(ShadowMapArray::count), Some(1));
        assert_eq!(scene.shadow_slice(1), None);
    }

    #[test]
    fn gpu_lights_carry_their_shadow_slice() {
        let (mut backend, renderer, mut scene) = setup();
        scene
            .lights
            .push(Light::point(Vec3::Y, 10.0, Vec3::ONE, 1.0));
        scene
            .lights
            .push(Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0));
        renderer
            .add_shadow_caster(&mut backend, &mut scene, 1, ShadowSettings::new().resolution(8))
            .unwrap();

        let lights = scene.gpu_lights();
        assert_eq!(lights[0].shadow_index, -1);
        assert_eq!(lights[1].shadow_index, 0);
    }

    #[test]
    fn light_matrices_follow_slice_order_and_pad_with_identity() {
        let (mut backend, renderer, mut scene) = setup();
        scene
            .lights
            .push(Light::directional(Vec3::Z, Vec3::ONE, 1.0));
        renderer
            .add_shadow_caster(&mut backend, &mut scene, 0, ShadowSettings::new().resolution(8))
            .unwrap();

        let (views, projections) = light_matrices(scene.shadow_maps());
        assert_eq!(views.len(), MAX_SHADOW_MAPS);
        assert_eq!(views[0], scene.shadow_maps()[0].view_matrix().to_cols_array());
        assert_eq!(
            projections[0],
            scene.shadow_maps()[0].projection_matrix().to_cols_array()
        );
        assert_eq!(views[1], Mat4::IDENTITY.to_cols_array());
    }

    #[test]
    fn extra_lights_are_dropped() {
        let (_, _, mut scene) = setup();
        scene.lights = vec![Light::point(Vec3::ZERO, 1.0, Vec3::ONE, 1.0); MAX_LIGHTS + 3];
        assert_eq!(scene.gpu_lights().len(), MAX_LIGHTS);
    }

    #[test]
    fn missing_camera_stops_the_frame_before_present() {
        let (mut backend, renderer, mut scene) = setup();
        let settings = FrameSettings {
            active_camera: 4,
            ..Default::default()
        };

        let result = render_frame(&mut backend, &renderer, &mut scene, &settings, 0.0);

        assert!(matches!(result, Err(RenderError::InvalidCameraIndex(4))));
        assert_eq!(backend.frames_presented(), 0);
    }

    #[test]
    fn color_pass_binds_frame_globals_for_each_entity() {
        let (mut backend, renderer, mut scene) = setup();
        let mesh = Rc::new(Mesh::cube(&mut backend).unwrap());
        let material = renderer.create_material().shared();
        scene.entities.push(Entity::new(mesh, material.clone()));
        scene
            .lights
            .push(Light::directional(Vec3::new(0.0, -1.0, 1.0), Vec3::ONE, 1.0));
        renderer
            .add_shadow_caster(&mut backend, &mut scene, 0, ShadowSettings::new().resolution(8))
            .unwrap();
        let settings = FrameSettings {
            ambient: Vec3::new(0.2, 0.3, 0.4),
            ..Default::default()
        };

        render_frame(&mut backend, &renderer, &mut scene, &settings, 1.5).unwrap();

        let material = material.borrow();
        let ps = material.pixel_shader();
        assert_eq!(
            ps.read_data("light_count"),
            Some(1u32.to_ne_bytes().to_vec())
        );
        assert_eq!(
            material.vertex_shader().read_matrix4x4("view"),
            Some(scene.cameras[0].view_matrix())
        );
        assert_eq!(backend.frames_presented(), 1);
        assert!(backend.commands().iter().any(|c| matches!(
            c,
            RecordedCommand::ClearRenderTarget { view, .. } if *view == renderer.blur().target()
        )));
    }
}
