//! # Penumbra
//!
//! **A small forward renderer with cached transforms and directional shadow maps.**
//!
//! Build a scene of entities, cameras and lights in one closure; penumbra
//! draws it every frame through a fixed sequence of passes: shadow maps,
//! lit color, skybox, blur, present.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::rc::Rc;
//! use penumbra::*;
//!
//! fn main() -> Result<()> {
//!     run(|ctx| {
//!         let cube = Rc::new(Mesh::cube(ctx.backend)?);
//!         let material = ctx.material().color_tint(Vec4::new(0.9, 0.3, 0.2, 1.0)).shared();
//!         ctx.add_entity(&cube, &material, Transform::new());
//!
//!         ctx.add_camera_looking_at(Vec3::new(0.0, 2.0, -5.0), Vec3::ZERO, CameraSettings::new());
//!         let sun = ctx.add_light(Light::directional(Vec3::new(0.3, -1.0, 0.5), Vec3::ONE, 1.0));
//!         ctx.add_shadow_caster(sun, ShadowSettings::new())?;
//!
//!         Ok(move |frame: &mut Frame| {
//!             frame.scene.entities[0].transform.rotate(0.0, frame.dt, 0.0);
//!         })
//!     })
//! }
//! ```
//!
//! ## Without a window
//!
//! Everything below the app runner talks to the GPU through
//! [`RenderBackend`]. [`HeadlessBackend`] implements it on the CPU and records
//! every command, so a whole frame can be rendered and inspected in a test:
//!
//! ```
//! use penumbra::*;
//!
//! let mut backend = HeadlessBackend::new(320, 240);
//! let renderer = Renderer::new(&mut backend).unwrap();
//! let mut scene = Scene::new();
//! scene.cameras.push(Camera::new(Vec3::new(0.0, 0.0, -5.0), 4.0 / 3.0, CameraSettings::new()));
//!
//! render_frame(&mut backend, &renderer, &mut scene, &FrameSettings::default(), 0.0).unwrap();
//! assert_eq!(backend.frames_presented(), 1);
//! ```

mod app;
mod camera;
mod entity;
mod error;
mod frame;
mod gpu;
mod input;
mod light;
mod material;
mod mesh;
mod post_process;
mod shader;
pub mod shaders;
mod shadow;
mod sky;
mod texture;
mod transform;

pub use app::{AppConfig, Frame, SetupContext, run, run_with_config};
pub use camera::{Camera, CameraSettings, PITCH_LIMIT};
pub use entity::Entity;
pub use error::{RenderError, Result};
pub use frame::{
    FRAME_PASSES, FrameContext, FrameSettings, PassFn, Renderer, Scene, render_frame,
};
pub use gpu::{
    AddressMode, BoundState, BufferHandle, BufferKind, CompareFunction, CullMode,
    DepthStencilDesc, DepthStencilHandle, FilterMode, GpuContext, HeadlessBackend, OutputTargets,
    RasterizerDesc, RasterizerHandle, RecordedCommand, RenderBackend, SamplerDesc, SamplerHandle,
    ShaderHandle, ShaderStage, TextureDesc, TextureFormat, TextureHandle, TextureUsage,
    TextureViewHandle, ViewDimension, ViewKind, Viewport, WgpuBackend,
};
pub use input::Input;
pub use light::{GpuLight, Light, LightType, MAX_LIGHTS};
pub use material::Material;
pub use mesh::{Mesh, Vertex3d};
pub use post_process::BlurPass;
pub use shader::{
    ResourceKind, ResourceSlot, Shader, ShaderDesc, UniformField, UniformKind, UniformLayout,
    VertexInput,
};
pub use shadow::{MAX_SHADOW_MAPS, ShadowMap, ShadowMapArray, ShadowSettings};
pub use sky::Sky;
pub use texture::{CUBE_FACES, Cubemap, Texture};
pub use transform::{CacheState, Transform};

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

// Re-export commonly used winit types for convenience
pub use winit::event::MouseButton;
pub use winit::keyboard::KeyCode;
