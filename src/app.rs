use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use glam::Vec3;
use winit::application::ApplicationHandler;
use winit::event::{DeviceEvent, DeviceId, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::camera::{Camera, CameraSettings};
use crate::entity::Entity;
use crate::error::{RenderError, Result};
use crate::frame::{FrameSettings, Renderer, Scene, render_frame};
use crate::gpu::{RenderBackend, WgpuBackend};
use crate::input::Input;
use crate::light::Light;
use crate::material::Material;
use crate::mesh::Mesh;
use crate::shadow::ShadowSettings;
use crate::texture::Cubemap;
use crate::transform::Transform;

/// Context provided during app setup.
pub struct SetupContext<'a> {
    pub backend: &'a mut dyn RenderBackend,
    pub renderer: &'a Renderer,
    pub scene: &'a mut Scene,
    pub settings: &'a mut FrameSettings,
}

impl SetupContext<'_> {
    /// Aspect ratio of the window.
    pub fn aspect(&self) -> f32 {
        self.backend.output().aspect()
    }

    /// Add a camera sized for the window and return its index.
    pub fn add_camera(&mut self, position: Vec3, settings: CameraSettings) -> usize {
        let camera = Camera::new(position, self.aspect(), settings);
        self.scene.cameras.push(camera);
        self.scene.cameras.len() - 1
    }

    /// Add a camera looking at `target` and return its index.
    pub fn add_camera_looking_at(
        &mut self,
        position: Vec3,
        target: Vec3,
        settings: CameraSettings,
    ) -> usize {
        let camera = Camera::new(position, self.aspect(), settings).look_at(target);
        self.scene.cameras.push(camera);
        self.scene.cameras.len() - 1
    }

    pub fn add_light(&mut self, light: Light) -> usize {
        self.scene.lights.push(light);
        self.scene.lights.len() - 1
    }

    /// Give a directional light a shadow map.
    pub fn add_shadow_caster(&mut self, light: usize, settings: ShadowSettings) -> Result<usize> {
        self.renderer
            .add_shadow_caster(self.backend, self.scene, light, settings)
    }

    /// A lit material with a white surface texture. Customize it with the
    /// [`Material`] builders before calling [`Material::shared`].
    pub fn material(&self) -> Material {
        self.renderer.create_material()
    }

    pub fn add_entity(
        &mut self,
        mesh: &Rc<Mesh>,
        material: &Rc<RefCell<Material>>,
        transform: Transform,
    ) -> usize {
        let entity = Entity::new(mesh.clone(), material.clone()).with_transform(transform);
        self.scene.entities.push(entity);
        self.scene.entities.len() - 1
    }

    /// Draw `cubemap` behind the scene.
    pub fn sky(&mut self, cubemap: Cubemap) -> Result<()> {
        self.scene.sky = Some(self.renderer.create_sky(self.backend, cubemap)?);
        Ok(())
    }
}

/// Context provided each frame before rendering.
pub struct Frame<'a> {
    /// GPU backend for creating resources mid-run.
    pub backend: &'a mut dyn RenderBackend,
    pub scene: &'a mut Scene,
    /// Settings used to render this frame; edits take effect immediately.
    pub settings: &'a mut FrameSettings,
    pub input: &'a Input,
    /// Total elapsed time in seconds.
    pub time: f32,
    /// Delta time since last frame in seconds.
    pub dt: f32,
}

impl Frame<'_> {
    /// Current frames per second.
    pub fn fps(&self) -> f32 {
        if self.dt > 0.0 { 1.0 / self.dt } else { 0.0 }
    }
}

/// Configuration for the app window.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Penumbra".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }
}

/// Run a windowed app with the default configuration.
pub fn run<S, F>(setup: S) -> Result<()>
where
    S: FnOnce(&mut SetupContext) -> Result<F> + 'static,
    F: FnMut(&mut Frame) + 'static,
{
    run_with_config(AppConfig::default(), setup)
}

/// Run a windowed app.
///
/// `setup` builds the scene once the window exists and returns the closure
/// called at the start of every frame. Each frame then updates the active
/// camera from input and renders the scene.
///
/// Returns an error if the window, the GPU or `setup` failed to start.
///
/// # Example
/// ```ignore
/// penumbra::run_with_config(AppConfig::new().title("Shadows"), |ctx| {
///     let cube = Rc::new(Mesh::cube(ctx.backend)?);
///     let material = ctx.material().shared();
///     ctx.add_entity(&cube, &material, Transform::new());
///     ctx.add_camera(Vec3::new(0.0, 1.0, -5.0), CameraSettings::default());
///     let sun = ctx.add_light(Light::directional(Vec3::new(0.3, -1.0, 0.5), Vec3::ONE, 1.0));
///     ctx.add_shadow_caster(sun, ShadowSettings::default())?;
///
///     Ok(move |frame: &mut Frame| {
///         frame.scene.entities[0].transform.rotate(0.0, frame.dt, 0.0);
///     })
/// })?;
/// ```
pub fn run_with_config<S, F>(config: AppConfig, setup: S) -> Result<()>
where
    S: FnOnce(&mut SetupContext) -> Result<F> + 'static,
    F: FnMut(&mut Frame) + 'static,
{
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = PenumbraApp::Pending {
        config,
        setup: Some(Box::new(move |ctx| -> Result<FrameFn> {
            let frame_fn = setup(ctx)?;
            Ok(Box::new(frame_fn))
        })),
    };

    event_loop.run_app(&mut app)?;

    match app {
        PenumbraApp::Failed(e) => Err(e),
        _ => Ok(()),
    }
}

type FrameFn = Box<dyn FnMut(&mut Frame)>;
type SetupFn = Box<dyn FnOnce(&mut SetupContext) -> Result<FrameFn>>;

enum PenumbraApp {
    Pending {
        config: AppConfig,
        setup: Option<SetupFn>,
    },
    Running {
        window: Arc<Window>,
        backend: WgpuBackend,
        renderer: Renderer,
        scene: Scene,
        settings: FrameSettings,
        input: Input,
        frame_fn: FrameFn,
        start_time: Instant,
        last_frame: Instant,
    },
    Failed(RenderError),
}

impl PenumbraApp {
    fn start(
        event_loop: &ActiveEventLoop,
        config: &AppConfig,
        setup: SetupFn,
    ) -> Result<PenumbraApp> {
        let window_attrs = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height));
        let window = Arc::new(
            event_loop
                .create_window(window_attrs)
                .map_err(|e| RenderError::Initialization(e.to_string()))?,
        );

        let mut backend = WgpuBackend::new(window.clone(), config.vsync)?;
        let renderer = Renderer::new(&mut backend)?;
        let mut scene = Scene::new();
        let mut settings = FrameSettings {
            vsync: config.vsync,
            ..Default::default()
        };

        let frame_fn = setup(&mut SetupContext {
            backend: &mut backend,
            renderer: &renderer,
            scene: &mut scene,
            settings: &mut settings,
        })?;
        log::info!(
            "Scene ready: {} entities, {} lights, {} shadow maps",
            scene.entities.len(),
            scene.lights.len(),
            scene.shadow_maps().len()
        );

        Ok(PenumbraApp::Running {
            window,
            backend,
            renderer,
            scene,
            settings,
            input: Input::new(),
            frame_fn,
            start_time: Instant::now(),
            last_frame: Instant::now(),
        })
    }
}

impl ApplicationHandler for PenumbraApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let PenumbraApp::Pending { config, setup } = self else {
            return;
        };
        let Some(setup) = setup.take() else {
            return;
        };
        *self = match PenumbraApp::start(event_loop, config, setup) {
            Ok(running) => running,
            Err(e) => {
                log::error!("Startup failed: {}", e);
                event_loop.exit();
                PenumbraApp::Failed(e)
            }
        };
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let PenumbraApp::Running {
            window,
            backend,
            renderer,
            scene,
            settings,
            input,
            frame_fn,
            start_time,
            last_frame,
        } = self
        else {
            return;
        };

        input.handle_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Err(e) = renderer.resize(backend, scene, size.width, size.height) {
                    log::warn!("Resize to {}x{} failed: {}", size.width, size.height, e);
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let time = start_time.elapsed().as_secs_f32();
                let dt = now.duration_since(*last_frame).as_secs_f32();
                *last_frame = now;

                frame_fn(&mut Frame {
                    backend: &mut *backend,
                    scene: &mut *scene,
                    settings: &mut *settings,
                    input: &*input,
                    time,
                    dt,
                });

                if let Ok(camera) = scene.camera_mut(settings) {
                    camera.update(input, dt);
                }

                match render_frame(backend, renderer, scene, settings, time) {
                    Ok(()) => {}
                    Err(RenderError::DeviceLost) => {
                        log::error!("GPU device lost, exiting");
                        event_loop.exit();
                    }
                    Err(e) => log::warn!("Frame dropped: {}", e),
                }

                input.begin_frame();
                window.request_redraw();
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _id: DeviceId, event: DeviceEvent) {
        if let PenumbraApp::Running { input, .. } = self {
            input.handle_device_event(&event);
        }
    }
}
