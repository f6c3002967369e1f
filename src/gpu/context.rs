//! wgpu device, queue and window surface.
//!
//! [`GpuContext`] does the wgpu boilerplate (instance, surface, adapter,
//! device, surface configuration) and owns the results. It is the low-level
//! half of [`WgpuBackend`](super::WgpuBackend).

use std::sync::Arc;

use winit::window::Window;

use crate::error::{RenderError, Result};

/// Core GPU context holding wgpu resources.
///
/// All fields are public so the wgpu API stays reachable when the
/// [`RenderBackend`](super::RenderBackend) abstraction is not enough.
pub struct GpuContext {
    /// The surface for presenting rendered frames to the window.
    pub surface: wgpu::Surface<'static>,
    /// The logical GPU device for creating resources and pipelines.
    pub device: wgpu::Device,
    /// The command queue for submitting work to the GPU.
    pub queue: wgpu::Queue,
    /// Current surface configuration (format, size, present mode).
    pub config: wgpu::SurfaceConfiguration,
    /// Present modes the surface supports, in the adapter's order.
    pub present_modes: Vec<wgpu::PresentMode>,
}

impl GpuContext {
    /// Create a new GPU context from a winit window.
    ///
    /// This performs all wgpu initialization:
    /// 1. Creates a wgpu instance with primary backends (Vulkan, Metal, DX12)
    /// 2. Creates a surface for the window
    /// 3. Requests a suitable GPU adapter
    /// 4. Creates the logical device and command queue
    /// 5. Configures the surface with an sRGB format
    ///
    /// `vsync` selects `Fifo` presentation; otherwise the first non-blocking
    /// mode the surface supports is used.
    pub fn new(window: Arc<Window>, vsync: bool) -> Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .map_err(|e| RenderError::Initialization(format!("surface: {e}")))?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| RenderError::Initialization(format!("no suitable GPU adapter: {e}")))?;

        let info = adapter.get_info();
        log::info!("Using {} ({:?})", info.name, info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Penumbra Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(|e| RenderError::Initialization(format!("device: {e}")))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| RenderError::Initialization("surface has no formats".into()))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: present_mode(&surface_caps.present_modes, vsync),
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            present_modes: surface_caps.present_modes,
        })
    }

    /// Resize the surface to new dimensions.
    ///
    /// Ignores zero-sized dimensions, which occur while the window is minimized.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Switch presentation mode; reconfigures the surface only on change.
    pub fn set_vsync(&mut self, vsync: bool) {
        let mode = present_mode(&self.present_modes, vsync);
        if self.config.present_mode != mode {
            log::debug!("Present mode {:?} -> {:?}", self.config.present_mode, mode);
            self.config.present_mode = mode;
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Reapply the current configuration after the surface was lost.
    pub fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }

    /// Returns the current surface width in pixels.
    pub fn width(&self) -> u32 {
        self.config.width
    }

    /// Returns the current surface height in pixels.
    pub fn height(&self) -> u32 {
        self.config.height
    }

    /// Returns the current aspect ratio (width / height).
    pub fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height as f32
    }
}

fn present_mode(supported: &[wgpu::PresentMode], vsync: bool) -> wgpu::PresentMode {
    if vsync {
        return wgpu::PresentMode::Fifo;
    }
    [wgpu::PresentMode::Mailbox, wgpu::PresentMode::Immediate]
        .into_iter()
        .find(|mode| supported.contains(mode))
        .unwrap_or(wgpu::PresentMode::Fifo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::PresentMode;

    #[test]
    fn vsync_always_uses_fifo() {
        let supported = [PresentMode::Mailbox, PresentMode::Fifo];
        assert_eq!(present_mode(&supported, true), PresentMode::Fifo);
    }

    #[test]
    fn without_vsync_prefers_mailbox_then_immediate() {
        let all = [PresentMode::Fifo, PresentMode::Immediate, PresentMode::Mailbox];
        assert_eq!(present_mode(&all, false), PresentMode::Mailbox);
        let immediate = [PresentMode::Fifo, PresentMode::Immediate];
        assert_eq!(present_mode(&immediate, false), PresentMode::Immediate);
        assert_eq!(present_mode(&[PresentMode::Fifo], false), PresentMode::Fifo);
    }

    #[test]
    fn repeated_choice_is_stable() {
        // set_vsync compares against the mode chosen at startup.
        let supported = [PresentMode::Fifo, PresentMode::Mailbox];
        let initial = present_mode(&supported, false);
        assert_eq!(present_mode(&supported, false), initial);
        assert_ne!(initial, PresentMode::AutoNoVsync);
    }
}
