//! Error type shared by every fallible operation in the renderer.

use thiserror::Error;

/// Errors produced while creating GPU resources or running a frame.
///
/// Configuration and creation errors are fatal: callers are expected to abort
/// startup when they see one. [`RenderError::Surface`] is the only variant the
/// app loop treats as recoverable.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Shadow map resolution must be positive, got {0}")]
    InvalidShadowResolution(u32),
    #[error("Shadow map resolution {resolution} exceeds the device limit of {max}")]
    ShadowResolutionTooLarge { resolution: u32, max: u32 },
    #[error("Shadow map resolution {found} does not match the array resolution {expected}")]
    ShadowResolutionMismatch { expected: u32, found: u32 },
    #[error("At most {max} shadow maps are supported")]
    TooManyShadowMaps { max: usize },
    #[error("Light index {0} is out of range")]
    InvalidLightIndex(usize),
    #[error("Shadow casters must be directional lights (light {0} is not)")]
    NotDirectional(usize),
    #[error("Light {0} already casts shadows")]
    DuplicateShadowCaster(usize),
    #[error("Light {light} is past the first {max} lights the shaders receive")]
    ShadowLightNotUploaded { light: usize, max: usize },
    #[error("Camera index {0} is out of range")]
    InvalidCameraIndex(usize),
    #[error("Failed to create {label}: {reason}")]
    ResourceCreation { label: String, reason: String },
    #[error("Unknown {0} handle")]
    UnknownHandle(&'static str),
    #[error("Cubemap faces must all be {expected:?}, face {face} is {found:?}")]
    CubemapFaceMismatch {
        face: &'static str,
        expected: (u32, u32),
        found: (u32, u32),
    },
    #[error("Failed to initialize renderer: {0}")]
    Initialization(String),
    #[error("Surface error: {0}")]
    Surface(String),
    #[error("Device lost")]
    DeviceLost,
    #[error("Failed to load image: {0}")]
    Image(#[from] image::ImageError),
    #[error("Event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
}

impl RenderError {
    pub(crate) fn creation(label: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ResourceCreation {
            label: label.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
