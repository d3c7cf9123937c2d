//! Error types for the renderer.
//!
//! Errors fall into three groups. Setup errors (missing features, shader
//! compilation, device creation, bad configuration) are fatal: the renderer
//! must not be used after one of them. Capacity and misuse errors only affect
//! the single call that produced them and leave the instance store untouched.
//! Surface errors are per frame and usually recoverable by reconfiguring.

use thiserror::Error;

use crate::data_structures::geometry::GeometryId;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no suitable graphics adapter: {0}")]
    AdapterNotFound(String),

    #[error("device creation failed: {0}")]
    DeviceCreation(String),

    #[error("surface creation failed: {0}")]
    SurfaceCreation(String),

    #[error("required graphics feature missing: {0}")]
    MissingFeature(String),

    #[error("shader program `{program}` failed to compile: {message}")]
    ShaderCompilation { program: String, message: String },

    #[error("shader program `{program}` does not declare `{name}`")]
    MissingShaderInput { program: String, name: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("geometry {geometry} is full: at most {max} instances")]
    CapacityExceeded { geometry: GeometryId, max: usize },

    #[error("instance {index} of geometry {geometry} is past the {live} live instances")]
    InstanceOutOfRange {
        geometry: GeometryId,
        index: usize,
        live: usize,
    },

    #[error("geometry {0} is not registered")]
    UnknownGeometry(GeometryId),

    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
}

impl RenderError {
    /// Whether the renderer can keep going after this error.
    ///
    /// Per-operation misuse and surface hiccups are recoverable, anything raised
    /// during setup is not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RenderError::CapacityExceeded { .. }
                | RenderError::InstanceOutOfRange { .. }
                | RenderError::UnknownGeometry(_)
                | RenderError::Surface(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
