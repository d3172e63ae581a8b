/// Core error types for the vblit compositor.
use std::fmt;

/// A specialized Result type for vblit operations.
pub type VblitResult<T> = Result<T, VblitError>;

/// Shader stage a compile error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
            ShaderStage::Compute => write!(f, "compute"),
        }
    }
}

/// Top-level error type encompassing every vblit subsystem.
#[derive(Debug, thiserror::Error)]
pub enum VblitError {
    #[error("unsupported color format {0:#x}")]
    UnsupportedFormat(u32),

    #[error("image import failed: {message} (error {code:#x})")]
    ImportFailed { code: u32, message: String },

    #[error("{stage} shader failed to compile: {log}")]
    ShaderCompileFailed { stage: ShaderStage, log: String },

    #[error("shader program failed to link: {log}")]
    ShaderLinkFailed { log: String },

    #[error("{context} (error {code:#x})")]
    GpuCallFailed { code: u32, context: String },

    #[error("surface {0:#018x} is not registered")]
    SurfaceNotFound(u64),

    #[error("fence wait failed: {0}")]
    FenceWaitFailed(String),

    #[error("graphics context error: {0}")]
    Context(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl VblitError {
    /// Create a GPU call error with a human readable context.
    pub fn gpu(code: u32, context: impl Into<String>) -> Self {
        VblitError::GpuCallFailed {
            code,
            context: context.into(),
        }
    }

    /// Create an image import error.
    pub fn import(code: u32, message: impl Into<String>) -> Self {
        VblitError::ImportFailed {
            code,
            message: message.into(),
        }
    }

    /// Create a shader compile error for the given stage.
    pub fn compile(stage: ShaderStage, log: impl Into<String>) -> Self {
        VblitError::ShaderCompileFailed {
            stage,
            log: log.into(),
        }
    }

    /// Whether this error can only happen while building an engine.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            VblitError::ShaderCompileFailed { .. }
                | VblitError::ShaderLinkFailed { .. }
                | VblitError::Context(_)
        )
    }
}

impl From<toml::de::Error> for VblitError {
    fn from(err: toml::de::Error) -> Self {
        VblitError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for VblitError {
    fn from(err: toml::ser::Error) -> Self {
        VblitError::Config(err.to_string())
    }
}
