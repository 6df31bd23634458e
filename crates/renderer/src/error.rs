use std::fmt;
use std::path::PathBuf;

/// Shader stage a diagnostic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Vertex,
    Fragment,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Vertex => f.write_str("vertex"),
            StageKind::Fragment => f.write_str("fragment"),
        }
    }
}

/// Reasons an offscreen target fails its completeness check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IncompleteTarget {
    #[error("incomplete attachment: {0}")]
    IncompleteAttachment(String),
    #[error("missing attachment: {0}")]
    MissingAttachment(String),
    #[error("incomplete draw buffer: {0}")]
    IncompleteDrawBuffer(String),
    #[error("incomplete read buffer: {0}")]
    IncompleteReadBuffer(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown status: {0}")]
    Unknown(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error("failed to decode noise texture at {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("noise texture at {} has zero size", path.display())]
    Empty { path: PathBuf },
}

/// Every failure the pipeline can report. All of them are fatal for the run;
/// the caller decides how to terminate.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to compile {stage} shader for program '{program}':\n{log}")]
    Compile {
        program: String,
        stage: StageKind,
        log: String,
    },
    #[error("failed to link program '{program}':\n{log}")]
    Link { program: String, log: String },
    #[error("invalid frame buffer: {0}")]
    Incomplete(#[from] IncompleteTarget),
    #[error("GPU error at '{checkpoint}': {message}")]
    Gpu {
        checkpoint: &'static str,
        message: String,
    },
    #[error(transparent)]
    Texture(#[from] TextureError),
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("host surface: {0}")]
    Host(String),
    #[error("invalid pipeline: {0}")]
    Pipeline(String),
}
