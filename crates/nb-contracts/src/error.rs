use std::path::PathBuf;

use thiserror::Error;

pub type NanoResult<T> = Result<T, NanoError>;

/// Every failure the generation pipeline can surface.
///
/// Validation-class errors are raised before any backend call or disk write.
/// Backend and extraction errors abort the logical request they belong to.
/// Transform and persistence errors are scoped to a single artifact.
#[derive(Debug, Error)]
pub enum NanoError {
    #[error("{0}")]
    Validation(String),

    #[error("Image file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("{0}")]
    Config(String),

    #[error("Image generation failed: {0}")]
    Backend(String),

    #[error("No image generated - invalid response structure ({0})")]
    MalformedResponse(String),

    #[error("No image generated - no valid image data in response")]
    NoImageInResponse,

    #[error("call {call} of {total} failed: {source}")]
    Generation {
        call: usize,
        total: usize,
        #[source]
        source: Box<NanoError>,
    },

    #[error("Image processing failed: {0}")]
    Transform(String),

    #[error("failed to write {}: {message}", path.display())]
    Persistence { path: PathBuf, message: String },

    #[error("image kept at {} but its metadata could not be written: {message}", image_path.display())]
    SidecarWrite { image_path: PathBuf, message: String },

    #[error("{failed} of {total} items failed; first failure: {first}")]
    Batch {
        failed: usize,
        total: usize,
        first: Box<NanoError>,
    },
}

impl NanoError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn persistence(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Persistence {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Strips aggregate wrappers and returns the error that actually happened.
    pub fn root(&self) -> &NanoError {
        match self {
            Self::Generation { source, .. } => source.root(),
            Self::Batch { first, .. } => first.root(),
            other => other,
        }
    }

    /// True for errors raised before any side effect took place.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self.root(),
            Self::Validation(_)
                | Self::InputNotFound(_)
                | Self::UnsupportedFormat(_)
                | Self::Config(_)
        )
    }
}
