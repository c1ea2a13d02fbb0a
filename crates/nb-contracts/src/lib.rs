pub mod error;
pub mod events;
pub mod metadata;
pub mod models;
pub mod prompts;
pub mod requests;
pub mod validation;

pub use error::{NanoError, NanoResult};
pub use metadata::ArtifactMetadata;
pub use requests::{AspectRatio, GenerationRequest, ImageFormat, ProcessingOptions, Resize};
