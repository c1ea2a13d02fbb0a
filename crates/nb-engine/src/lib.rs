pub mod backend;
pub mod client;
pub mod config;
pub mod payload;
pub mod pipeline;
pub mod store;
pub mod transform;

pub use backend::{backend_for_model, requires_api_key, ImageBackend};
pub use client::GenerationClient;
pub use config::BackendConfig;
pub use payload::RawImagePayload;
pub use pipeline::{
    BatchReport, DiagramJob, EditJob, FailurePolicy, GenerateJob, IconJob, LabeledArtifact,
    PatternJob, Pipeline, PipelineConfig, RestoreJob, StoryJob,
};
pub use store::{ArtifactStore, NameHint, PersistedArtifact};
