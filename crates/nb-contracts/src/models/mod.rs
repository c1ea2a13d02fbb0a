mod registry;
mod selectors;

pub use registry::{BackendKind, Capability, ModelRegistry, ModelSpec, DEFAULT_IMAGE_MODEL};
pub use selectors::{ModelSelection, ModelSelector};
