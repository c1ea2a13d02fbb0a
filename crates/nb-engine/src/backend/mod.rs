mod dryrun;
mod gemini;

use nb_contracts::models::{BackendKind, ModelSpec};
use nb_contracts::{AspectRatio, NanoError, NanoResult};
use serde_json::Value;

use crate::config::BackendConfig;

pub use dryrun::DryrunBackend;
pub use gemini::GeminiBackend;

/// Inline binary input sent alongside the prompt (base image, mask).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub mime_type: String,
    /// Standard base64.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRequest {
    pub model: String,
    pub prompt: String,
    pub attachments: Vec<Attachment>,
    pub aspect_ratio: Option<AspectRatio>,
    pub seed: Option<i64>,
}

/// One remote generation call.
///
/// Implementations return the raw response document untouched; shape checks
/// belong to the payload extractor. Transport, auth, quota and non-JSON
/// failures are reported as [`NanoError::Backend`] and never retried.
pub trait ImageBackend: Send + Sync {
    fn name(&self) -> &str;
    fn call(&self, request: &BackendRequest) -> NanoResult<Value>;
}

pub fn backend_for_model(
    model: &ModelSpec,
    config: &BackendConfig,
) -> NanoResult<Box<dyn ImageBackend>> {
    Ok(match model.backend {
        BackendKind::Gemini => Box::new(GeminiBackend::new(config)?),
        BackendKind::Dryrun => Box::new(DryrunBackend::default()),
    })
}

/// Whether the backend serving `model` needs the API key.
pub fn requires_api_key(model: &ModelSpec) -> bool {
    model.backend.needs_api_key()
}

#[cfg(test)]
mod tests {
    use nb_contracts::models::ModelRegistry;
    use nb_contracts::NanoError;

    use super::{backend_for_model, requires_api_key};
    use crate::config::BackendConfig;

    #[test]
    fn gemini_models_need_a_key_and_dryrun_does_not() {
        let registry = ModelRegistry::default();
        let gemini = registry.get("gemini-2.5-flash-image").cloned().unwrap();
        let dryrun = registry.get("dryrun-image-1").cloned().unwrap();
        let config = BackendConfig::new(None, None);

        assert!(requires_api_key(&gemini));
        assert!(matches!(
            backend_for_model(&gemini, &config).err(),
            Some(NanoError::Config(_))
        ));
        assert!(!requires_api_key(&dryrun));
        let backend = backend_for_model(&dryrun, &config).unwrap();
        assert_eq!(backend.name(), "dryrun");
    }
}
