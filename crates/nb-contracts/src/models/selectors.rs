use super::registry::{Capability, ModelRegistry, ModelSpec};
use crate::error::{NanoError, NanoResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    /// Name given on the command line, trimmed.
    pub requested: Option<String>,
    /// Set when `requested` could not be honoured.
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: ModelRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Resolves `requested` against the registry.
    ///
    /// An unknown or incapable model falls back to the preferred one and says
    /// why. Omitting the name is not a fallback.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: Capability,
    ) -> NanoResult<ModelSelection> {
        let requested = requested
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let fallback_reason = match requested.as_deref() {
            None => None,
            Some(name) => match self.registry.get(name) {
                Some(spec) if spec.supports(capability) => {
                    return Ok(ModelSelection {
                        model: spec.clone(),
                        requested,
                        fallback_reason: None,
                    });
                }
                Some(_) => Some(format!("Model '{name}' cannot {capability} images.")),
                None => Some(format!("Unknown model '{name}'.")),
            },
        };

        let model = self.registry.preferred(capability).cloned().ok_or_else(|| {
            NanoError::Config(format!("No configured model can {capability} images"))
        })?;
        Ok(ModelSelection {
            model,
            requested,
            fallback_reason,
        })
    }
}
