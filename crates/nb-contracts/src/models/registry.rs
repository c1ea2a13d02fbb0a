use std::fmt;

use indexmap::IndexMap;

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

/// Remote service (or local stand-in) that serves a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Gemini,
    /// Offline placeholder images; needs no credentials.
    Dryrun,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Dryrun => "dryrun",
        }
    }

    pub fn needs_api_key(self) -> bool {
        matches!(self, Self::Gemini)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Text-to-image.
    Generate,
    /// Image plus instruction to image.
    Edit,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Generate => "generate",
            Self::Edit => "edit",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub backend: BackendKind,
    pub capabilities: Vec<Capability>,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, backend: BackendKind, capabilities: &[Capability]) -> Self {
        Self {
            name: name.into(),
            backend,
            capabilities: capabilities.to_vec(),
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Known models in preference order.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        use Capability::{Edit, Generate};
        Self::from_specs([
            ModelSpec::new(DEFAULT_IMAGE_MODEL, BackendKind::Gemini, &[Generate, Edit]),
            ModelSpec::new(
                "gemini-2.5-flash-image-preview",
                BackendKind::Gemini,
                &[Generate, Edit],
            ),
            ModelSpec::new("gemini-3-pro-image-preview", BackendKind::Gemini, &[Generate, Edit]),
            ModelSpec::new("dryrun-image-1", BackendKind::Dryrun, &[Generate, Edit]),
        ])
    }
}

impl ModelRegistry {
    /// Later specs with a repeated name replace earlier ones in place.
    pub fn from_specs(specs: impl IntoIterator<Item = ModelSpec>) -> Self {
        Self {
            models: specs
                .into_iter()
                .map(|spec| (spec.name.clone(), spec))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    /// First registered model with `capability`.
    pub fn preferred(&self, capability: Capability) -> Option<&ModelSpec> {
        self.list().find(|spec| spec.supports(capability))
    }
}
