use std::env;

use nb_contracts::{NanoError, NanoResult};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Backend settings resolved once at process start and passed by reference.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BackendConfig {
    api_key: Option<String>,
    api_base: Option<String>,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl BackendConfig {
    pub fn new(api_key: Option<String>, api_base: Option<String>) -> Self {
        Self {
            api_key: api_key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            api_base: api_base
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty()),
        }
    }

    /// `GEMINI_API_KEY` wins over `GOOGLE_API_KEY`; blank values count as unset.
    pub fn from_env() -> Self {
        Self::new(
            non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY")),
            non_empty_env("GEMINI_API_BASE"),
        )
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn api_key(&self) -> NanoResult<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            NanoError::Config(
                "API key not found. Please set GEMINI_API_KEY or GOOGLE_API_KEY environment variable."
                    .to_string(),
            )
        })
    }

    pub fn api_base(&self) -> &str {
        self.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
