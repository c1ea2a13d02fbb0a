use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SIDECAR_EXTENSION: &str = "json";

/// Flat provenance record written next to every image.
///
/// `prompt`, `model` and `timestamp` are always present. Command-specific
/// fields are flattened into the same JSON object; absent optional fields are
/// left out rather than written as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub prompt: String,
    pub model: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ArtifactMetadata {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self::at(prompt, model, Utc::now())
    }

    pub fn at(prompt: impl Into<String>, model: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            timestamp: stamp(at),
            fields: Map::new(),
        }
    }

    /// Replaces the timestamp, e.g. with the instant an artifact was named.
    pub fn restamp(&mut self, at: DateTime<Utc>) {
        self.timestamp = stamp(at);
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_opt<T: Into<Value>>(mut self, key: &str, value: Option<T>) -> Self {
        if let Some(value) = value {
            self.insert(key, value);
        }
        self
    }

    /// Reserved keys are never shadowed by command fields.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        if matches!(key, "prompt" | "model" | "timestamp") {
            return;
        }
        self.fields.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// `<dir>/<base>.<ext>` becomes `<dir>/<base>.json`.
pub fn sidecar_path(image_path: &Path) -> PathBuf {
    image_path.with_extension(SIDECAR_EXTENSION)
}

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Pretty JSON into an already opened (typically freshly reserved) file.
pub fn write_sidecar_to(out: impl Write, metadata: &ArtifactMetadata) -> anyhow::Result<()> {
    let mut out = BufWriter::new(out);
    serde_json::to_writer_pretty(&mut out, metadata)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    use super::{sidecar_path, write_sidecar_to, ArtifactMetadata};

    #[test]
    fn sidecar_is_a_flat_object_without_absent_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nb-generate-2026-02-19T00-00-00.json");
        let at = Utc.with_ymd_and_hms(2026, 2, 19, 0, 0, 0).unwrap();
        let metadata = ArtifactMetadata::at("hello", "gemini-2.5-flash-image", at)
            .with_opt("seed", Some(7))
            .with_opt::<i64>("missing", None)
            .with("scene", 2);
        write_sidecar_to(std::fs::File::create(&path)?, &metadata)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["prompt"], json!("hello"));
        assert_eq!(parsed["model"], json!("gemini-2.5-flash-image"));
        assert_eq!(parsed["timestamp"], json!("2026-02-19T00:00:00.000Z"));
        assert_eq!(parsed["seed"], json!(7));
        assert_eq!(parsed["scene"], json!(2));
        assert!(parsed.get("missing").is_none());
        assert!(parsed.get("fields").is_none());
        Ok(())
    }

    #[test]
    fn restamp_replaces_only_the_timestamp() {
        let first = Utc.with_ymd_and_hms(2026, 2, 19, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 2, 19, 0, 0, 1).unwrap();
        let mut metadata = ArtifactMetadata::at("hello", "m", first).with("seed", 1);
        metadata.restamp(later);
        assert_eq!(metadata.timestamp, "2026-02-19T00:00:01.000Z");
        assert_eq!(metadata.prompt, "hello");
        assert_eq!(metadata.get("seed"), Some(&json!(1)));
    }

    #[test]
    fn reserved_keys_cannot_be_overwritten() {
        let metadata = ArtifactMetadata::new("original", "m").with("prompt", "other");
        assert_eq!(metadata.prompt, "original");
        assert!(metadata.get("prompt").is_none());
    }

    #[test]
    fn sidecar_path_swaps_the_image_extension() {
        assert_eq!(
            sidecar_path(Path::new("out/nb-icon-16x16-2026.webp")),
            Path::new("out/nb-icon-16x16-2026.json")
        );
    }
}
