use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use nb_contracts::metadata::{sidecar_path, write_sidecar_to};
use nb_contracts::validation::validate_image_path;
use nb_contracts::{ArtifactMetadata, ImageFormat, NanoError, NanoResult, ProcessingOptions};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::transform::transform;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";
const MAX_DISAMBIGUATOR: usize = 10_000;

/// How an artifact should be named: a prefix plus its slot in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameHint {
    pub prefix: String,
    pub index: Option<usize>,
}

impl NameHint {
    pub fn single(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            index: None,
        }
    }

    /// Slot `index` of `count`; a lone image gets no suffix.
    pub fn indexed(prefix: impl Into<String>, index: usize, count: usize) -> Self {
        Self {
            prefix: prefix.into(),
            index: (count > 1).then_some(index),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistedArtifact {
    pub image_path: PathBuf,
    pub metadata_path: PathBuf,
    pub metadata: ArtifactMetadata,
    pub format: ImageFormat,
}

/// `<prefix>-<YYYY-MM-DDTHH-MM-SS>[-<index+1>].<ext>`, UTC.
pub fn file_name(prefix: &str, extension: &str, index: Option<usize>, at: DateTime<Utc>) -> String {
    let stamp = at.format(TIMESTAMP_FORMAT);
    match index {
        Some(index) => format!("{prefix}-{stamp}-{}.{extension}", index + 1),
        None => format!("{prefix}-{stamp}.{extension}"),
    }
}

/// A prefix is a file stem, optionally under one subdirectory.
pub fn validate_prefix(prefix: &str) -> NanoResult<()> {
    let invalid =
        |reason: &str| NanoError::validation(format!("Invalid name prefix '{prefix}': {reason}"));
    if prefix.trim().is_empty() {
        return Err(invalid("empty"));
    }
    if prefix.contains('\\') {
        return Err(invalid("use '/' to separate directories"));
    }
    let path = Path::new(prefix);
    let mut depth = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => return Err(invalid("'..' is not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("absolute prefixes are not allowed"))
            }
            Component::CurDir => return Err(invalid("'.' is not allowed")),
        }
    }
    if depth > 2 || prefix.ends_with('/') || prefix.contains("//") {
        return Err(invalid("at most one subdirectory is allowed"));
    }
    Ok(())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Reads a local input image after checking it exists and has a supported
/// extension. Nothing is read if either check fails.
pub fn load_image(path: &Path) -> NanoResult<Vec<u8>> {
    validate_image_path(path)?;
    // A path that exists but cannot be read as a file is reported as missing.
    std::fs::read(path).map_err(|err| {
        debug!(path = %path.display(), "input read failed: {err}");
        NanoError::InputNotFound(path.to_path_buf())
    })
}

/// Writes images and their sidecars under one output directory.
///
/// Directories are created on first use and remembered, so each is created
/// at most once per store.
#[derive(Debug)]
pub struct ArtifactStore {
    output_dir: PathBuf,
    ensured_dirs: HashSet<PathBuf>,
}

impl ArtifactStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ensured_dirs: HashSet::new(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn persist(
        &mut self,
        bytes: &[u8],
        hint: &NameHint,
        metadata: ArtifactMetadata,
        options: &ProcessingOptions,
    ) -> NanoResult<PersistedArtifact> {
        self.persist_at(bytes, hint, metadata, options, Utc::now())
    }

    pub fn persist_at(
        &mut self,
        bytes: &[u8],
        hint: &NameHint,
        mut metadata: ArtifactMetadata,
        options: &ProcessingOptions,
        at: DateTime<Utc>,
    ) -> NanoResult<PersistedArtifact> {
        validate_prefix(&hint.prefix)?;
        let transformed = transform(bytes, options)?;

        let planned = self.output_dir.join(file_name(
            &hint.prefix,
            transformed.format.extension(),
            hint.index,
            at,
        ));
        if let Some(parent) = planned.parent() {
            self.ensure_dir(parent)?;
        }
        let Slot {
            image_path,
            metadata_path,
            mut image_file,
            sidecar_file,
        } = reserve_slot(&planned)?;
        let written = image_file
            .write_all(&transformed.bytes)
            .and_then(|()| image_file.sync_all());
        drop(image_file);
        if let Err(err) = written {
            drop(sidecar_file);
            let _ = std::fs::remove_file(&image_path);
            let _ = std::fs::remove_file(&metadata_path);
            return Err(NanoError::persistence(&image_path, err));
        }

        metadata.restamp(at);
        metadata.insert("image_sha256", sha256_hex(&transformed.bytes));
        if let Err(err) = write_sidecar_to(sidecar_file, &metadata) {
            warn!(
                image = %image_path.display(),
                "sidecar write failed, keeping image: {err:#}"
            );
            return Err(NanoError::SidecarWrite {
                image_path,
                message: format!("{err:#}"),
            });
        }

        info!(
            image = %image_path.display(),
            format = %transformed.format,
            bytes = transformed.bytes.len(),
            "wrote artifact"
        );
        Ok(PersistedArtifact {
            image_path,
            metadata_path,
            metadata,
            format: transformed.format,
        })
    }

    /// Removes an image and its sidecar; missing files are ignored.
    pub fn discard(&self, image_path: &Path) {
        for path in [image_path.to_path_buf(), sidecar_path(image_path)] {
            match std::fs::remove_file(&path) {
                Ok(()) => warn!(path = %path.display(), "discarded artifact file"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(path = %path.display(), "failed to discard: {err}"),
            }
        }
    }

    fn ensure_dir(&mut self, dir: &Path) -> NanoResult<()> {
        if self.ensured_dirs.contains(dir) {
            return Ok(());
        }
        std::fs::create_dir_all(dir).map_err(|err| NanoError::persistence(dir, err))?;
        debug!(dir = %dir.display(), "output directory ready");
        self.ensured_dirs.insert(dir.to_path_buf());
        Ok(())
    }
}

/// Image and sidecar files created together, both empty.
struct Slot {
    image_path: PathBuf,
    metadata_path: PathBuf,
    image_file: File,
    sidecar_file: File,
}

/// Claims `planned` and its sidecar without clobbering either; falls back to
/// `<stem>_2.<ext>`, `<stem>_3.<ext>`, ... until both names are free.
fn reserve_slot(planned: &Path) -> NanoResult<Slot> {
    let stem = planned
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("image")
        .to_string();
    let extension = planned
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or("png")
        .to_string();
    for attempt in 1..=MAX_DISAMBIGUATOR {
        let image_path = if attempt == 1 {
            planned.to_path_buf()
        } else {
            planned.with_file_name(format!("{stem}_{attempt}.{extension}"))
        };
        let Some(image_file) = create_new(&image_path)? else {
            continue;
        };
        let metadata_path = sidecar_path(&image_path);
        match create_new(&metadata_path) {
            Ok(Some(sidecar_file)) => {
                return Ok(Slot {
                    image_path,
                    metadata_path,
                    image_file,
                    sidecar_file,
                })
            }
            Ok(None) => {
                drop(image_file);
                let _ = std::fs::remove_file(&image_path);
                debug!(sidecar = %metadata_path.display(), "sidecar name taken, trying next");
            }
            Err(err) => {
                drop(image_file);
                let _ = std::fs::remove_file(&image_path);
                return Err(err);
            }
        }
    }
    Err(NanoError::persistence(
        planned,
        "too many files with the same name",
    ))
}

/// `None` when something already exists at `path`.
fn create_new(path: &Path) -> NanoResult<Option<File>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(err) => Err(NanoError::persistence(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use nb_contracts::{ArtifactMetadata, ImageFormat, NanoError, ProcessingOptions, Resize};
    use serde_json::{json, Value};

    use super::{file_name, load_image, sha256_hex, validate_prefix, ArtifactStore, NameHint};
    use crate::transform::tests::noisy_png;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, second).unwrap()
    }

    #[test]
    fn file_names_carry_timestamp_and_one_based_suffix() {
        assert_eq!(
            file_name("nb-generate", "png", None, at(9)),
            "nb-generate-2024-03-05T07-08-09.png"
        );
        assert_eq!(
            file_name("nb-generate", "jpg", Some(0), at(9)),
            "nb-generate-2024-03-05T07-08-09-1.jpg"
        );
        assert_ne!(
            file_name("nb-generate", "png", None, at(9)),
            file_name("nb-generate", "png", None, at(10))
        );
        let batch: Vec<String> = (0..4)
            .map(|idx| file_name("nb", "png", NameHint::indexed("nb", idx, 4).index, at(1)))
            .collect();
        assert_eq!(
            batch,
            [
                "nb-2024-03-05T07-08-01-1.png",
                "nb-2024-03-05T07-08-01-2.png",
                "nb-2024-03-05T07-08-01-3.png",
                "nb-2024-03-05T07-08-01-4.png",
            ]
        );
        assert_eq!(NameHint::indexed("nb", 0, 1).index, None);
    }

    #[test]
    fn prefix_allows_one_subdirectory_only() {
        assert!(validate_prefix("nb-generate").is_ok());
        assert!(validate_prefix("story/nb-story-scene-1").is_ok());
        for bad in ["", "a/b/c", "../escape", "/abs", "story/", "./nb", "a\\b"] {
            assert!(
                matches!(validate_prefix(bad), Err(NanoError::Validation(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn raw_bytes_round_trip_through_load_and_persist() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("input.PNG");
        let png = noisy_png(10, 6);
        std::fs::write(&source, &png)?;

        let loaded = load_image(&source)?;
        let mut store = ArtifactStore::new(temp.path().join("out"));
        let artifact = store.persist(
            &loaded,
            &NameHint::single("nb-copy"),
            ArtifactMetadata::new("copy", "test-model"),
            &ProcessingOptions::default(),
        )?;
        assert_eq!(std::fs::read(&artifact.image_path)?, png);
        assert_eq!(artifact.format, ImageFormat::Png);
        assert_eq!(
            artifact.metadata.get("image_sha256"),
            Some(&json!(sha256_hex(&png)))
        );
        Ok(())
    }

    #[test]
    fn sidecar_is_flat_json_next_to_the_image() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = ArtifactStore::new(temp.path());
        let metadata = ArtifactMetadata::at("a red circle", "test-model", at(9))
            .with("seed", 42)
            .with_opt::<String>("style", None);
        let artifact = store.persist_at(
            &noisy_png(4, 4),
            &NameHint::single("nb-generate"),
            metadata,
            &ProcessingOptions::default(),
            at(9),
        )?;
        assert_eq!(
            artifact.metadata_path,
            temp.path().join("nb-generate-2024-03-05T07-08-09.json")
        );
        let sidecar: Value = serde_json::from_str(&std::fs::read_to_string(&artifact.metadata_path)?)?;
        assert_eq!(sidecar["prompt"], json!("a red circle"));
        assert_eq!(sidecar["model"], json!("test-model"));
        assert_eq!(sidecar["timestamp"], json!("2024-03-05T07:08:09.000Z"));
        assert_eq!(sidecar["seed"], json!(42));
        assert!(sidecar.get("style").is_none());
        assert!(sidecar["image_sha256"].is_string());
        Ok(())
    }

    #[test]
    fn same_second_collisions_get_a_disambiguator() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = ArtifactStore::new(temp.path());
        let hint = NameHint::single("nb-generate");
        let mut paths = Vec::new();
        for _ in 0..3 {
            let artifact = store.persist_at(
                &noisy_png(2, 2),
                &hint,
                ArtifactMetadata::new("p", "m"),
                &ProcessingOptions::default(),
                at(1),
            )?;
            paths.push(artifact.image_path);
        }
        let names: Vec<String> = paths
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "nb-generate-2024-03-05T07-08-01.png",
                "nb-generate-2024-03-05T07-08-01_2.png",
                "nb-generate-2024-03-05T07-08-01_3.png",
            ]
        );
        assert!(temp.path().join("nb-generate-2024-03-05T07-08-01_3.json").exists());
        Ok(())
    }

    #[test]
    fn extension_follows_the_encoding_written() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = ArtifactStore::new(temp.path());
        let options = ProcessingOptions::new(Some(ImageFormat::Webp), None, Some(Resize::square(3)))?;
        let artifact = store.persist(
            &noisy_png(6, 6),
            &NameHint::single("story/nb-story-scene-1"),
            ArtifactMetadata::new("p", "m"),
            &options,
        )?;
        assert_eq!(artifact.format, ImageFormat::Webp);
        assert_eq!(artifact.image_path.extension().unwrap(), "webp");
        assert_eq!(artifact.image_path.parent().unwrap(), temp.path().join("story"));
        let decoded = image::load_from_memory(&std::fs::read(&artifact.image_path)?)?;
        assert_eq!((decoded.width(), decoded.height()), (3, 3));
        Ok(())
    }

    #[test]
    fn transform_failure_creates_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let output = temp.path().join("out");
        let mut store = ArtifactStore::new(&output);
        let options = ProcessingOptions::new(Some(ImageFormat::Jpeg), None, None)?;
        let err = store
            .persist(
                b"not an image",
                &NameHint::single("nb"),
                ArtifactMetadata::new("p", "m"),
                &options,
            )
            .unwrap_err();
        assert!(matches!(err, NanoError::Transform(_)));
        assert!(!output.exists());
        Ok(())
    }

    #[test]
    fn formats_sharing_a_second_keep_separate_sidecars() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let hint = NameHint::single("nb-generate");
        let first = ArtifactStore::new(temp.path()).persist_at(
            &noisy_png(2, 2),
            &hint,
            ArtifactMetadata::new("first prompt", "m"),
            &ProcessingOptions::default(),
            at(9),
        )?;
        let jpeg = ProcessingOptions::new(Some(ImageFormat::Jpeg), None, None)?;
        let second = ArtifactStore::new(temp.path()).persist_at(
            &noisy_png(2, 2),
            &hint,
            ArtifactMetadata::new("second prompt", "m"),
            &jpeg,
            at(9),
        )?;

        assert_eq!(
            first.image_path,
            temp.path().join("nb-generate-2024-03-05T07-08-09.png")
        );
        assert_eq!(
            second.image_path,
            temp.path().join("nb-generate-2024-03-05T07-08-09_2.jpg")
        );
        assert_ne!(first.metadata_path, second.metadata_path);
        let kept: Value = serde_json::from_str(&std::fs::read_to_string(&first.metadata_path)?)?;
        assert_eq!(kept["prompt"], json!("first prompt"));
        let other: Value = serde_json::from_str(&std::fs::read_to_string(&second.metadata_path)?)?;
        assert_eq!(other["prompt"], json!("second prompt"));
        Ok(())
    }

    #[test]
    fn occupied_sidecar_name_moves_the_image_too() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        std::fs::write(temp.path().join("nb-2024-03-05T07-08-09.json"), "{}")?;
        let mut store = ArtifactStore::new(temp.path());
        let artifact = store.persist_at(
            &noisy_png(2, 2),
            &NameHint::single("nb"),
            ArtifactMetadata::new("p", "m"),
            &ProcessingOptions::default(),
            at(9),
        )?;
        assert_eq!(artifact.image_path, temp.path().join("nb-2024-03-05T07-08-09_2.png"));
        assert!(!temp.path().join("nb-2024-03-05T07-08-09.png").exists());
        assert_eq!(
            std::fs::read_to_string(temp.path().join("nb-2024-03-05T07-08-09.json"))?,
            "{}"
        );
        Ok(())
    }

    #[test]
    fn sidecar_timestamp_matches_the_name() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = ArtifactStore::new(temp.path());
        let artifact = store.persist_at(
            &noisy_png(2, 2),
            &NameHint::single("nb"),
            ArtifactMetadata::at("p", "m", at(1)),
            &ProcessingOptions::default(),
            at(9),
        )?;
        assert_eq!(artifact.image_path, temp.path().join("nb-2024-03-05T07-08-09.png"));
        assert_eq!(artifact.metadata.timestamp, "2024-03-05T07:08:09.000Z");
        let sidecar: Value = serde_json::from_str(&std::fs::read_to_string(&artifact.metadata_path)?)?;
        assert_eq!(sidecar["timestamp"], json!("2024-03-05T07:08:09.000Z"));
        Ok(())
    }

    #[test]
    fn discard_removes_image_and_sidecar() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = ArtifactStore::new(temp.path());
        let artifact = store.persist(
            &noisy_png(2, 2),
            &NameHint::single("nb"),
            ArtifactMetadata::new("p", "m"),
            &ProcessingOptions::default(),
        )?;
        store.discard(&artifact.image_path);
        assert!(!artifact.image_path.exists());
        assert!(!artifact.metadata_path.exists());
        store.discard(&artifact.image_path);
        Ok(())
    }

    #[test]
    fn load_image_checks_existence_then_extension() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let missing = temp.path().join("missing.png");
        assert!(matches!(load_image(&missing), Err(NanoError::InputNotFound(_))));

        let gif = temp.path().join("anim.gif");
        std::fs::write(&gif, b"GIF89a")?;
        assert!(matches!(load_image(&gif), Err(NanoError::UnsupportedFormat(_))));

        let jpeg = temp.path().join("photo.JPEG");
        std::fs::write(&jpeg, b"bytes")?;
        assert_eq!(load_image(&jpeg)?, b"bytes");
        Ok(())
    }
}
