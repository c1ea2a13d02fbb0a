//! Command pipelines: prompt assembly, backend calls, persistence.
//!
//! Multi-item commands (icons, story scenes, every image of a `generate`
//! batch) run their items strictly in order and apply the configured
//! [`FailurePolicy`] when one of them fails. Pre-flight checks (prompt,
//! sizes, input files) run before the first backend call.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use nb_contracts::events::{
    EventPayload, EventWriter, ARTIFACT_WRITTEN, GENERATION_COMPLETED, ITEM_FAILED,
};
use nb_contracts::prompts::{
    diagram_prompt, edit_prompt, generate_prompt, icon_prompt, pattern_prompt, restore_prompt,
    story_prompts, DiagramType, EditOperation, ImageStyle, PatternDensity, PromptTag,
    RestoreLevel,
};
use nb_contracts::validation::{
    validate_icon_sizes, validate_image_path, validate_prompt, validate_scenes,
};
use nb_contracts::{
    ArtifactMetadata, AspectRatio, GenerationRequest, NanoError, NanoResult, ProcessingOptions,
    Resize,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::client::GenerationClient;
use crate::payload::RawImagePayload;
use crate::store::{load_image, ArtifactStore, NameHint, PersistedArtifact};

pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_ICON_SIZES: [u32; 3] = [256, 512, 1024];
pub const DEFAULT_STORY_SCENES: usize = 4;
const RESTORE_METADATA_PROMPT: &str = "Image restoration";

/// What a multi-item command does when one item fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop at the first failure; files already written stay.
    #[default]
    Abort,
    /// Stop at the first failure and delete what this batch wrote.
    AbortAndDiscard,
    /// Run every item and report all failures at the end.
    ContinueOnError,
}

impl FailurePolicy {
    pub const ALL: [FailurePolicy; 3] = [
        FailurePolicy::Abort,
        FailurePolicy::AbortAndDiscard,
        FailurePolicy::ContinueOnError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::AbortAndDiscard => "abort-and-discard",
            Self::ContinueOnError => "continue",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = NanoError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "abort-and-discard" | "discard" => Ok(Self::AbortAndDiscard),
            "continue" | "continue-on-error" => Ok(Self::ContinueOnError),
            other => Err(NanoError::validation(format!(
                "Invalid failure policy: {other}. Valid options: abort, abort-and-discard, continue"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub policy: FailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            policy: FailurePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledArtifact {
    pub label: String,
    pub artifact: PersistedArtifact,
}

#[derive(Debug)]
pub struct ItemFailure {
    pub index: usize,
    pub label: String,
    pub error: NanoError,
}

/// Outcome of one command: what was written and what failed.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub total: usize,
    pub artifacts: Vec<LabeledArtifact>,
    pub failures: Vec<ItemFailure>,
    /// Images removed again under [`FailurePolicy::AbortAndDiscard`].
    pub discarded: Vec<PathBuf>,
}

impl BatchReport {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Collapses the report into the artifacts or the error to surface.
    ///
    /// A one-item command reports its own error; larger batches aggregate.
    pub fn into_result(self) -> NanoResult<Vec<LabeledArtifact>> {
        let failed = self.failures.len();
        let Some(first) = self.failures.into_iter().next() else {
            return Ok(self.artifacts);
        };
        if self.total <= 1 {
            return Err(first.error);
        }
        Err(NanoError::Batch {
            failed,
            total: self.total,
            first: Box::new(first.error),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateJob {
    pub prompt: String,
    pub count: usize,
    pub style: Option<ImageStyle>,
    pub aspect_ratio: Option<AspectRatio>,
    pub seed: Option<i64>,
    pub options: ProcessingOptions,
}

impl GenerateJob {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            count: 1,
            style: None,
            aspect_ratio: None,
            seed: None,
            options: ProcessingOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditJob {
    pub input: PathBuf,
    pub prompt: String,
    pub operation: Option<EditOperation>,
    pub mask: Option<PathBuf>,
    pub options: ProcessingOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestoreJob {
    pub input: PathBuf,
    pub level: RestoreLevel,
    pub denoise: bool,
    pub options: ProcessingOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IconJob {
    pub prompt: String,
    pub sizes: Vec<u32>,
    /// Format and quality only; each icon is resized to its own size.
    pub options: ProcessingOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternJob {
    pub prompt: String,
    pub tileable: bool,
    pub density: Option<PatternDensity>,
    pub colors: Vec<String>,
    pub options: ProcessingOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoryJob {
    pub prompt: String,
    pub scenes: usize,
    pub aspect_ratio: Option<AspectRatio>,
    pub options: ProcessingOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiagramJob {
    pub prompt: String,
    pub diagram_type: Option<DiagramType>,
    pub labeled: bool,
    pub options: ProcessingOptions,
}

/// Event sink that never fails the run it records.
#[derive(Debug, Clone, Default)]
struct Journal {
    writer: Option<EventWriter>,
}

impl Journal {
    fn emit(&self, event_type: &str, payload: Value) {
        let Some(writer) = &self.writer else {
            return;
        };
        let payload: EventPayload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        if let Err(err) = writer.emit(event_type, payload) {
            warn!(event = event_type, "failed to record event: {err:#}");
        }
    }
}

/// One unit of work inside a command: label plus the closure input.
struct Item<T> {
    label: String,
    input: T,
}

pub struct Pipeline {
    client: GenerationClient,
    store: ArtifactStore,
    policy: FailurePolicy,
    journal: Journal,
}

impl Pipeline {
    pub fn new(client: GenerationClient, config: PipelineConfig) -> Self {
        Self {
            client,
            store: ArtifactStore::new(config.output_dir),
            policy: config.policy,
            journal: Journal::default(),
        }
    }

    pub fn with_events(mut self, writer: Option<EventWriter>) -> Self {
        self.journal = Journal { writer };
        self
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    pub fn output_dir(&self) -> &Path {
        self.store.output_dir()
    }

    pub fn generate(&mut self, job: &GenerateJob) -> NanoResult<BatchReport> {
        validate_prompt(&job.prompt)?;
        let request = GenerationRequest::new(generate_prompt(&job.prompt, job.style), job.count)?
            .with_aspect_ratio(job.aspect_ratio)
            .with_seed(job.seed);
        let payloads = self.generate_all("generate", &request)?;

        let model = self.client.model().to_string();
        let metadata = || {
            ArtifactMetadata::new(&job.prompt, &model)
                .with_opt("seed", job.seed)
                .with_opt("style", job.style.map(PromptTag::as_str))
                .with_opt("aspect_ratio", job.aspect_ratio.map(AspectRatio::as_str))
        };
        self.persist_payloads("nb-generate", payloads, metadata, &job.options)
    }

    /// Free-text mode: the prompt is sent as typed and bytes are written raw.
    pub fn natural_language(&mut self, prompt: &str, count: usize) -> NanoResult<BatchReport> {
        validate_prompt(prompt)?;
        let request = GenerationRequest::new(prompt, count)?;
        let payloads = self.generate_all("nl", &request)?;
        let model = self.client.model().to_string();
        let metadata = || ArtifactMetadata::new(prompt, &model);
        self.persist_payloads("nb-nl", payloads, metadata, &ProcessingOptions::default())
    }

    pub fn edit(&mut self, job: &EditJob) -> NanoResult<BatchReport> {
        validate_prompt(&job.prompt)?;
        validate_image_path(&job.input)?;
        if let Some(mask) = &job.mask {
            validate_image_path(mask)?;
        }
        let base = load_image(&job.input)?;
        let mask = job.mask.as_deref().map(load_image).transpose()?;

        let request = GenerationRequest::single(edit_prompt(&job.prompt, job.operation))?
            .with_mask(mask);
        let metadata = ArtifactMetadata::new(&job.prompt, self.client.model())
            .with_opt("operation", job.operation.map(PromptTag::as_str))
            .with("input", job.input.display().to_string())
            .with_opt("mask", job.mask.as_ref().map(|mask| mask.display().to_string()));
        self.run_single("edit", "Edited image", |client, store| {
            let payload = client.edit(&base, &request)?;
            store.persist(
                &payload.decode()?,
                &NameHint::single("nb-edit"),
                metadata,
                &job.options,
            )
        })
    }

    pub fn restore(&mut self, job: &RestoreJob) -> NanoResult<BatchReport> {
        let base = load_image(&job.input)?;
        let request = GenerationRequest::single(restore_prompt(job.level, job.denoise))?;
        let metadata = ArtifactMetadata::new(RESTORE_METADATA_PROMPT, self.client.model())
            .with("quality", job.level.as_str())
            .with("denoise", job.denoise)
            .with("input", job.input.display().to_string());
        self.run_single("restore", "Restored image", |client, store| {
            let payload = client.edit(&base, &request)?;
            store.persist(
                &payload.decode()?,
                &NameHint::single("nb-restore"),
                metadata,
                &job.options,
            )
        })
    }

    /// One call per size, each resized to exactly `size x size`.
    pub fn icons(&mut self, job: &IconJob) -> NanoResult<BatchReport> {
        validate_prompt(&job.prompt)?;
        validate_icon_sizes(&job.sizes)?;
        let items = job
            .sizes
            .iter()
            .map(|&size| {
                let request = GenerationRequest::single(icon_prompt(&job.prompt, size))?
                    .with_aspect_ratio(Some(AspectRatio::Square));
                let options = job.options.with_resize(Resize::exact_square(size))?;
                Ok(Item {
                    label: format!("Icon {size}x{size}"),
                    input: (size, request, options),
                })
            })
            .collect::<NanoResult<Vec<_>>>()?;

        let Self {
            client,
            store,
            policy,
            journal,
        } = self;
        let model = client.model().to_string();
        Ok(run_batch(store, journal, *policy, items, |store, (size, request, options)| {
            let payload = generate_one(client, journal, "icon", &request)?;
            let metadata = ArtifactMetadata::new(&job.prompt, &model).with("size", size);
            store.persist(
                &payload.decode()?,
                &NameHint::single(format!("nb-icon-{size}x{size}")),
                metadata,
                &options,
            )
        }))
    }

    pub fn pattern(&mut self, job: &PatternJob) -> NanoResult<BatchReport> {
        validate_prompt(&job.prompt)?;
        let request = GenerationRequest::single(pattern_prompt(
            &job.prompt,
            job.tileable,
            job.density,
            &job.colors,
        ))?
        .with_aspect_ratio(Some(AspectRatio::Square));
        let colors = job
            .colors
            .iter()
            .map(|color| color.trim())
            .filter(|color| !color.is_empty())
            .map(|color| Value::String(color.to_string()))
            .collect::<Vec<_>>();
        let metadata = ArtifactMetadata::new(&job.prompt, self.client.model())
            .with("tileable", job.tileable)
            .with_opt("density", job.density.map(PromptTag::as_str))
            .with_opt("colors", (!colors.is_empty()).then_some(Value::Array(colors)));
        self.run_single("pattern", "Pattern", |client, store| {
            store.persist(
                &client_payload(client, &request)?.decode()?,
                &NameHint::single("nb-pattern"),
                metadata,
                &job.options,
            )
        })
    }

    /// One call per scene; the scene prompt is what the sidecar records.
    pub fn story(&mut self, job: &StoryJob) -> NanoResult<BatchReport> {
        validate_prompt(&job.prompt)?;
        validate_scenes(job.scenes)?;
        let aspect_ratio = job.aspect_ratio.unwrap_or(AspectRatio::Landscape16x9);
        let items = story_prompts(&job.prompt, job.scenes)
            .into_iter()
            .enumerate()
            .map(|(idx, prompt)| {
                let request =
                    GenerationRequest::single(prompt)?.with_aspect_ratio(Some(aspect_ratio));
                Ok(Item {
                    label: format!("Scene {}", idx + 1),
                    input: (idx + 1, request),
                })
            })
            .collect::<NanoResult<Vec<_>>>()?;

        let total_scenes = job.scenes;
        let Self {
            client,
            store,
            policy,
            journal,
        } = self;
        let model = client.model().to_string();
        Ok(run_batch(store, journal, *policy, items, |store, (scene, request)| {
            let payload = generate_one(client, journal, "story", &request)?;
            let metadata = ArtifactMetadata::new(request.prompt(), &model)
                .with("scene", scene)
                .with("total_scenes", total_scenes);
            store.persist(
                &payload.decode()?,
                &NameHint::single(format!("nb-story-scene-{scene}")),
                metadata,
                &job.options,
            )
        }))
    }

    pub fn diagram(&mut self, job: &DiagramJob) -> NanoResult<BatchReport> {
        validate_prompt(&job.prompt)?;
        let request =
            GenerationRequest::single(diagram_prompt(&job.prompt, job.diagram_type, job.labeled))?
                .with_aspect_ratio(Some(AspectRatio::Landscape16x9));
        let type_name = job.diagram_type.map(PromptTag::as_str).unwrap_or("general");
        let metadata = ArtifactMetadata::new(&job.prompt, self.client.model())
            .with("diagram_type", type_name)
            .with("labeled", job.labeled);
        let prefix = format!("nb-diagram-{type_name}");
        self.run_single("diagram", "Diagram", |client, store| {
            store.persist(
                &client_payload(client, &request)?.decode()?,
                &NameHint::single(prefix),
                metadata,
                &job.options,
            )
        })
    }

    fn generate_all(
        &self,
        command: &str,
        request: &GenerationRequest,
    ) -> NanoResult<Vec<RawImagePayload>> {
        let payloads = self.client.generate(request)?;
        self.journal.emit(
            GENERATION_COMPLETED,
            json!({ "command": command, "images": payloads.len() }),
        );
        Ok(payloads)
    }

    fn persist_payloads(
        &mut self,
        prefix: &str,
        payloads: Vec<RawImagePayload>,
        metadata: impl Fn() -> ArtifactMetadata,
        options: &ProcessingOptions,
    ) -> NanoResult<BatchReport> {
        let count = payloads.len();
        let items = payloads
            .into_iter()
            .enumerate()
            .map(|(idx, payload)| Item {
                label: format!("Image {}", idx + 1),
                input: (idx, payload),
            })
            .collect();
        let Self {
            store,
            policy,
            journal,
            ..
        } = self;
        Ok(run_batch(store, journal, *policy, items, |store, (idx, payload)| {
            store.persist(
                &payload.decode()?,
                &NameHint::indexed(prefix, idx, count),
                metadata(),
                options,
            )
        }))
    }

    fn run_single(
        &mut self,
        command: &str,
        label: &str,
        produce: impl FnOnce(&GenerationClient, &mut ArtifactStore) -> NanoResult<PersistedArtifact>,
    ) -> NanoResult<BatchReport> {
        let Self {
            client,
            store,
            policy,
            journal,
        } = self;
        let item = Item {
            label: label.to_string(),
            input: produce,
        };
        Ok(run_batch(store, journal, *policy, vec![item], |store, produce| {
            let artifact = produce(client, store)?;
            journal.emit(GENERATION_COMPLETED, json!({ "command": command, "images": 1 }));
            Ok(artifact)
        }))
    }
}

fn client_payload(client: &GenerationClient, request: &GenerationRequest) -> NanoResult<RawImagePayload> {
    client
        .generate(request)?
        .into_iter()
        .next()
        .ok_or(NanoError::NoImageInResponse)
}

fn generate_one(
    client: &GenerationClient,
    journal: &Journal,
    command: &str,
    request: &GenerationRequest,
) -> NanoResult<RawImagePayload> {
    let payload = client_payload(client, request)?;
    journal.emit(GENERATION_COMPLETED, json!({ "command": command, "images": 1 }));
    Ok(payload)
}

/// Runs items in order and applies `policy` to failures.
fn run_batch<T>(
    store: &mut ArtifactStore,
    journal: &Journal,
    policy: FailurePolicy,
    items: Vec<Item<T>>,
    mut produce: impl FnMut(&mut ArtifactStore, T) -> NanoResult<PersistedArtifact>,
) -> BatchReport {
    let mut report = BatchReport::new(items.len());
    for (index, Item { label, input }) in items.into_iter().enumerate() {
        match produce(store, input) {
            Ok(artifact) => {
                journal.emit(
                    ARTIFACT_WRITTEN,
                    json!({
                        "label": label,
                        "image_path": artifact.image_path.display().to_string(),
                        "metadata_path": artifact.metadata_path.display().to_string(),
                        "format": artifact.format.extension(),
                    }),
                );
                report.artifacts.push(LabeledArtifact { label, artifact });
            }
            Err(error) => {
                warn!(item = %label, "item failed: {error}");
                journal.emit(
                    ITEM_FAILED,
                    json!({ "index": index, "label": label, "error": error.to_string() }),
                );
                let orphan = match &error {
                    NanoError::SidecarWrite { image_path, .. } => Some(image_path.clone()),
                    _ => None,
                };
                report.failures.push(ItemFailure {
                    index,
                    label,
                    error,
                });
                match policy {
                    FailurePolicy::ContinueOnError => continue,
                    FailurePolicy::Abort => break,
                    FailurePolicy::AbortAndDiscard => {
                        let written = report
                            .artifacts
                            .drain(..)
                            .map(|labeled| labeled.artifact.image_path);
                        let doomed: Vec<PathBuf> = written.chain(orphan).collect();
                        for image_path in &doomed {
                            store.discard(image_path);
                        }
                        info!(files = doomed.len(), "discarded batch after failure");
                        report.discarded = doomed;
                        break;
                    }
                }
            }
        }
    }
    report
}
