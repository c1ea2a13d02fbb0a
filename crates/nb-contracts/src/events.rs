use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

pub const RUN_STARTED: &str = "run_started";
pub const GENERATION_COMPLETED: &str = "generation_completed";
pub const ARTIFACT_WRITTEN: &str = "artifact_written";
pub const ITEM_FAILED: &str = "item_failed";
pub const RUN_FINISHED: &str = "run_finished";

const RESERVED_KEYS: [&str; 3] = ["type", "run_id", "ts"];

/// Append-only journal of one command run, one compact JSON object per line.
///
/// Every line starts with `type`, `run_id` and `ts`. Payload keys with those
/// names are dropped. The file is opened on the first event, so a run that
/// never emits leaves nothing behind. Clones share the same handle.
#[derive(Debug, Clone)]
pub struct EventWriter {
    path: Arc<PathBuf>,
    run_id: Arc<str>,
    sink: Arc<Mutex<Option<File>>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            path: Arc::new(path.into()),
            run_id: Arc::from(run_id.into()),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    /// Journal with a fresh random run id.
    pub fn for_new_run(path: impl Into<PathBuf>) -> Self {
        Self::new(path, format!("run-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let event = self.envelope(event_type, payload);
        let mut sink = self
            .sink
            .lock()
            .map_err(|_| anyhow::anyhow!("event journal lock poisoned"))?;
        if sink.is_none() {
            *sink = Some(self.open()?);
        }
        if let Some(file) = sink.as_mut() {
            let mut out = BufWriter::new(file);
            serde_json::to_writer(&mut out, &event)?;
            out.write_all(b"\n")?;
            out.flush()
                .with_context(|| format!("failed to append to {}", self.path.display()))?;
        }
        Ok(event)
    }

    fn envelope(&self, event_type: &str, payload: EventPayload) -> Value {
        let mut event = Map::with_capacity(payload.len() + RESERVED_KEYS.len());
        event.insert("type".into(), event_type.into());
        event.insert("run_id".into(), self.run_id().into());
        event.insert(
            "ts".into(),
            Utc::now()
                .to_rfc3339_opts(SecondsFormat::Micros, true)
                .into(),
        );
        event.extend(
            payload
                .into_iter()
                .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str())),
        );
        Value::Object(event)
    }

    fn open(&self) -> anyhow::Result<File> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_path())
            .with_context(|| format!("failed to open event journal {}", self.path.display()))
    }
}
