//! Durable stage records.
//!
//! A [`StageRecord`] holds a stage's outputs so far, parallel-indexed to
//! its work items, plus the index to resume from. The stage runner writes
//! it through a [`CheckpointStore`] after every item, and awaits the write
//! before starting the next one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::provenance::RequestRecord;
use crate::stage::ItemOutput;
use crate::PipelineError;

/// Lifecycle of one stage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StageState {
    NotStarted,
    Running,
    Completed,
    /// Stopped at the first failing item.
    Aborted { failed_index: usize },
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageState::NotStarted => f.write_str("not started"),
            StageState::Running => f.write_str("running"),
            StageState::Completed => f.write_str("completed"),
            StageState::Aborted { failed_index } => write!(f, "aborted at item {}", failed_index),
        }
    }
}

/// Persisted progress and results of a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub state: StageState,
    /// Outputs in item order.
    pub results: Vec<String>,
    /// Index of the next item to process. Equals `results.len()`.
    pub resume_index: usize,
    /// Requests issued per item, parallel to `results`.
    #[serde(default)]
    pub requests: Vec<Vec<RequestRecord>>,
    /// Number of items the stage was last run over.
    #[serde(default)]
    pub total_items: usize,
    pub updated_at: DateTime<Utc>,
}

impl StageRecord {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            state: StageState::NotStarted,
            results: Vec::new(),
            resume_index: 0,
            requests: Vec::new(),
            total_items: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Append one item's output and advance the resume index.
    pub fn push(&mut self, output: ItemOutput) {
        self.results.push(output.text);
        self.requests.push(output.requests);
        self.resume_index = self.results.len();
        self.touch();
    }

    /// Keep only the first `len` entries.
    pub fn truncate(&mut self, len: usize) {
        self.results.truncate(len);
        self.requests.truncate(len);
        self.resume_index = self.results.len();
        self.touch();
    }

    pub fn set_state(&mut self, state: StageState) {
        self.state = state;
        self.touch();
    }

    /// Every recorded request, in issue order.
    pub fn all_requests(&self) -> Vec<RequestRecord> {
        self.requests.iter().flatten().cloned().collect()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Key-value persistence of stage records, addressed by stage name.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, stage: &str) -> Result<Option<StageRecord>>;
    async fn save(&self, record: &StageRecord) -> Result<()>;
    async fn clear(&self, stage: &str) -> Result<()>;
}

/// One pretty-printed JSON file per stage under a directory.
///
/// Writes go to a temporary file that is then renamed over the record, so
/// a crash mid-write leaves the previous record intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `stage`. Characters unsafe in file names become `_`.
    pub fn path_for(&self, stage: &str) -> PathBuf {
        let name: String = stage
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

fn checkpoint_err(action: &str, path: &Path, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Checkpoint(format!("{} {}: {}", action, path.display(), e))
}

#[async_trait]
impl CheckpointStore for JsonFileStore {
    async fn load(&self, stage: &str) -> Result<Option<StageRecord>> {
        let path = self.path_for(stage);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(checkpoint_err("cannot read", &path, e)),
        };
        let record = serde_json::from_str(&raw).map_err(|e| checkpoint_err("corrupt record", &path, e))?;
        Ok(Some(record))
    }

    async fn save(&self, record: &StageRecord) -> Result<()> {
        let path = self.path_for(&record.stage);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| checkpoint_err("cannot create", &self.dir, e))?;

        let json = serde_json::to_vec_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| checkpoint_err("cannot write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| checkpoint_err("cannot replace", &path, e))?;

        tracing::trace!(path = %path.display(), entries = record.len(), "checkpoint written");
        Ok(())
    }

    async fn clear(&self, stage: &str) -> Result<()> {
        let path = self.path_for(stage);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(checkpoint_err("cannot remove", &path, e)),
        }
    }
}

/// In-process store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, StageRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StageRecord>>> {
        self.records
            .lock()
            .map_err(|_| PipelineError::Checkpoint("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load(&self, stage: &str) -> Result<Option<StageRecord>> {
        Ok(self.lock()?.get(stage).cloned())
    }

    async fn save(&self, record: &StageRecord) -> Result<()> {
        self.lock()?.insert(record.stage.clone(), record.clone());
        Ok(())
    }

    async fn clear(&self, stage: &str) -> Result<()> {
        self.lock()?.remove(stage);
        Ok(())
    }
}
