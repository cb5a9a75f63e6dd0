//! Indexing task status and monotonic reconciliation of updates.
//!
//! Updates for a task can arrive from the push channel and the pull
//! endpoint in any order. [`TaskStatus::apply`] merges them so that
//! progress and counters never move backwards, and freezes the record once
//! the task reaches a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Backend lifecycle state of an indexing task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted, not yet started.
    #[serde(alias = "pending")]
    Queued,
    /// Running.
    #[serde(alias = "running", alias = "processing")]
    InProgress,
    /// Finished successfully.
    #[serde(alias = "complete", alias = "success")]
    Completed,
    /// Finished with a backend-reported failure.
    #[serde(alias = "error")]
    Failed,
}

impl TaskState {
    /// Whether no further updates are meaningful.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::InProgress => 1,
            Self::Completed | Self::Failed => 2,
        }
    }
}

/// Pipeline stage reported by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexingStage {
    /// Waiting for a worker.
    Queued,
    /// Cloning the repository.
    Cloning,
    /// Walking the tree and detecting languages.
    Analyzing,
    /// Parsing source files into chunks.
    Parsing,
    /// Generating embeddings.
    Embedding,
    /// Writing vectors and graph nodes.
    Storing,
    /// Post-ingest validation.
    Validating,
    /// Done.
    Completed,
    /// Aborted.
    Failed,
}

impl IndexingStage {
    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Cloning => 1,
            Self::Analyzing => 2,
            Self::Parsing => 3,
            Self::Embedding => 4,
            Self::Storing => 5,
            Self::Validating => 6,
            Self::Completed => 7,
            Self::Failed => 8,
        }
    }
}

/// One entry of the append-only error log of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskError {
    /// Backend error category (e.g. `parse_error`).
    pub error_type: String,
    /// Human-readable message, shown verbatim.
    pub error_message: String,
    /// Stage in which the error happened.
    #[serde(default)]
    pub stage: Option<String>,
    /// When the backend recorded it.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Whether the backend continued past it.
    #[serde(default)]
    pub recoverable: bool,
}

/// Embedding sub-progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingProgress {
    /// Chunks embedded so far.
    #[serde(default)]
    pub embedded_chunks: u64,
    /// Chunks to embed in total.
    #[serde(default)]
    pub total_chunks: u64,
    /// Chunks per second.
    #[serde(default)]
    pub embedding_rate: f64,
    /// File currently being embedded.
    #[serde(default)]
    pub current_file: Option<String>,
}

/// A task status record as delivered by the push channel or pull endpoint.
///
/// Every field except `task_id` is optional so that partial updates can be
/// merged into the held [`TaskStatus`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskUpdate {
    /// Backend-assigned task identifier.
    pub task_id: String,
    /// Repository being indexed.
    #[serde(default)]
    pub repository_name: Option<String>,
    /// Lifecycle state.
    #[serde(default)]
    pub status: Option<TaskState>,
    /// Pipeline stage.
    #[serde(default)]
    pub current_stage: Option<IndexingStage>,
    /// Percent complete.
    #[serde(default, alias = "progress")]
    pub overall_progress: Option<f64>,
    /// Files processed so far.
    #[serde(default)]
    pub processed_files: Option<u64>,
    /// Files discovered.
    #[serde(default)]
    pub total_files: Option<u64>,
    /// Chunks produced by the parser.
    #[serde(default)]
    pub generated_chunks: Option<u64>,
    /// Chunks persisted.
    #[serde(default)]
    pub stored_chunks: Option<u64>,
    /// Errors recorded so far (may repeat already-seen entries).
    #[serde(default)]
    pub errors: Vec<TaskError>,
    /// Embedding sub-progress.
    #[serde(default)]
    pub embedding_progress: Option<EmbeddingProgress>,
    /// Backend sequence number, when provided.
    #[serde(default)]
    pub sequence: Option<u64>,
    /// Backend timestamp of this record.
    #[serde(default, alias = "timestamp", alias = "last_updated")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskUpdate {
    /// Decode and validate a task record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Payload` if the value is not an object, lacks a
    /// non-empty `task_id`, or carries a non-finite progress.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(AppError::Payload("task record must be a json object".into()));
        }
        let update: Self = serde_json::from_value(value)
            .map_err(|err| AppError::Payload(format!("task record: {err}")))?;
        if update.task_id.trim().is_empty() {
            return Err(AppError::Payload("task record has an empty task_id".into()));
        }
        if update.overall_progress.is_some_and(|p| !p.is_finite()) {
            return Err(AppError::Payload(format!(
                "task {} has a non-finite overall_progress",
                update.task_id
            )));
        }
        Ok(update)
    }

    fn ordering_key(&self) -> (Option<u64>, Option<DateTime<Utc>>) {
        (self.sequence, self.updated_at)
    }
}

/// Result of applying a [`TaskUpdate`] to a [`TaskStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The record changed.
    Applied,
    /// The update was in order but carried nothing new.
    Unchanged,
    /// The update is older than what is held, or would move progress backwards.
    Stale,
    /// The update belongs to a different task.
    OtherTask,
    /// The held record is terminal; nothing further is accepted.
    Terminal,
}

impl ApplyOutcome {
    /// Whether the held record changed.
    #[must_use]
    pub fn is_applied(self) -> bool {
        self == Self::Applied
    }
}

/// Client-side view of one indexing task.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskStatus {
    /// Backend-assigned task identifier.
    pub task_id: String,
    /// Repository being indexed.
    pub repository_name: String,
    /// Lifecycle state.
    pub status: TaskState,
    /// Pipeline stage.
    pub current_stage: IndexingStage,
    /// Percent complete, `[0, 100]`.
    pub overall_progress: f64,
    /// Files processed so far.
    pub processed_files: u64,
    /// Files discovered, once known.
    pub total_files: Option<u64>,
    /// Chunks produced by the parser.
    pub generated_chunks: u64,
    /// Chunks persisted.
    pub stored_chunks: u64,
    /// Append-only error log.
    pub errors: Vec<TaskError>,
    /// Embedding sub-progress.
    pub embedding_progress: Option<EmbeddingProgress>,
    /// Highest backend sequence number applied.
    pub sequence: Option<u64>,
    /// Newest backend timestamp applied.
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskStatus {
    /// Record created the instant a task is submitted, before the backend
    /// has reported anything.
    #[must_use]
    pub fn placeholder(task_id: impl Into<String>, repository_name: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            repository_name: repository_name.into(),
            status: TaskState::Queued,
            current_stage: IndexingStage::Queued,
            overall_progress: 0.0,
            processed_files: 0,
            total_files: None,
            generated_chunks: 0,
            stored_chunks: 0,
            errors: Vec::new(),
            embedding_progress: None,
            sequence: None,
            updated_at: None,
        }
    }

    /// Build a record from a standalone update (e.g. a task list entry).
    #[must_use]
    pub fn from_update(update: &TaskUpdate) -> Self {
        let mut status = Self::placeholder(
            update.task_id.clone(),
            update.repository_name.clone().unwrap_or_default(),
        );
        status.apply(update);
        status
    }

    /// Whether the task has completed or failed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge an update into this record.
    ///
    /// Updates carrying a sequence or timestamp no newer than the held one
    /// are stale. Updates without ordering information are stale when they
    /// would move the state, stage, progress, or any counter backwards.
    /// Accepted updates never lower progress or counters.
    pub fn apply(&mut self, update: &TaskUpdate) -> ApplyOutcome {
        if update.task_id != self.task_id {
            return ApplyOutcome::OtherTask;
        }
        if self.is_terminal() {
            return ApplyOutcome::Terminal;
        }

        match self.compare_order(update) {
            Some(std::cmp::Ordering::Greater) => {}
            Some(_) => return ApplyOutcome::Stale,
            None => {
                if self.regresses(update) {
                    return ApplyOutcome::Stale;
                }
            }
        }

        let before = self.clone();
        self.merge(update);
        if *self == before {
            ApplyOutcome::Unchanged
        } else {
            ApplyOutcome::Applied
        }
    }

    /// Ordering of `update` relative to the held record, when both sides
    /// carry a comparable key. Sequence numbers win over timestamps when
    /// both sides have one.
    fn compare_order(&self, update: &TaskUpdate) -> Option<std::cmp::Ordering> {
        let (seq, ts) = update.ordering_key();
        let by_sequence = match (seq, self.sequence) {
            (Some(new), Some(held)) => return Some(new.cmp(&held)),
            (Some(_), None) => Some(std::cmp::Ordering::Greater),
            _ => None,
        };
        // Without a held sequence the timestamps still have to agree.
        match (ts, self.updated_at) {
            (Some(new), Some(held)) => Some(new.cmp(&held)),
            (Some(_), None) => Some(std::cmp::Ordering::Greater),
            _ => by_sequence,
        }
    }

    fn regresses(&self, update: &TaskUpdate) -> bool {
        // A terminal verdict always moves forward.
        if update.status.is_some_and(TaskState::is_terminal) {
            return false;
        }
        let below = |new: Option<u64>, held: u64| new.is_some_and(|n| n < held);
        update.status.is_some_and(|s| s.rank() < self.status.rank())
            || update
                .current_stage
                .is_some_and(|s| s.rank() < self.current_stage.rank())
            || update
                .overall_progress
                .is_some_and(|p| p < self.overall_progress)
            || below(update.processed_files, self.processed_files)
            || below(update.generated_chunks, self.generated_chunks)
            || below(update.stored_chunks, self.stored_chunks)
    }

    fn merge(&mut self, update: &TaskUpdate) {
        if let Some(name) = update.repository_name.as_deref() {
            if !name.is_empty() {
                name.clone_into(&mut self.repository_name);
            }
        }

        if let Some(state) = update.status {
            if state.rank() >= self.status.rank() {
                self.status = state;
            }
        }

        if let Some(stage) = update.current_stage {
            if stage.rank() >= self.current_stage.rank() {
                self.current_stage = stage;
            }
        }

        match self.status {
            TaskState::Completed => {
                self.current_stage = IndexingStage::Completed;
                self.overall_progress = 100.0;
            }
            TaskState::Failed => self.current_stage = IndexingStage::Failed,
            TaskState::Queued | TaskState::InProgress => {}
        }

        if let Some(progress) = update.overall_progress {
            self.overall_progress = self.overall_progress.max(progress.clamp(0.0, 100.0));
        }
        self.processed_files = self
            .processed_files
            .max(update.processed_files.unwrap_or_default());
        self.generated_chunks = self
            .generated_chunks
            .max(update.generated_chunks.unwrap_or_default());
        self.stored_chunks = self
            .stored_chunks
            .max(update.stored_chunks.unwrap_or_default());
        if let Some(total) = update.total_files {
            self.total_files = Some(self.total_files.map_or(total, |held| held.max(total)));
        }

        for error in &update.errors {
            if !self.errors.contains(error) {
                self.errors.push(error.clone());
            }
        }

        if let Some(embedding) = &update.embedding_progress {
            let newer = self
                .embedding_progress
                .as_ref()
                .is_none_or(|held| embedding.embedded_chunks >= held.embedded_chunks);
            if newer {
                self.embedding_progress = Some(embedding.clone());
            }
        }

        if update.sequence > self.sequence {
            self.sequence = update.sequence;
        }
        if update.updated_at > self.updated_at {
            self.updated_at = update.updated_at;
        }
    }
}
