//! Core types for the ingestion framework

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{AssetId, GalleryId, SiteId};

/// One uploaded file before splitting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEntry {
    /// Name as uploaded; for archives the full in-archive path
    pub file_name: String,
    pub data: Vec<u8>,
}

impl UploadEntry {
    pub fn new(file_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }
}

/// Batch metadata supplied with a bulk upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub gallery_id: GalleryId,
    pub site_id: SiteId,
    /// Photo titles are "<title_template> <ordinal>"
    pub title_template: String,
    pub caption: String,
    pub is_public: bool,
}

/// An accepted batch; immutable once submitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub group_id: Uuid,
    pub gallery_id: GalleryId,
    pub site_id: SiteId,
    pub title_template: String,
    pub caption: String,
    pub is_public: bool,
    pub total_items: usize,
}

/// One unit of pending work within a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub group_id: Uuid,
    pub ordinal_index: u32,
    pub source_key: String,
}

/// Self-contained job payload, persisted with the task state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub task_id: Uuid,
    pub group_id: Uuid,
    pub gallery_id: GalleryId,
    pub site_id: SiteId,
    pub source_key: String,
    pub ordinal_index: u32,
    pub title_template: String,
    pub caption: String,
    pub is_public: bool,
}

impl IngestionJob {
    pub fn new(batch: &Batch, item: &Item) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            group_id: batch.group_id,
            gallery_id: batch.gallery_id,
            site_id: batch.site_id,
            source_key: item.source_key.clone(),
            ordinal_index: item.ordinal_index,
            title_template: batch.title_template.clone(),
            caption: batch.caption.clone(),
            is_public: batch.is_public,
        }
    }

    /// Deterministic title derived from the template and ordinal
    pub fn title(&self) -> String {
        format!("{} {}", self.title_template, self.ordinal_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DuplicateSlug,
    InvalidImage,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::DuplicateSlug => write!(f, "duplicate slug"),
            SkipReason::InvalidImage => write!(f, "invalid image"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The gallery never became visible within the attempt bound
    ParentNeverReady { gallery_id: GalleryId, attempts: u32 },
    Storage { message: String },
    Repository { message: String },
    /// Anything else, including executor panics
    Infrastructure { message: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::ParentNeverReady { gallery_id, attempts } => write!(
                f,
                "gallery {} not visible after {} attempts",
                gallery_id, attempts
            ),
            FailureReason::Storage { message } => write!(f, "storage: {}", message),
            FailureReason::Repository { message } => write!(f, "repository: {}", message),
            FailureReason::Infrastructure { message } => write!(f, "infrastructure: {}", message),
        }
    }
}

/// Result of one task invocation after the retry policy is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded(AssetId),
    Skipped(SkipReason),
    Failed(FailureReason),
    Retrying(u32),
}

impl TaskOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskOutcome::Retrying(_))
    }
}

/// Persisted per-task state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running { attempt: u32 },
    Retrying { attempt: u32 },
    Succeeded { asset_id: AssetId },
    Skipped { reason: SkipReason },
    Failed { reason: FailureReason },
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded { .. } | TaskState::Skipped { .. } | TaskState::Failed { .. }
        )
    }

    /// Column value used by the Postgres store
    pub fn kind(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running { .. } => "running",
            TaskState::Retrying { .. } => "retrying",
            TaskState::Succeeded { .. } => "succeeded",
            TaskState::Skipped { .. } => "skipped",
            TaskState::Failed { .. } => "failed",
        }
    }
}

impl From<TaskOutcome> for TaskState {
    fn from(outcome: TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Succeeded(asset_id) => TaskState::Succeeded { asset_id },
            TaskOutcome::Skipped(reason) => TaskState::Skipped { reason },
            TaskOutcome::Failed(reason) => TaskState::Failed { reason },
            TaskOutcome::Retrying(attempt) => TaskState::Retrying { attempt },
        }
    }
}

/// Opaque reference to a submitted batch, used for progress polling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupHandle {
    pub group_id: Uuid,
    /// Items left after filtering
    pub total: usize,
    pub gallery_id: GalleryId,
}

/// Per-invocation context handed to the executor
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: Uuid,
    pub group_id: Uuid,
    pub ordinal: u32,
    /// 1-based
    pub attempt: u32,
    pub span: tracing::Span,
}

impl TaskContext {
    pub fn new(job: &IngestionJob, attempt: u32) -> Self {
        let span = tracing::info_span!(
            "ingest_task",
            task_id = %job.task_id,
            group_id = %job.group_id,
            ordinal = job.ordinal_index,
            attempt,
        );

        Self {
            task_id: job.task_id,
            group_id: job.group_id,
            ordinal: job.ordinal_index,
            attempt,
            span,
        }
    }
}

/// Aggregate counts for one group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub retrying: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl GroupSummary {
    pub fn record(&mut self, state: &TaskState) {
        self.add(state.kind(), 1);
    }

    /// Count `n` tasks in the state named by [`TaskState::kind`]
    pub fn add(&mut self, kind: &str, n: usize) {
        match kind {
            "pending" => self.pending += n,
            "running" => self.running += n,
            "retrying" => self.retrying += n,
            "succeeded" => self.succeeded += n,
            "skipped" => self.skipped += n,
            "failed" => self.failed += n,
            other => tracing::warn!(state = other, "Ignoring unknown task state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(ordinal: u32) -> IngestionJob {
        IngestionJob {
            task_id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            gallery_id: 1,
            site_id: 1,
            source_key: format!("uploads/x/{}-a.png", ordinal),
            ordinal_index: ordinal,
            title_template: "Summer Trip".into(),
            caption: String::new(),
            is_public: true,
        }
    }

    #[test]
    fn test_title_is_template_and_ordinal() {
        assert_eq!(job(0).title(), "Summer Trip 0");
        assert_eq!(job(12).title(), "Summer Trip 12");
    }

    #[test]
    fn test_job_payload_round_trips_through_json() {
        let original = job(3);
        let value = serde_json::to_value(&original).unwrap();
        assert_eq!(value["ordinal_index"], 3);
        let back: IngestionJob = serde_json::from_value(value).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Retrying { attempt: 2 }.is_terminal());
        assert!(TaskState::Skipped { reason: SkipReason::InvalidImage }.is_terminal());
        assert!(!TaskOutcome::Retrying(1).is_terminal());
        assert_eq!(
            TaskState::from(TaskOutcome::Skipped(SkipReason::DuplicateSlug)).kind(),
            "skipped"
        );
    }

    #[test]
    fn test_failure_state_serializes_tagged() {
        let state = TaskState::Failed {
            reason: FailureReason::ParentNeverReady { gallery_id: 9, attempts: 6 },
        };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["state"], "failed");
        assert_eq!(value["reason"]["kind"], "parent_never_ready");
        assert_eq!(serde_json::from_value::<TaskState>(value).unwrap(), state);
    }
}
