//! Ingestion framework
//!
//! Split, dispatch, execute with bounded retry, and track progress.

pub mod coordinator;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod state;
pub mod types;
pub mod validator;
pub mod worker;

pub use coordinator::IngestionCoordinator;
pub use progress::{BatchProgress, NextStep, ProgressQuery, ProgressTracker};
pub use queue::{resume_unfinished, TaskQueue, WorkerPool};
pub use retry::{RetryDecision, RetryPolicy};
pub use state::{MemoryTaskStateStore, PgTaskStateStore, TaskStateStore};
pub use types::{
    Batch, BatchRequest, FailureReason, GroupHandle, GroupSummary, IngestionJob, Item, SkipReason,
    TaskContext, TaskOutcome, TaskState, UploadEntry,
};
pub use validator::{DecodingValidator, ImageValidator, Validation};
pub use worker::TaskExecutor;
