//! Bounded retry around the NotReady condition

use darkroom_common::DarkroomError;
use std::time::Duration;

use super::types::{FailureReason, TaskOutcome};
use crate::db::GalleryId;
use crate::error::{IngestError, IngestResult};
use crate::ingest::IngestConfig;

/// What the worker does after an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Finish(TaskOutcome),
    Retry { next_attempt: u32, delay: Duration },
}

/// Fixed attempt bound with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(config.max_attempts, config.retry_delay())
    }

    /// Decide after attempt number `attempt` (1-based) produced `result`
    pub fn decide(
        &self,
        attempt: u32,
        gallery_id: GalleryId,
        result: IngestResult<TaskOutcome>,
    ) -> RetryDecision {
        match result {
            Ok(outcome) => RetryDecision::Finish(outcome),
            Err(e) if e.is_retryable() && attempt < self.max_attempts => RetryDecision::Retry {
                next_attempt: attempt + 1,
                delay: self.delay,
            },
            Err(IngestError::NotReady(_)) => {
                RetryDecision::Finish(TaskOutcome::Failed(FailureReason::ParentNeverReady {
                    gallery_id,
                    attempts: attempt,
                }))
            },
            Err(e) => RetryDecision::Finish(TaskOutcome::Failed(FailureReason::from(&e))),
        }
    }
}

impl From<&IngestError> for FailureReason {
    fn from(err: &IngestError) -> Self {
        match err {
            IngestError::NotReady(gallery_id) => FailureReason::ParentNeverReady {
                gallery_id: *gallery_id,
                attempts: 1,
            },
            IngestError::Storage(e) => FailureReason::Storage { message: e.to_string() },
            IngestError::Common(e @ DarkroomError::ChecksumMismatch { .. }) => {
                FailureReason::Storage { message: e.to_string() }
            },
            IngestError::Repository(e) => FailureReason::Repository { message: e.to_string() },
            other => FailureReason::Infrastructure {
                message: other.to_string(),
            },
        }
    }
}
