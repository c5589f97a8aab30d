//! Batch progress polling

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::state::TaskStateStore;
use super::types::GroupHandle;
use crate::db::GalleryId;
use crate::error::{IngestError, IngestResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressQuery {
    pub group_id: Uuid,
    pub expected_total: usize,
    pub gallery_id: GalleryId,
}

impl From<&GroupHandle> for ProgressQuery {
    fn from(handle: &GroupHandle) -> Self {
        Self {
            group_id: handle.group_id,
            expected_total: handle.total,
            gallery_id: handle.gallery_id,
        }
    }
}

/// Where the caller goes after a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    ShowGallery(GalleryId),
    PollAgain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// Succeeded plus skipped
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub gallery_id: GalleryId,
}

impl BatchProgress {
    pub fn is_complete(&self) -> bool {
        self.completed + self.failed >= self.total
    }

    pub fn next_step(&self) -> NextStep {
        if self.is_complete() {
            NextStep::ShowGallery(self.gallery_id)
        } else {
            NextStep::PollAgain
        }
    }
}

/// Read-only view over task states
pub struct ProgressTracker {
    store: Arc<dyn TaskStateStore>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn TaskStateStore>) -> Self {
        Self { store }
    }

    pub async fn progress(&self, query: ProgressQuery) -> IngestResult<BatchProgress> {
        let summary = self
            .store
            .group_summary(query.group_id)
            .await?
            .ok_or(IngestError::UnknownGroup(query.group_id))?;

        Ok(BatchProgress {
            completed: summary.succeeded + summary.skipped,
            failed: summary.failed,
            total: query.expected_total,
            gallery_id: query.gallery_id,
        })
    }

    /// Poll every `interval` until complete, reporting each poll
    pub async fn wait_for_completion<F>(
        &self,
        query: ProgressQuery,
        interval: Duration,
        mut on_poll: F,
    ) -> IngestResult<BatchProgress>
    where
        F: FnMut(&BatchProgress) + Send,
    {
        loop {
            let progress = self.progress(query).await?;
            on_poll(&progress);
            if progress.is_complete() {
                return Ok(progress);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(completed: usize, failed: usize, total: usize) -> BatchProgress {
        BatchProgress {
            completed,
            failed,
            total,
            gallery_id: 4,
        }
    }

    #[test]
    fn test_next_step() {
        assert_eq!(progress(1, 0, 3).next_step(), NextStep::PollAgain);
        assert_eq!(progress(2, 1, 3).next_step(), NextStep::ShowGallery(4));
        assert!(progress(0, 0, 0).is_complete());
    }

    #[tokio::test]
    async fn test_unknown_group() {
        let tracker = ProgressTracker::new(Arc::new(super::super::state::MemoryTaskStateStore::new()));
        let id = Uuid::new_v4();
        let err = tracker
            .progress(ProgressQuery {
                group_id: id,
                expected_total: 1,
                gallery_id: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnknownGroup(g) if g == id));
    }
}
