//! Bulk photo ingestion
//!
//! # Architecture
//!
//! - **config**: pool sizing and retry bounds (`INGEST_*` environment variables)
//! - **archive**: zip splitting, bounded by [`archive::ArchiveLimits`]
//! - **framework**: coordinator, worker pool, executor, retry policy,
//!   task-state store and progress tracker
//!
//! [`Pipeline`] wires the framework together for a given set of repositories
//! and storage.

pub mod archive;
pub mod config;
pub mod framework;

pub use config::IngestConfig;

use std::sync::Arc;

use crate::db::{AssetRepository, GalleryRepository};
use archive::ArchiveLimits;
use crate::storage::StorageGateway;
use framework::{
    DecodingValidator, ImageValidator, IngestionCoordinator, ProgressTracker, TaskExecutor,
    TaskQueue, TaskStateStore, WorkerPool,
};

/// A running ingestion pipeline
pub struct Pipeline {
    pub coordinator: IngestionCoordinator,
    pub tracker: ProgressTracker,
    pub queue: TaskQueue,
    pub pool: WorkerPool,
}

/// Collaborators the pipeline runs against
#[derive(Clone)]
pub struct PipelineDeps {
    pub galleries: Arc<dyn GalleryRepository>,
    pub assets: Arc<dyn AssetRepository>,
    pub storage: Arc<dyn StorageGateway>,
    pub store: Arc<dyn TaskStateStore>,
    pub validator: Option<Arc<dyn ImageValidator>>,
}

impl Pipeline {
    /// Start the worker pool; must be called inside a Tokio runtime
    pub fn start(deps: PipelineDeps, config: &IngestConfig) -> Self {
        let validator = deps
            .validator
            .unwrap_or_else(|| Arc::new(DecodingValidator::new(config.max_image_dimension)));

        let executor = Arc::new(TaskExecutor::new(
            deps.galleries,
            deps.assets,
            Arc::clone(&deps.storage),
            validator,
        ));
        let (queue, pool) = WorkerPool::start(executor, Arc::clone(&deps.store), config);

        Self {
            coordinator: IngestionCoordinator::new(
                deps.storage,
                Arc::clone(&deps.store),
                queue.clone(),
                ArchiveLimits::from_config(config),
            ),
            tracker: ProgressTracker::new(deps.store),
            queue,
            pool,
        }
    }

    /// Stop accepting work and wait for queued jobs to finish
    pub async fn shutdown(self) -> crate::error::IngestResult<()> {
        let Pipeline {
            coordinator,
            tracker,
            queue,
            pool,
        } = self;
        drop(coordinator);
        drop(tracker);
        drop(queue);
        pool.join().await
    }
}
