//! Bounded retry while the parent gallery is not yet visible

mod helpers;

use anyhow::Result;
use async_trait::async_trait;
use darkroom_ingest::db::{
    Gallery, GalleryId, GalleryRepository, MemoryCatalog, NewGallery, RepositoryError,
    RepositoryResult,
};
use darkroom_ingest::ingest::framework::{FailureReason, TaskState, TaskStateStore};
use darkroom_ingest::ingest::{IngestConfig, Pipeline, PipelineDeps};
use helpers::{entries, init_tracing, wait_complete, FlakyGalleries, Fixture};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn config(max_attempts: u32, retry_delay_ms: u64, worker_count: usize) -> IngestConfig {
    IngestConfig {
        worker_count,
        queue_capacity: 16,
        max_attempts,
        retry_delay_ms,
        poll_interval_ms: 5,
        ..IngestConfig::default()
    }
}

#[tokio::test]
async fn test_gallery_visible_on_third_attempt() -> Result<()> {
    init_tracing();
    let fx = Fixture::new().await;
    let flaky = Arc::new(FlakyGalleries::new(fx.catalog.clone(), 3));
    let deps = PipelineDeps {
        galleries: flaky.clone(),
        ..fx.deps()
    };
    let pipeline = Pipeline::start(deps, &config(5, 40, 2));

    let started = Instant::now();
    let handle = pipeline.coordinator.submit(fx.request("Late"), entries(&["a.png"])).await?;
    let progress = wait_complete(&pipeline, &handle).await;

    assert_eq!((progress.completed, progress.failed), (1, 0));
    assert!(started.elapsed() >= Duration::from_millis(80));
    assert_eq!(flaky.calls(), 3);

    let states = fx.store.group_states(handle.group_id).await?;
    assert!(matches!(states[0], (0, TaskState::Succeeded { .. })));

    pipeline.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_gallery_never_visible_fails_after_bound() -> Result<()> {
    init_tracing();
    let fx = Fixture::new().await;
    let flaky = Arc::new(FlakyGalleries::new(fx.catalog.clone(), u32::MAX));
    let deps = PipelineDeps {
        galleries: flaky.clone(),
        ..fx.deps()
    };
    let pipeline = Pipeline::start(deps, &config(3, 5, 2));

    let handle = pipeline.coordinator.submit(fx.request("Never"), entries(&["a.png"])).await?;
    let progress = wait_complete(&pipeline, &handle).await;

    assert_eq!((progress.completed, progress.failed), (0, 1));
    assert_eq!(flaky.calls(), 3);

    let states = fx.store.group_states(handle.group_id).await?;
    assert_eq!(
        states[0].1,
        TaskState::Failed {
            reason: FailureReason::ParentNeverReady {
                gallery_id: fx.gallery.id,
                attempts: 3
            }
        }
    );
    // nothing was reserved for an item whose gallery never appeared
    assert_eq!(fx.catalog.reserved_slug_count().await, 0);

    pipeline.shutdown().await?;
    Ok(())
}

struct BrokenGalleries {
    calls: AtomicU32,
}

#[async_trait]
impl GalleryRepository for BrokenGalleries {
    async fn find_gallery(&self, _id: GalleryId) -> RepositoryResult<Option<Gallery>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RepositoryError::Conflict("connection reset".into()))
    }

    async fn create_gallery(&self, _gallery: NewGallery) -> RepositoryResult<Gallery> {
        Err(RepositoryError::Conflict("connection reset".into()))
    }
}

#[tokio::test]
async fn test_other_errors_are_attempted_once() -> Result<()> {
    init_tracing();
    let fx = Fixture::new().await;
    let broken = Arc::new(BrokenGalleries { calls: AtomicU32::new(0) });
    let deps = PipelineDeps {
        galleries: broken.clone(),
        ..fx.deps()
    };
    let pipeline = Pipeline::start(deps, &config(6, 5, 2));

    let handle = pipeline.coordinator.submit(fx.request("Broken"), entries(&["a.png"])).await?;
    let progress = wait_complete(&pipeline, &handle).await;

    assert_eq!(progress.failed, 1);
    assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
    let states = fx.store.group_states(handle.group_id).await?;
    assert!(matches!(
        states[0].1,
        TaskState::Failed { reason: FailureReason::Repository { .. } }
    ));

    pipeline.shutdown().await?;
    Ok(())
}

/// Hides one gallery forever and passes everything else through
struct HiddenGallery {
    inner: Arc<MemoryCatalog>,
    hidden: GalleryId,
}

#[async_trait]
impl GalleryRepository for HiddenGallery {
    async fn find_gallery(&self, id: GalleryId) -> RepositoryResult<Option<Gallery>> {
        if id == self.hidden {
            return Ok(None);
        }
        self.inner.find_gallery(id).await
    }

    async fn create_gallery(&self, gallery: NewGallery) -> RepositoryResult<Gallery> {
        self.inner.create_gallery(gallery).await
    }
}

#[tokio::test]
async fn test_retry_delay_frees_the_worker_slot() -> Result<()> {
    init_tracing();
    let fx = Fixture::new().await;
    let other = fx
        .catalog
        .create_gallery(NewGallery {
            title: "Later".into(),
            slug: "later".into(),
            is_public: true,
            site_ids: vec![fx.site.id],
        })
        .await?;

    let deps = PipelineDeps {
        galleries: Arc::new(HiddenGallery {
            inner: fx.catalog.clone(),
            hidden: other.id,
        }),
        ..fx.deps()
    };
    // a single worker and a long delay
    let pipeline = Pipeline::start(deps, &config(3, 500, 1));

    let mut waiting_request = fx.request("Waiting");
    waiting_request.gallery_id = other.id;
    let waiting = pipeline.coordinator.submit(waiting_request, entries(&["a.png"])).await?;
    let ready = pipeline.coordinator.submit(fx.request("Ready"), entries(&["b.png"])).await?;

    let progress = wait_complete(&pipeline, &ready).await;
    assert_eq!(progress.completed, 1);

    // the stuck item is still sleeping between attempts
    let states = fx.store.group_states(waiting.group_id).await?;
    assert!(matches!(states[0].1, TaskState::Retrying { .. }));

    let progress = wait_complete(&pipeline, &waiting).await;
    assert_eq!(progress.failed, 1);

    pipeline.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_retry_policy_delay_is_fixed() {
    use darkroom_ingest::ingest::framework::{RetryDecision, RetryPolicy};
    use darkroom_ingest::IngestError;

    let policy = RetryPolicy::from_config(&config(0, 1_000, 1));
    // an attempt bound of zero still allows one attempt
    assert_eq!(policy.max_attempts, 1);
    assert!(matches!(
        policy.decide(1, 3, Err(IngestError::NotReady(3))),
        RetryDecision::Finish(_)
    ));

    let policy = RetryPolicy::from_config(&config(4, 1_000, 1));
    let RetryDecision::Retry { delay, .. } = policy.decide(2, 3, Err(IngestError::NotReady(3))) else {
        panic!("expected a retry");
    };

    let before = tokio::time::Instant::now();
    tokio::time::sleep(delay).await;
    assert!(before.elapsed() >= Duration::from_secs(1));
}
