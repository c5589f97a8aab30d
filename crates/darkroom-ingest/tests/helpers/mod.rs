//! Shared fixtures for the ingestion integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use darkroom_ingest::db::{
    Gallery, GalleryId, GalleryRepository, MemoryCatalog, NewGallery, RepositoryResult, Site,
    SiteRepository,
};
use chrono::{DateTime, Utc};
use darkroom_ingest::ingest::framework::{
    Batch, BatchProgress, BatchRequest, GroupHandle, GroupSummary, IngestionJob,
    MemoryTaskStateStore, ProgressQuery, TaskState, TaskStateStore, UploadEntry,
};
use darkroom_ingest::ingest::{IngestConfig, Pipeline, PipelineDeps};
use darkroom_ingest::{IngestError, IngestResult};
use darkroom_ingest::storage::MemoryStorage;
use image::{ImageBuffer, ImageFormat, Rgb};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,darkroom_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A small PNG; distinct shades give distinct checksums
pub fn png_bytes(shade: u8) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(8, 6, Rgb([shade, 128, 255 - shade]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

pub fn zip_bytes(files: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .expect("start zip entry");
        writer.write_all(data).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

pub fn test_config() -> IngestConfig {
    IngestConfig {
        worker_count: 4,
        queue_capacity: 64,
        max_attempts: 6,
        retry_delay_ms: 10,
        poll_interval_ms: 5,
        ..IngestConfig::default()
    }
}

/// In-memory catalog, storage and task store with one site and one gallery
pub struct Fixture {
    pub catalog: Arc<MemoryCatalog>,
    pub storage: Arc<MemoryStorage>,
    pub store: Arc<MemoryTaskStateStore>,
    pub site: Site,
    pub gallery: Gallery,
}

impl Fixture {
    pub async fn new() -> Self {
        let catalog = Arc::new(MemoryCatalog::new());
        let site = catalog
            .create_site("Example", "example.com")
            .await
            .expect("create site");
        let gallery = catalog
            .create_gallery(NewGallery {
                title: "Holidays".into(),
                slug: "holidays".into(),
                is_public: true,
                site_ids: vec![site.id],
            })
            .await
            .expect("create gallery");

        Self {
            catalog,
            storage: Arc::new(MemoryStorage::new()),
            store: Arc::new(MemoryTaskStateStore::new()),
            site,
            gallery,
        }
    }

    pub fn deps(&self) -> PipelineDeps {
        PipelineDeps {
            galleries: self.catalog.clone(),
            assets: self.catalog.clone(),
            storage: self.storage.clone(),
            store: self.store.clone(),
            validator: None,
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::start(self.deps(), &test_config())
    }

    pub fn request(&self, title_template: &str) -> BatchRequest {
        BatchRequest {
            gallery_id: self.gallery.id,
            site_id: self.site.id,
            title_template: title_template.into(),
            caption: "Taken on the beach".into(),
            is_public: true,
        }
    }
}

pub fn entries(names: &[&str]) -> Vec<UploadEntry> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| UploadEntry::new(*name, png_bytes(i as u8 * 20)))
        .collect()
}

/// Poll until the batch completes, failing the test after a generous bound
pub async fn wait_complete(pipeline: &Pipeline, handle: &GroupHandle) -> BatchProgress {
    tokio::time::timeout(
        Duration::from_secs(30),
        pipeline
            .tracker
            .wait_for_completion(ProgressQuery::from(handle), Duration::from_millis(5), |_| {}),
    )
    .await
    .expect("batch did not complete in time")
    .expect("progress query failed")
}

/// Gallery lookups that miss until the Nth call, as when the creating
/// transaction has not committed yet
pub struct FlakyGalleries {
    inner: Arc<MemoryCatalog>,
    visible_from_call: u32,
    calls: AtomicU32,
}

impl FlakyGalleries {
    /// `visible_from_call` is 1-based; `u32::MAX` means never visible
    pub fn new(inner: Arc<MemoryCatalog>, visible_from_call: u32) -> Self {
        Self {
            inner,
            visible_from_call,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GalleryRepository for FlakyGalleries {
    async fn find_gallery(&self, id: GalleryId) -> RepositoryResult<Option<Gallery>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call < self.visible_from_call {
            return Ok(None);
        }
        self.inner.find_gallery(id).await
    }

    async fn create_gallery(&self, gallery: NewGallery) -> RepositoryResult<Gallery> {
        self.inner.create_gallery(gallery).await
    }
}

/// Task-state store whose terminal writes fail a set number of times,
/// as when the database connection drops right after a task finishes
pub struct FlakyStateStore {
    inner: Arc<MemoryTaskStateStore>,
    terminal_failures: AtomicU32,
    failed: AtomicU32,
}

impl FlakyStateStore {
    /// `u32::MAX` failures means terminal writes never succeed
    pub fn new(inner: Arc<MemoryTaskStateStore>, terminal_failures: u32) -> Self {
        Self {
            inner,
            terminal_failures: AtomicU32::new(terminal_failures),
            failed: AtomicU32::new(0),
        }
    }

    pub fn failed_writes(&self) -> u32 {
        self.failed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskStateStore for FlakyStateStore {
    async fn register_group(&self, batch: &Batch, jobs: &[IngestionJob]) -> IngestResult<()> {
        self.inner.register_group(batch, jobs).await
    }

    async fn record_state(&self, task_id: Uuid, state: &TaskState) -> IngestResult<bool> {
        if state.is_terminal() {
            let remaining = self.terminal_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                if remaining != u32::MAX {
                    self.terminal_failures.fetch_sub(1, Ordering::SeqCst);
                }
                self.failed.fetch_add(1, Ordering::SeqCst);
                return Err(IngestError::Internal("connection reset".to_string()));
            }
        }
        self.inner.record_state(task_id, state).await
    }

    async fn task_state(&self, task_id: Uuid) -> IngestResult<Option<TaskState>> {
        self.inner.task_state(task_id).await
    }

    async fn group_states(&self, group_id: Uuid) -> IngestResult<Vec<(u32, TaskState)>> {
        self.inner.group_states(group_id).await
    }

    async fn group_summary(&self, group_id: Uuid) -> IngestResult<Option<GroupSummary>> {
        self.inner.group_summary(group_id).await
    }

    async fn unfinished_jobs(&self) -> IngestResult<Vec<IngestionJob>> {
        self.inner.unfinished_jobs().await
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> IngestResult<u64> {
        self.inner.purge_finished_before(cutoff).await
    }
}
