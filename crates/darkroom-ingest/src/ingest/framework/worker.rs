//! Per-item task executor
//!
//! Processing one item:
//! 1. Resolve the parent gallery (absent means NotReady, which is retryable)
//! 2. Read the staged bytes
//! 3. Derive title and slug from the template and ordinal
//! 4. Reserve the slug; a taken slug skips the item
//! 5. Fully decode the bytes; an invalid image releases the slug and skips
//! 6. Store the binary (or verify the one an earlier run stored) and publish
//!    the asset atomically
//!
//! Every step is safe to repeat. The slug reservation is owned by the item's
//! source key, so a re-run of the same item resumes instead of colliding
//! with itself.

use darkroom_common::checksum::{content_checksum, verify_checksum};
use darkroom_common::slug::{slugify, validate_slug, MAX_SLUG_LENGTH};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

use super::types::{IngestionJob, SkipReason, TaskContext, TaskOutcome};
use super::validator::{ImageValidator, Validation};
use crate::db::{AssetId, AssetRepository, GalleryRepository, PublishAsset, Reservation};
use crate::error::{IngestError, IngestResult};
use crate::storage::StorageGateway;

/// Runs one ingestion job against the catalog and storage
pub struct TaskExecutor {
    galleries: Arc<dyn GalleryRepository>,
    assets: Arc<dyn AssetRepository>,
    storage: Arc<dyn StorageGateway>,
    validator: Arc<dyn ImageValidator>,
}

/// File name the uploader used, recovered from the staged source key
///
/// Staged keys look like `uploads/<group>/<ordinal>-<name>`.
pub fn original_file_name(source_key: &str, ordinal: u32) -> &str {
    let base = source_key.rsplit('/').next().unwrap_or(source_key);
    base.strip_prefix(&format!("{}-", ordinal)).unwrap_or(base)
}

/// Storage key of a published binary
///
/// The asset id keeps a released reservation's leftover binary from being
/// mistaken for this asset's content.
pub fn binary_key(slug: &str, asset_id: AssetId, file_name: &str) -> String {
    format!("photos/{}/{}-{}", slug, asset_id.simple(), file_name)
}

impl TaskExecutor {
    pub fn new(
        galleries: Arc<dyn GalleryRepository>,
        assets: Arc<dyn AssetRepository>,
        storage: Arc<dyn StorageGateway>,
        validator: Arc<dyn ImageValidator>,
    ) -> Self {
        Self {
            galleries,
            assets,
            storage,
            validator,
        }
    }

    /// Process `job` once
    ///
    /// Returns a terminal outcome, or `Err` for the retry policy to classify.
    pub async fn execute(&self, job: &IngestionJob, ctx: &TaskContext) -> IngestResult<TaskOutcome> {
        self.run(job).instrument(ctx.span.clone()).await
    }

    async fn run(&self, job: &IngestionJob) -> IngestResult<TaskOutcome> {
        if self.galleries.find_gallery(job.gallery_id).await?.is_none() {
            debug!(gallery_id = job.gallery_id, "Gallery not visible yet");
            return Err(IngestError::NotReady(job.gallery_id));
        }

        debug!(source_key = %job.source_key, "Reading staged file");
        let data = self.storage.open(&job.source_key).await?;

        let title = job.title();
        let slug = slugify(&title);
        validate_slug(&slug, MAX_SLUG_LENGTH)?;

        let asset_id = match self.assets.reserve_slug(&slug, &job.source_key).await? {
            Reservation::Acquired(id) => id,
            Reservation::Resumed(id) => {
                info!(slug = %slug, asset_id = %id, "Resuming earlier reservation");
                id
            },
            Reservation::Published(id) => {
                info!(slug = %slug, asset_id = %id, "Photo already published by an earlier run");
                return Ok(TaskOutcome::Succeeded(id));
            },
            Reservation::Taken => {
                warn!(
                    source_key = %job.source_key,
                    slug = %slug,
                    "Did not create photo: a photo with this slug already exists"
                );
                return Ok(TaskOutcome::Skipped(SkipReason::DuplicateSlug));
            },
        };

        match self.validate_and_publish(job, asset_id, &slug, title, data).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.release(&slug, &job.source_key).await;
                Err(e)
            },
        }
    }

    async fn validate_and_publish(
        &self,
        job: &IngestionJob,
        asset_id: AssetId,
        slug: &str,
        title: String,
        data: Vec<u8>,
    ) -> IngestResult<TaskOutcome> {
        let validator = Arc::clone(&self.validator);
        let (data, validation) = tokio::task::spawn_blocking(move || {
            let validation = validator.validate(&data);
            (data, validation)
        })
        .await?;

        let (format, width, height) = match validation {
            Validation::Valid { format, width, height } => (format, width, height),
            Validation::Invalid(reason) => {
                error!(
                    source_key = %job.source_key,
                    reason = %reason,
                    "Could not process image"
                );
                self.release(slug, &job.source_key).await;
                return Ok(TaskOutcome::Skipped(SkipReason::InvalidImage));
            },
        };
        debug!(?format, width, height, "Image decoded");

        let checksum = content_checksum(&data);
        let file_name = original_file_name(&job.source_key, job.ordinal_index);
        let key = binary_key(slug, asset_id, file_name);

        if !self.storage.create_if_absent(&key, data).await? {
            // An earlier run of this item stored it; the content must match
            let stored = self.storage.open(&key).await?;
            verify_checksum(&stored, &checksum)?;
            debug!(key = %key, "Binary already stored by an earlier run");
        }

        let asset = self
            .assets
            .publish_asset(PublishAsset {
                asset_id,
                owner_key: job.source_key.clone(),
                binary_ref: key,
                title,
                caption: job.caption.clone(),
                is_public: job.is_public,
                checksum,
                site_id: job.site_id,
                gallery_id: job.gallery_id,
            })
            .await?;

        info!(asset_id = %asset.id, slug = %asset.slug, "Photo published");
        Ok(TaskOutcome::Succeeded(asset.id))
    }

    async fn release(&self, slug: &str, owner_key: &str) {
        match self.assets.release_slug(slug, owner_key).await {
            Ok(true) => debug!(slug = %slug, "Released slug reservation"),
            Ok(false) => {},
            Err(e) => warn!(slug = %slug, error = %e, "Failed to release slug reservation"),
        }
    }
}
