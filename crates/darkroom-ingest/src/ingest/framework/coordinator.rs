//! Ingestion coordinator
//!
//! Turns an upload into independent jobs:
//! 1. Sort entries by name
//! 2. Drop hidden/system entries and anything nested in a folder
//! 3. Number the survivors 0..n and check the longest title fits
//! 4. Stage each blob under `uploads/<group>/<ordinal>-<name>`
//! 5. Register the group with the task-state store
//! 6. Enqueue one job per item
//!
//! Submission returns as soon as the jobs are queued.

use darkroom_common::slug::{slugify, validate_slug, MAX_SLUG_LENGTH};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::queue::TaskQueue;
use super::state::TaskStateStore;
use super::types::{Batch, BatchRequest, GroupHandle, IngestionJob, Item, UploadEntry};
use crate::error::{IngestError, IngestResult};
use crate::ingest::archive::{read_zip, ArchiveLimits};
use crate::storage::StorageGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFilter {
    Keep,
    /// Dotfiles and `__MACOSX`-style artifacts
    Hidden,
    /// Lives inside a folder of the upload
    Nested,
}

/// Decide whether an uploaded entry becomes an item
pub fn classify_entry(file_name: &str) -> EntryFilter {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let hidden = |s: &str| s.is_empty() || s.starts_with('.') || s.starts_with("__");

    if hidden(file_name) || hidden(base) {
        EntryFilter::Hidden
    } else if file_name.contains(['/', '\\']) {
        EntryFilter::Nested
    } else {
        EntryFilter::Keep
    }
}

/// Longest title the catalog stores
pub const MAX_TITLE_LENGTH: usize = 250;

/// Reject a template whose longest derived title or slug would not fit
///
/// Titles grow with the ordinal, so checking the last one covers the batch.
pub fn check_title_fits(title_template: &str, last_ordinal: u32) -> IngestResult<()> {
    let title = format!("{} {}", title_template, last_ordinal);
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(IngestError::Validation(format!(
            "title template is too long: titles are limited to {} characters",
            MAX_TITLE_LENGTH
        )));
    }
    validate_slug(&slugify(&title), MAX_SLUG_LENGTH)?;
    Ok(())
}

/// Staging key of an item's source bytes
pub fn source_key(group_id: Uuid, ordinal: u32, file_name: &str) -> String {
    format!("uploads/{}/{}-{}", group_id, ordinal, file_name)
}

/// Splits uploads into jobs and dispatches them
pub struct IngestionCoordinator {
    storage: Arc<dyn StorageGateway>,
    store: Arc<dyn TaskStateStore>,
    queue: TaskQueue,
    limits: ArchiveLimits,
}

impl IngestionCoordinator {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        store: Arc<dyn TaskStateStore>,
        queue: TaskQueue,
        limits: ArchiveLimits,
    ) -> Self {
        Self {
            storage,
            store,
            queue,
            limits,
        }
    }

    /// Submit a zip archive
    pub async fn submit_archive(&self, request: BatchRequest, archive: &[u8]) -> IngestResult<GroupHandle> {
        let entries = read_zip(archive, &self.limits)?;
        self.submit(request, entries).await
    }

    /// Submit a list of uploaded files
    #[instrument(skip(self, request, entries), fields(gallery_id = request.gallery_id, entries = entries.len()))]
    pub async fn submit(&self, request: BatchRequest, mut entries: Vec<UploadEntry>) -> IngestResult<GroupHandle> {
        if request.title_template.trim().is_empty() {
            return Err(IngestError::Validation("title template cannot be empty".to_string()));
        }

        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        entries.retain(|entry| match classify_entry(&entry.file_name) {
            EntryFilter::Hidden => {
                debug!(file_name = %entry.file_name, "Ignoring hidden file");
                false
            },
            EntryFilter::Nested => {
                warn!(
                    file_name = %entry.file_name,
                    "Ignoring file in a subfolder; all images should be in the top folder"
                );
                false
            },
            EntryFilter::Keep => true,
        });

        let count = u32::try_from(entries.len())
            .map_err(|_| IngestError::Validation("too many files in one batch".to_string()))?;
        if let Some(last) = count.checked_sub(1) {
            check_title_fits(&request.title_template, last)?;
        }

        let group_id = Uuid::new_v4();
        let mut items = Vec::with_capacity(entries.len());

        for (ordinal, entry) in (0..count).zip(entries) {
            let key = source_key(group_id, ordinal, &entry.file_name);

            if !self.storage.create_if_absent(&key, entry.data).await? {
                warn!(key = %key, "Staging key already existed; keeping stored bytes");
            }

            items.push(Item {
                group_id,
                ordinal_index: ordinal,
                source_key: key,
            });
        }

        let batch = Batch {
            group_id,
            gallery_id: request.gallery_id,
            site_id: request.site_id,
            title_template: request.title_template,
            caption: request.caption,
            is_public: request.is_public,
            total_items: items.len(),
        };
        let jobs: Vec<IngestionJob> = items.iter().map(|item| IngestionJob::new(&batch, item)).collect();

        self.store.register_group(&batch, &jobs).await?;

        for job in jobs {
            self.queue.enqueue(job).await?;
        }

        info!(group_id = %group_id, total = batch.total_items, "Batch submitted");

        Ok(GroupHandle {
            group_id,
            total: batch.total_items,
            gallery_id: batch.gallery_id,
        })
    }
}
