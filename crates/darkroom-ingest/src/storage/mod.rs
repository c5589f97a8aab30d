//! Storage Gateway
//!
//! The pipeline reads staged uploads and writes published binaries through
//! [`StorageGateway`]. Keys are opaque relative paths such as
//! `uploads/<group>/<ordinal>-<name>` or `photos/<slug>/<name>`.
//!
//! Three adapters are provided: [`FsStorage`] for a local media root,
//! [`S3Storage`] for S3-compatible object stores and [`MemoryStorage`] for
//! tests and dry runs.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub mod config;
pub mod fs;
pub mod memory;
pub mod s3;

pub use config::{S3Config, StorageConfig};
pub use fs::FsStorage;
pub use memory::MemoryStorage;
pub use s3::S3Storage;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("IO error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Byte storage keyed by opaque path
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Read the full object
    async fn open(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Write `data` under `key` only if nothing exists there yet
    ///
    /// Returns `true` when this call created the object and `false` when an
    /// object was already present, in which case the existing bytes are left
    /// untouched.
    async fn create_if_absent(&self, key: &str, data: Vec<u8>) -> StorageResult<bool>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;
}

/// Reject keys that could escape the storage root
pub fn validate_key(key: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(invalid("key must be a relative '/'-separated path"));
    }
    if key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(invalid("key contains an empty, '.' or '..' segment"));
    }

    Ok(())
}

/// Build the configured adapter
pub async fn from_config(config: &StorageConfig) -> anyhow::Result<Arc<dyn StorageGateway>> {
    let storage: Arc<dyn StorageGateway> = match config {
        StorageConfig::Filesystem { root } => {
            tracing::info!(root = %root.display(), "Using filesystem storage");
            Arc::new(FsStorage::new(root.clone()))
        },
        StorageConfig::S3(s3) => {
            tracing::info!(bucket = %s3.bucket, "Using S3 storage");
            Arc::new(S3Storage::new(s3).await)
        },
        StorageConfig::Memory => {
            tracing::info!("Using in-memory storage");
            Arc::new(MemoryStorage::new())
        },
    };

    Ok(storage)
}
