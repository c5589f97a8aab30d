//! Ingestion configuration
//!
//! Worker pool sizing, retry bounds, decode limits and archive limits.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of concurrent task executors.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default capacity of the bounded job queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default attempts per task: the first run plus five retries.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;

/// Default delay between attempts of a task whose gallery is not visible yet.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Default interval between progress polls in the CLI.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default upper bound on decoded width and height.
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 20_000;

/// Default bound on one uncompressed archive entry: 256 MiB.
pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

/// Default bound on a whole uncompressed archive: 2 GiB.
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: u64,
    #[serde(default = "default_max_archive_bytes")]
    pub max_archive_bytes: u64,
}

fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_max_image_dimension() -> u32 {
    DEFAULT_MAX_IMAGE_DIMENSION
}

fn default_max_entry_bytes() -> u64 {
    DEFAULT_MAX_ENTRY_BYTES
}

fn default_max_archive_bytes() -> u64 {
    DEFAULT_MAX_ARCHIVE_BYTES
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
        }
    }
}

impl IngestConfig {
    /// Read `INGEST_*` variables, falling back to defaults
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(name: &str, default: T) -> T {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        Self {
            worker_count: var("INGEST_WORKERS", DEFAULT_WORKER_COUNT),
            queue_capacity: var("INGEST_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY),
            max_attempts: var("INGEST_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
            retry_delay_ms: var("INGEST_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS),
            poll_interval_ms: var("INGEST_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS),
            max_image_dimension: var("INGEST_MAX_IMAGE_DIMENSION", DEFAULT_MAX_IMAGE_DIMENSION),
            max_entry_bytes: var("INGEST_MAX_ENTRY_BYTES", DEFAULT_MAX_ENTRY_BYTES),
            max_archive_bytes: var("INGEST_MAX_ARCHIVE_BYTES", DEFAULT_MAX_ARCHIVE_BYTES),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_count == 0 {
            anyhow::bail!("INGEST_WORKERS must be greater than 0");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("INGEST_QUEUE_CAPACITY must be greater than 0");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("INGEST_MAX_ATTEMPTS must be at least 1");
        }
        if self.max_image_dimension == 0 {
            anyhow::bail!("INGEST_MAX_IMAGE_DIMENSION must be greater than 0");
        }
        if self.max_entry_bytes == 0 {
            anyhow::bail!("INGEST_MAX_ENTRY_BYTES must be greater than 0");
        }
        if self.max_archive_bytes < self.max_entry_bytes {
            anyhow::bail!("INGEST_MAX_ARCHIVE_BYTES must be at least INGEST_MAX_ENTRY_BYTES");
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
