//! Darkroom ingestion
//!
//! Accepts bulk photo uploads for a gallery, splits them into one task per
//! image, and processes the tasks in parallel with idempotent, bounded-retry
//! workers. Callers poll batch progress with the returned group handle.
//!
//! - [`ingest`]: the pipeline
//! - [`storage`]: Storage Gateway adapters (filesystem, S3, memory)
//! - [`db`]: catalog repositories (Postgres, memory)
//! - [`features`]: admin site actions

pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod storage;

pub use config::Config;
pub use error::{IngestError, IngestResult};
