//! Darkroom Common Library
//!
//! Shared types, utilities, and error handling for the Darkroom workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Common error type and result alias
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Checksums**: Content digests for stored photo binaries
//! - **Slugs**: Deterministic, URL-safe identifiers derived from titles
//!
//! # Example
//!
//! ```no_run
//! use darkroom_common::slug::slugify;
//! use darkroom_common::checksum::content_checksum;
//!
//! let slug = slugify("Summer Trip 3");
//! assert_eq!(slug, "summer-trip-3");
//! let digest = content_checksum(b"raw bytes");
//! assert_eq!(digest.len(), 64);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;
pub mod slug;

// Re-export commonly used types
pub use error::{DarkroomError, Result};
