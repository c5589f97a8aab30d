//! Error types shared across Darkroom crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, DarkroomError>;

/// Main error type for shared utilities
#[derive(Error, Debug)]
pub enum DarkroomError {
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Invalid slug '{slug}': {reason}")]
    InvalidSlug { slug: String, reason: String },
}
