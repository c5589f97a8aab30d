//! Content digests for photo binaries

use crate::error::{DarkroomError, Result};
use sha2::{Digest, Sha256};

/// Compute the hex-encoded SHA-256 of an in-memory blob
pub fn content_checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Verify that a blob matches an expected digest
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<()> {
    let actual = content_checksum(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(DarkroomError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
