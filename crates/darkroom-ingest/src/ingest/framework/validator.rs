//! Image validation
//!
//! A blob is accepted only if it decodes completely. Header sniffing alone
//! lets truncated or corrupted files through.

use image::{ImageFormat, ImageReader, Limits};
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid {
        format: ImageFormat,
        width: u32,
        height: u32,
    },
    Invalid(String),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid { .. })
    }
}

/// Side-effect-free structural check of an image blob
pub trait ImageValidator: Send + Sync {
    fn validate(&self, bytes: &[u8]) -> Validation;
}

/// Validator that fully decodes with the `image` crate
#[derive(Debug, Clone)]
pub struct DecodingValidator {
    max_dimension: u32,
}

impl DecodingValidator {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }
}

impl Default for DecodingValidator {
    fn default() -> Self {
        Self::new(crate::ingest::config::DEFAULT_MAX_IMAGE_DIMENSION)
    }
}

impl ImageValidator for DecodingValidator {
    fn validate(&self, bytes: &[u8]) -> Validation {
        if bytes.is_empty() {
            return Validation::Invalid("empty file".to_string());
        }

        let mut reader = match ImageReader::new(Cursor::new(bytes)).with_guessed_format() {
            Ok(reader) => reader,
            Err(e) => return Validation::Invalid(format!("unreadable: {}", e)),
        };

        let Some(format) = reader.format() else {
            return Validation::Invalid("unrecognized image format".to_string());
        };

        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        reader.limits(limits);

        match reader.decode() {
            Ok(decoded) => Validation::Valid {
                format,
                width: decoded.width(),
                height: decoded.height(),
            },
            Err(e) => Validation::Invalid(format!("{:?} decode failed: {}", format, e)),
        }
    }
}
