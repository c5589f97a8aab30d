//! Zip archive splitting

use std::io::{Cursor, Read};

use crate::error::{IngestError, IngestResult};
use crate::ingest::framework::types::UploadEntry;
use crate::ingest::IngestConfig;

/// Upper bounds on what one archive may expand to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLimits {
    /// Uncompressed bytes of a single entry
    pub max_entry_bytes: u64,
    /// Uncompressed bytes of all entries together
    pub max_archive_bytes: u64,
}

impl ArchiveLimits {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_entry_bytes: config.max_entry_bytes,
            max_archive_bytes: config.max_archive_bytes,
        }
    }
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

/// Read every file entry of a zip archive, sorted by in-archive name
///
/// Directory entries are dropped. Nested and hidden files are kept here and
/// filtered by the coordinator so that they are logged alongside multi-file
/// uploads.
///
/// Sizes declared in the archive headers are not trusted: each entry is read
/// through a bounded reader and the running total is checked as it grows.
pub fn read_zip(bytes: &[u8], limits: &ArchiveLimits) -> IngestResult<Vec<UploadEntry>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut entries = Vec::new();
    let mut total: u64 = 0;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }

        let file_name = file.name().to_string();
        if file.size() > limits.max_entry_bytes {
            return Err(IngestError::Archive(format!(
                "{}: declared size {} exceeds the {} byte entry limit",
                file_name,
                file.size(),
                limits.max_entry_bytes
            )));
        }

        let mut data = Vec::new();
        (&mut file)
            .take(limits.max_entry_bytes.saturating_add(1))
            .read_to_end(&mut data)
            .map_err(|e| IngestError::Archive(format!("{}: {}", file_name, e)))?;

        let read = data.len() as u64;
        if read > limits.max_entry_bytes {
            return Err(IngestError::Archive(format!(
                "{}: entry exceeds the {} byte limit",
                file_name, limits.max_entry_bytes
            )));
        }

        total = total.saturating_add(read);
        if total > limits.max_archive_bytes {
            return Err(IngestError::Archive(format!(
                "archive expands past the {} byte limit",
                limits.max_archive_bytes
            )));
        }

        entries.push(UploadEntry { file_name, data });
    }

    entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    tracing::debug!(entries = entries.len(), bytes = total, "Read zip archive");

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;

    fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, data) in files {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    /// Overwrite the uncompressed size recorded in the central directory
    fn patch_declared_size(bytes: &mut [u8], size: u32) {
        let header = bytes
            .windows(4)
            .position(|w| w == [0x50, 0x4b, 0x01, 0x02])
            .expect("central directory header");
        bytes[header + 24..header + 28].copy_from_slice(&size.to_le_bytes());
    }

    fn limits(max_entry_bytes: u64, max_archive_bytes: u64) -> ArchiveLimits {
        ArchiveLimits {
            max_entry_bytes,
            max_archive_bytes,
        }
    }

    #[test]
    fn test_read_zip_sorted_without_dirs() {
        let bytes = build_zip(&[
            ("b.jpg", b"bbb"),
            ("nested/", b""),
            ("nested/c.jpg", b"ccc"),
            ("a.jpg", b"aaa"),
        ]);

        let entries = read_zip(&bytes, &ArchiveLimits::default()).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg", "nested/c.jpg"]);
        assert_eq!(entries[0].data, b"aaa");
    }

    #[test]
    fn test_read_zip_rejects_garbage() {
        assert!(read_zip(b"definitely not a zip", &ArchiveLimits::default()).is_err());
    }

    #[test]
    fn test_inflated_declared_size_is_rejected() {
        let mut bytes = build_zip(&[("a.jpg", b"aaa")]);
        patch_declared_size(&mut bytes, 0xF000_0000);

        let err = read_zip(&bytes, &ArchiveLimits::default()).unwrap_err();
        assert!(matches!(err, IngestError::Archive(_)));
    }

    #[test]
    fn test_declared_size_does_not_size_the_buffer() {
        let mut bytes = build_zip(&[("a.jpg", b"aaa")]);
        patch_declared_size(&mut bytes, 0xF000_0000);

        // limits wide enough to let the header through
        let entries = read_zip(&bytes, &limits(u64::MAX, u64::MAX)).unwrap();
        assert_eq!(entries[0].data, b"aaa");
        assert!(entries[0].data.capacity() < 1 << 20);
    }

    #[test]
    fn test_oversized_entry_is_rejected() {
        let bytes = build_zip(&[("a.jpg", &[7u8; 64])]);

        let err = read_zip(&bytes, &limits(63, 1024)).unwrap_err();
        assert!(matches!(err, IngestError::Archive(_)));
        assert!(read_zip(&bytes, &limits(64, 1024)).is_ok());
    }

    #[test]
    fn test_archive_total_is_bounded() {
        let bytes = build_zip(&[("a.jpg", &[1u8; 40]), ("b.jpg", &[2u8; 40])]);

        let err = read_zip(&bytes, &limits(64, 79)).unwrap_err();
        assert!(err.to_string().contains("79 byte limit"));
        assert_eq!(read_zip(&bytes, &limits(64, 80)).unwrap().len(), 2);
    }
}
