use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{validate_key, StorageError, StorageGateway, StorageResult};

/// Storage rooted at a local directory
///
/// `create_if_absent` writes to a sibling temp file and publishes it with a
/// hard link, which fails with `AlreadyExists` when the key is taken. Readers
/// never observe a half-written object.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, part| path.join(part)))
    }
}

fn io_error(key: &str, source: std::io::Error) -> StorageError {
    StorageError::Io {
        key: key.to_string(),
        source,
    }
}

#[async_trait]
impl StorageGateway for FsStorage {
    #[instrument(skip(self))]
    async fn open(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_for(key)?;

        match tokio::fs::read(&path).await {
            Ok(data) => {
                debug!(bytes = data.len(), "Read object");
                Ok(data)
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(io_error(key, e)),
        }
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn create_if_absent(&self, key: &str, data: Vec<u8>) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| io_error(key, e))?;

        let temp = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&temp, &data)
            .await
            .map_err(|e| io_error(key, e))?;

        let linked = tokio::fs::hard_link(&temp, &path).await;

        if let Err(e) = tokio::fs::remove_file(&temp).await {
            debug!(temp = %temp.display(), error = %e, "Failed to remove temp file");
        }

        match linked {
            Ok(()) => {
                debug!("Created object");
                Ok(true)
            },
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("Object already present");
                Ok(false)
            },
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error(key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_if_absent_keeps_first_write() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());

        assert!(storage.create_if_absent("photos/a/one.jpg", b"first".to_vec()).await.unwrap());
        assert!(!storage.create_if_absent("photos/a/one.jpg", b"second".to_vec()).await.unwrap());

        assert_eq!(storage.open("photos/a/one.jpg").await.unwrap(), b"first");
        assert!(dir.path().join("photos").join("a").join("one.jpg").exists());
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());

        storage.create_if_absent("x/y.bin", vec![1, 2, 3]).await.unwrap();
        storage.create_if_absent("x/y.bin", vec![4]).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path().join("x"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["y.bin".to_string()]);
    }

    #[tokio::test]
    async fn test_open_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());

        assert!(matches!(
            storage.open("nope.jpg").await,
            Err(StorageError::NotFound(key)) if key == "nope.jpg"
        ));
        assert!(!storage.exists("nope.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());

        assert!(matches!(
            storage.create_if_absent("../escape", vec![0]).await,
            Err(StorageError::InvalidKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_writers_single_winner() {
        let dir = TempDir::new().unwrap();
        let storage = std::sync::Arc::new(FsStorage::new(dir.path()));

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                storage.create_if_absent("race/key", vec![i]).await.unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }
}
