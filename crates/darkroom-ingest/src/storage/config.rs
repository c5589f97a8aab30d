use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Default root directory for the filesystem backend.
pub const DEFAULT_STORAGE_ROOT: &str = "./media";

/// Default S3 region.
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Default S3 bucket.
pub const DEFAULT_S3_BUCKET: &str = "darkroom-media";

/// Which Storage Gateway adapter to build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Filesystem { root: PathBuf },
    S3(S3Config),
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Static credentials; when absent the default AWS provider chain is used
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl StorageConfig {
    /// Read `STORAGE_BACKEND` (filesystem, s3, memory) and the backend's variables
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = env::var("STORAGE_BACKEND").unwrap_or_else(|_| "filesystem".to_string());

        match backend.to_lowercase().as_str() {
            "filesystem" | "fs" => Ok(StorageConfig::Filesystem {
                root: env::var("STORAGE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORAGE_ROOT)),
            }),
            "s3" => Ok(StorageConfig::S3(S3Config::from_env())),
            "memory" => Ok(StorageConfig::Memory),
            other => anyhow::bail!("Unknown STORAGE_BACKEND '{}'", other),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            StorageConfig::Filesystem { root } if root.as_os_str().is_empty() => {
                anyhow::bail!("STORAGE_ROOT cannot be empty")
            },
            StorageConfig::S3(s3) if s3.bucket.is_empty() => {
                anyhow::bail!("S3 bucket cannot be empty")
            },
            StorageConfig::S3(s3) if s3.access_key.is_some() != s3.secret_key.is_some() => {
                anyhow::bail!("S3_ACCESS_KEY and S3_SECRET_KEY must be set together")
            },
            StorageConfig::Memory => {
                tracing::warn!("Memory storage selected; staged uploads are lost on exit");
                Ok(())
            },
            _ => Ok(()),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Filesystem {
            root: PathBuf::from(DEFAULT_STORAGE_ROOT),
        }
    }
}

impl S3Config {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| DEFAULT_S3_REGION.to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| DEFAULT_S3_BUCKET.to_string()),
            access_key: env::var("S3_ACCESS_KEY").ok(),
            secret_key: env::var("S3_SECRET_KEY").ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    /// Local MinIO with its stock credentials
    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: DEFAULT_S3_REGION.to_string(),
            bucket: bucket.into(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
        }
    }
}
