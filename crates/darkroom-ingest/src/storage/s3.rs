use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    error::ProvideErrorMetadata,
    primitives::ByteStream,
    Client,
};
use tracing::{debug, info, instrument};

use super::{validate_key, S3Config, StorageError, StorageGateway, StorageResult};

/// S3 error code returned when `If-None-Match: *` finds an existing object
const PRECONDITION_FAILED: &str = "PreconditionFailed";

/// Storage backed by an S3-compatible bucket
///
/// `create_if_absent` relies on conditional writes (`If-None-Match: *`),
/// supported by AWS S3 and recent MinIO releases.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub async fn new(config: &S3Config) -> Self {
        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .credentials_provider(Credentials::new(
                    access_key,
                    secret_key,
                    None,
                    None,
                    "darkroom-storage",
                )),
            _ => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        };

        builder = builder
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(bucket = %config.bucket, region = %config.region, "S3 storage client initialized");

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl StorageGateway for S3Storage {
    #[instrument(skip(self))]
    async fn open(&self, key: &str) -> StorageResult<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let err = e.into_service_error();
                if err.is_no_such_key() {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Backend(format!("get s3://{}/{}: {}", self.bucket, key, err))
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(format!("read body of {}: {}", key, e)))?
            .into_bytes()
            .to_vec();

        debug!(bytes = data.len(), "Downloaded object");
        Ok(data)
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn create_if_absent(&self, key: &str, data: Vec<u8>) -> StorageResult<bool> {
        validate_key(key)?;

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .if_none_match("*")
            .body(ByteStream::from(data))
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Created object");
                Ok(true)
            },
            Err(e) => {
                let err = e.into_service_error();
                if err.code() == Some(PRECONDITION_FAILED) {
                    debug!("Object already present");
                    Ok(false)
                } else {
                    Err(StorageError::Backend(format!(
                        "put s3://{}/{}: {}",
                        self.bucket, key, err
                    )))
                }
            },
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = e.into_service_error();
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::Backend(format!(
                        "head s3://{}/{}: {}",
                        self.bucket, key, err
                    )))
                }
            },
        }
    }
}
