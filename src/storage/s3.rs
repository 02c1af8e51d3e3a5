//! S3-compatible backend using presigned GET/PUT URLs.

use std::time::Duration;

use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use tracing::debug;

use crate::config::Config;
use crate::error::{ApiResult, AppError};

use super::{clamp_ttl, StoredObject};

#[derive(Clone)]
pub struct S3Backend {
    client: aws_sdk_s3::Client,
    bucket: String,
    ttl_ceiling_secs: u64,
}

impl S3Backend {
    pub async fn from_config(config: &Config) -> ApiResult<Self> {
        let bucket = config
            .storage
            .s3_bucket
            .clone()
            .ok_or_else(|| AppError::internal("STORAGE_S3_BUCKET is required for the s3 backend"))?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.storage.s3_region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.storage.s3_endpoint {
            // MinIO and friends need path-style addressing.
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket,
            ttl_ceiling_secs: config.storage.general_url_ttl_secs,
        })
    }

    pub async fn put(&self, key: &str, bytes: Vec<u8>, mime: &str) -> ApiResult<StoredObject> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(mime)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| AppError::dependency(format!("S3 put failed: {}", e)))?;

        debug!(key = %key, size, "Stored object in S3");
        Ok(StoredObject {
            key: key.to_string(),
            size,
            mime: mime.to_string(),
        })
    }

    pub async fn delete(&self, key: &str) -> ApiResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::dependency(format!("S3 delete failed: {}", e)))?;
        Ok(())
    }

    pub async fn sign_download(&self, key: &str, ttl: Duration) -> ApiResult<String> {
        let secs = clamp_ttl(ttl, self.ttl_ceiling_secs);
        let presigning = PresigningConfig::expires_in(Duration::from_secs(secs))
            .map_err(|e| AppError::internal(format!("Invalid presign TTL: {}", e)))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| AppError::dependency(format!("S3 presign failed: {}", e)))?;

        Ok(request.uri().to_string())
    }

    pub async fn sign_upload(&self, key: &str, ttl: Duration) -> ApiResult<String> {
        let secs = clamp_ttl(ttl, self.ttl_ceiling_secs);
        let presigning = PresigningConfig::expires_in(Duration::from_secs(secs))
            .map_err(|e| AppError::internal(format!("Invalid presign TTL: {}", e)))?;

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| AppError::dependency(format!("S3 presign failed: {}", e)))?;

        Ok(request.uri().to_string())
    }
}
