//! Image-CDN backend.
//!
//! Uploads and deletes go to the provider's HTTP API; downloads are signed
//! `exp`/`sig` redirect URLs the CDN edge validates.

use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::Config;
use crate::error::{ApiResult, AppError};

use super::{clamp_ttl, StoredObject};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct CdnBackend {
    http: reqwest::Client,
    base_url: String,
    signing_key: String,
    ttl_ceiling_secs: u64,
}

impl CdnBackend {
    pub fn from_config(config: &Config) -> ApiResult<Self> {
        let base_url = config
            .storage
            .cdn_base_url
            .clone()
            .ok_or_else(|| AppError::internal("STORAGE_CDN_BASE_URL is required for the cdn backend"))?;
        let signing_key = config
            .storage
            .cdn_signing_key
            .clone()
            .ok_or_else(|| AppError::internal("STORAGE_CDN_SIGNING_KEY is required for the cdn backend"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::internal(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            signing_key,
            ttl_ceiling_secs: config.storage.photo_url_ttl_secs,
        })
    }

    pub async fn put(&self, key: &str, bytes: Vec<u8>, mime: &str) -> ApiResult<StoredObject> {
        let size = bytes.len();
        let response = self
            .http
            .post(format!("{}/upload/{}", self.base_url, key))
            .header("Content-Type", mime)
            .body(bytes)
            .send()
            .await
            .map_err(|e| AppError::dependency(format!("CDN upload failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::dependency(format!(
                "CDN upload rejected: {}",
                response.status()
            )));
        }

        Ok(StoredObject {
            key: key.to_string(),
            size,
            mime: mime.to_string(),
        })
    }

    pub async fn delete(&self, key: &str) -> ApiResult<()> {
        let response = self
            .http
            .delete(format!("{}/{}", self.base_url, key))
            .send()
            .await
            .map_err(|e| AppError::dependency(format!("CDN delete failed: {}", e)))?;

        if !response.status().is_success() && response.status().as_u16() != 404 {
            return Err(AppError::dependency(format!(
                "CDN delete rejected: {}",
                response.status()
            )));
        }
        Ok(())
    }

    pub fn sign_download(&self, key: &str, ttl: Duration) -> ApiResult<String> {
        let expires_at = Utc::now().timestamp() + clamp_ttl(ttl, self.ttl_ceiling_secs) as i64;

        let mut mac = HmacSha256::new_from_slice(self.signing_key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(format!("{}:{}", key, expires_at).as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());

        Ok(format!(
            "{}/{}?exp={}&sig={}",
            self.base_url, key, expires_at, sig
        ))
    }
}
