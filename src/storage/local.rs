//! Local filesystem backend with HMAC-signed proxy URLs.
//!
//! Objects live under a root directory; downloads go through the API's
//! `/v1/files/{key}` proxy, authorized by an `exp`/`sig` pair signed here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::error::{ApiResult, AppError};

use super::{clamp_ttl, StoredObject};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct LocalBackend {
    root: PathBuf,
    signing_secret: String,
    public_base_url: String,
    ttl_ceiling_secs: u64,
}

impl LocalBackend {
    pub fn new(
        root: impl Into<PathBuf>,
        signing_secret: &str,
        public_base_url: &str,
        ttl_ceiling_secs: u64,
    ) -> Self {
        Self {
            root: root.into(),
            signing_secret: signing_secret.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            ttl_ceiling_secs,
        }
    }

    /// Joins the key under the root. Keys are validated upstream, but the
    /// resolved path is re-checked against the root as a second line.
    fn resolve(&self, key: &str) -> ApiResult<PathBuf> {
        let candidate = self.root.join(key);
        if !candidate.starts_with(&self.root) {
            return Err(AppError::validation("Invalid storage key"));
        }
        Ok(candidate)
    }

    pub async fn put(&self, key: &str, bytes: Vec<u8>, mime: &str) -> ApiResult<StoredObject> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::dependency(format!("Storage write failed: {}", e)))?;
        }

        let size = bytes.len();
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::dependency(format!("Storage write failed: {}", e)))?;

        debug!(key = %key, size, "Stored object locally");
        Ok(StoredObject {
            key: key.to_string(),
            size,
            mime: mime.to_string(),
        })
    }

    pub async fn read(&self, key: &str) -> ApiResult<Vec<u8>> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|_| AppError::not_found("Object not found"))
    }

    pub async fn delete(&self, key: &str) -> ApiResult<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::dependency(format!("Storage delete failed: {}", e))),
        }
    }

    pub fn sign_download(&self, key: &str, ttl: Duration) -> ApiResult<String> {
        let expires_at = Utc::now().timestamp() + clamp_ttl(ttl, self.ttl_ceiling_secs) as i64;
        let sig = self.signature(key, expires_at);
        Ok(format!(
            "{}/v1/files/{}?exp={}&sig={}",
            self.public_base_url, key, expires_at, sig
        ))
    }

    fn signature(&self, key: &str, expires_at: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(self.signing_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(format!("{}:{}", key, expires_at).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Validates the `exp`/`sig` pair minted by [`sign_download`].
    pub fn validate_signature(&self, key: &str, expires_at: i64, sig: &str) -> bool {
        if expires_at < Utc::now().timestamp() {
            return false;
        }

        let expected = self.signature(key, expires_at);
        let expected = expected.as_bytes();
        let provided = sig.as_bytes();
        if expected.len() != provided.len() {
            return false;
        }
        let mut diff = 0u8;
        for (a, b) in expected.iter().zip(provided.iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(dir: &Path) -> LocalBackend {
        LocalBackend::new(dir, "test-secret", "http://localhost:8080", 600)
    }

    #[tokio::test]
    async fn test_put_read_delete_round_trip() {
        let dir = std::env::temp_dir().join(format!("maidflow-test-{}", uuid::Uuid::new_v4()));
        let backend = backend(&dir);

        let stored = backend
            .put("orders/a/b/c.jpg", b"bytes".to_vec(), "image/jpeg")
            .await
            .unwrap();
        assert_eq!(stored.size, 5);

        let data = backend.read("orders/a/b/c.jpg").await.unwrap();
        assert_eq!(data, b"bytes");

        backend.delete("orders/a/b/c.jpg").await.unwrap();
        assert!(backend.read("orders/a/b/c.jpg").await.is_err());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("maidflow-test-{}", uuid::Uuid::new_v4()));
        let backend = backend(&dir);
        assert!(backend.delete("orders/a/b/never-existed").await.is_ok());
    }

    #[test]
    fn test_signed_url_round_trip() {
        let backend = backend(Path::new("/tmp/unused"));
        let url = backend
            .sign_download("orders/a/b/c.jpg", Duration::from_secs(60))
            .unwrap();

        assert!(url.starts_with("http://localhost:8080/v1/files/orders/a/b/c.jpg?exp="));

        let exp: i64 = url.split("exp=").nth(1).unwrap().split('&').next().unwrap().parse().unwrap();
        let sig = url.split("sig=").nth(1).unwrap();

        assert!(backend.validate_signature("orders/a/b/c.jpg", exp, sig));
        assert!(!backend.validate_signature("orders/a/b/other.jpg", exp, sig));
        assert!(!backend.validate_signature("orders/a/b/c.jpg", exp, "bad"));
    }

    #[test]
    fn test_expired_signature_rejected() {
        let backend = backend(Path::new("/tmp/unused"));
        let expired = Utc::now().timestamp() - 10;
        let sig = backend.signature("orders/a/b/c.jpg", expired);
        assert!(!backend.validate_signature("orders/a/b/c.jpg", expired, &sig));
    }

    #[test]
    fn test_ttl_ceiling_applied() {
        let backend = backend(Path::new("/tmp/unused"));
        let url = backend
            .sign_download("orders/a/b/c.jpg", Duration::from_secs(86_400))
            .unwrap();
        let exp: i64 = url.split("exp=").nth(1).unwrap().split('&').next().unwrap().parse().unwrap();
        assert!(exp <= Utc::now().timestamp() + 600 + 1);
    }
}
