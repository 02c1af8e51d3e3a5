//! Storage gateway: one contract over local FS, S3-compatible object stores
//! and an image CDN.
//!
//! Keys are tenant-scoped (`orders/{org_id}/{booking_id}/{photo_id}[.ext]`)
//! and validated before they reach any backend. Download URLs are always
//! signed and TTL-capped; raw bucket URLs never leave this module.

pub mod cdn;
pub mod local;
pub mod memory;
pub mod s3;

use std::time::Duration;

use uuid::Uuid;

use crate::config::{Config, StorageBackendKind};
use crate::error::{ApiResult, AppError};

pub use cdn::CdnBackend;
pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use s3::S3Backend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size: usize,
    pub mime: String,
}

/// The closed set of backends. The variant is chosen once at startup; there
/// is no runtime name lookup.
#[derive(Clone)]
pub enum StorageGateway {
    Local(LocalBackend),
    S3(S3Backend),
    ImageCdn(CdnBackend),
    Memory(MemoryBackend),
}

impl StorageGateway {
    pub async fn from_config(config: &Config) -> ApiResult<Self> {
        match config.storage.backend {
            StorageBackendKind::Local => Ok(StorageGateway::Local(LocalBackend::new(
                &config.storage.local_root,
                &config.auth.secret,
                &config.server.public_base_url,
                config.storage.general_url_ttl_secs,
            ))),
            StorageBackendKind::S3 => {
                let backend = S3Backend::from_config(config).await?;
                Ok(StorageGateway::S3(backend))
            }
            StorageBackendKind::ImageCdn => {
                let backend = CdnBackend::from_config(config)?;
                Ok(StorageGateway::ImageCdn(backend))
            }
        }
    }

    pub async fn put(&self, key: &str, bytes: Vec<u8>, mime: &str) -> ApiResult<StoredObject> {
        validate_key(key)?;
        match self {
            StorageGateway::Local(b) => b.put(key, bytes, mime).await,
            StorageGateway::S3(b) => b.put(key, bytes, mime).await,
            StorageGateway::ImageCdn(b) => b.put(key, bytes, mime).await,
            StorageGateway::Memory(b) => b.put(key, bytes, mime),
        }
    }

    pub async fn delete(&self, key: &str) -> ApiResult<()> {
        validate_key(key)?;
        match self {
            StorageGateway::Local(b) => b.delete(key).await,
            StorageGateway::S3(b) => b.delete(key).await,
            StorageGateway::ImageCdn(b) => b.delete(key).await,
            StorageGateway::Memory(b) => b.delete(key),
        }
    }

    /// Mints a time-limited download URL. The TTL is clamped to the
    /// backend's configured ceiling.
    pub async fn sign_download(&self, key: &str, ttl: Duration) -> ApiResult<String> {
        validate_key(key)?;
        match self {
            StorageGateway::Local(b) => b.sign_download(key, ttl),
            StorageGateway::S3(b) => b.sign_download(key, ttl).await,
            StorageGateway::ImageCdn(b) => b.sign_download(key, ttl),
            StorageGateway::Memory(b) => b.sign_download(key, ttl),
        }
    }

    /// Direct-upload URL where the backend supports it (S3 presigned PUT).
    pub async fn sign_upload(&self, key: &str, ttl: Duration) -> ApiResult<Option<String>> {
        validate_key(key)?;
        match self {
            StorageGateway::S3(b) => b.sign_upload(key, ttl).await.map(Some),
            _ => Ok(None),
        }
    }
}

/// Builds the canonical photo key.
pub fn photo_key(org_id: Uuid, booking_id: Uuid, photo_id: Uuid, ext: Option<&str>) -> String {
    match ext {
        Some(ext) => format!("orders/{}/{}/{}.{}", org_id, booking_id, photo_id, ext),
        None => format!("orders/{}/{}/{}", org_id, booking_id, photo_id),
    }
}

pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Every component must stay within `[A-Za-z0-9._-]`; traversal sequences
/// and absolute paths are rejected outright.
pub fn validate_key(key: &str) -> ApiResult<()> {
    if key.is_empty() || key.len() > 512 {
        return Err(AppError::validation("Invalid storage key"));
    }
    if key.starts_with('/') || key.ends_with('/') {
        return Err(AppError::validation("Invalid storage key"));
    }

    for component in key.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(AppError::validation("Invalid storage key"));
        }
        if !component
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
        {
            return Err(AppError::validation("Invalid storage key"));
        }
    }

    Ok(())
}

pub(crate) fn clamp_ttl(ttl: Duration, ceiling_secs: u64) -> u64 {
    ttl.as_secs().clamp(1, ceiling_secs.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_photo_key_layout() {
        let org = Uuid::new_v4();
        let booking = Uuid::new_v4();
        let photo = Uuid::new_v4();

        let key = photo_key(org, booking, photo, Some("jpg"));
        assert_eq!(key, format!("orders/{}/{}/{}.jpg", org, booking, photo));
        assert!(validate_key(&key).is_ok());

        let bare = photo_key(org, booking, photo, None);
        assert!(validate_key(&bare).is_ok());
    }

    #[test]
    fn test_traversal_rejected() {
        for key in [
            "orders/../etc/passwd",
            "../secrets",
            "orders/a/./b",
            "/orders/abs",
            "orders//double",
            "orders/a/b/",
        ] {
            assert!(validate_key(key).is_err(), "{} should be rejected", key);
        }
    }

    #[test]
    fn test_bad_characters_rejected() {
        for key in [
            "orders/a b/c",
            "orders/a/b/c?x=1",
            "orders/a/%2e%2e/c",
            "orders/a/b/c\u{0000}",
        ] {
            assert!(validate_key(key).is_err(), "{} should be rejected", key);
        }
    }

    #[test]
    fn test_empty_and_oversized_rejected() {
        assert!(validate_key("").is_err());
        let long = "a/".repeat(300);
        assert!(validate_key(&long).is_err());
    }

    #[test]
    fn test_ttl_clamped_to_ceiling() {
        assert_eq!(clamp_ttl(Duration::from_secs(3600), 600), 600);
        assert_eq!(clamp_ttl(Duration::from_secs(30), 600), 30);
        assert_eq!(clamp_ttl(Duration::from_secs(0), 600), 1);
    }

    #[test]
    fn test_extension_mapping() {
        assert_eq!(extension_for_mime("image/jpeg"), Some("jpg"));
        assert_eq!(extension_for_mime("application/pdf"), None);
    }
}
