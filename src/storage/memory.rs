//! In-memory backend for tests and local development fixtures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::error::{ApiResult, AppError};

use super::{clamp_ttl, StoredObject};

#[derive(Clone, Default)]
pub struct MemoryBackend {
    objects: Arc<Mutex<HashMap<String, (Vec<u8>, String)>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, bytes: Vec<u8>, mime: &str) -> ApiResult<StoredObject> {
        let size = bytes.len();
        self.objects
            .lock()
            .expect("memory storage lock")
            .insert(key.to_string(), (bytes, mime.to_string()));
        Ok(StoredObject {
            key: key.to_string(),
            size,
            mime: mime.to_string(),
        })
    }

    pub fn read(&self, key: &str) -> ApiResult<Vec<u8>> {
        self.objects
            .lock()
            .expect("memory storage lock")
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| AppError::not_found("Object not found"))
    }

    pub fn delete(&self, key: &str) -> ApiResult<()> {
        self.objects
            .lock()
            .expect("memory storage lock")
            .remove(key);
        Ok(())
    }

    pub fn sign_download(&self, key: &str, ttl: Duration) -> ApiResult<String> {
        let expires_at = Utc::now().timestamp() + clamp_ttl(ttl, 600) as i64;
        Ok(format!("memory://{}?exp={}", key, expires_at))
    }

    pub fn len(&self) -> usize {
        self.objects.lock().expect("memory storage lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let backend = MemoryBackend::new();
        backend.put("orders/a/b/c", b"data".to_vec(), "image/png").unwrap();
        assert_eq!(backend.read("orders/a/b/c").unwrap(), b"data");
        backend.delete("orders/a/b/c").unwrap();
        assert!(backend.read("orders/a/b/c").is_err());
        assert!(backend.is_empty());
    }
}
