//! # Object storage
//!
//! Attachments live in an S3-compatible bucket (MinIO in the stack). Only
//! metadata goes to Redis; the bytes are written here and handed back to
//! clients through short-lived presigned URLs, so downloads never pass
//! through the backend.
use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::Mutex;

mod s3;
pub mod sigv4;

pub use s3::S3Store;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("{op} {key} failed with status {status}")]
    Status {
        op: &'static str,
        key: String,
        status: u16,
    },

    #[error("invalid object store endpoint: {0}")]
    Endpoint(String),

    #[error("object store credentials missing")]
    MissingCredentials,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Creates the bucket if it does not exist yet.
    async fn ensure_bucket(&self) -> Result<(), StorageError>;
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError>;
    /// Missing objects are not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    fn presign_get(&self, key: &str, expires_secs: u64) -> Result<String, StorageError>;
}

/// Process-local bucket for tests and `DATA_BACKEND=memory`.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, (Bytes, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored bytes and content type.
    pub async fn get(&self, key: &str) -> Option<(Bytes, String)> {
        self.objects.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn ensure_bucket(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError> {
        self.objects
            .lock()
            .await
            .insert(key.to_string(), (body, content_type.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.lock().await.remove(key);
        Ok(())
    }

    fn presign_get(&self, key: &str, expires_secs: u64) -> Result<String, StorageError> {
        Ok(format!(
            "memory:///{}?X-Amz-Expires={expires_secs}",
            sigv4::uri_encode(key, true)
        ))
    }
}
