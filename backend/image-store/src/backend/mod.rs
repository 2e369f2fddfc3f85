//! Object storage seam for the remote store
//!
//! The remote store only ever talks to object storage through
//! [`ObjectBackend`]: PUT, GET, HEAD, DELETE, prefix LIST and presigned GET.

pub mod memory;
pub mod s3;

pub use memory::MemoryBackend;
pub use s3::S3Backend;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Response headers stored with an object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHeaders {
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
}

#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        headers: &ObjectHeaders,
    ) -> Result<()>;

    /// Object body; `StoreError::NotFound` when the object does not exist
    async fn get_object(&self, key: &str) -> Result<Bytes>;

    async fn head_object(&self, key: &str) -> Result<bool>;

    async fn delete_object(&self, key: &str) -> Result<()>;

    /// Every object key starting with `prefix`
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;

    /// Time-limited pre-authenticated GET URL
    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String>;
}
