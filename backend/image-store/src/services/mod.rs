//! Store variants behind the `BlobStore` trait

pub mod coalesce;
pub mod local;
pub mod remote;

pub use coalesce::Coalescer;
pub use local::LocalFilesystemStore;
pub use remote::{RemoteObjectStore, WarmReport};

use crate::error::Result;
use crate::models::{DeleteReport, Delivery, VariantSpec};
use async_trait::async_trait;
use bytes::Bytes;

/// Save, deliver and delete originals and their derived variants
///
/// Implementations may assume keys passed to `deliver`/`delete` were already
/// validated by the facade, but they validate again before touching storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under a freshly generated key and return the key
    async fn save(&self, data: Bytes, mimetype: &str) -> Result<String>;

    /// The original, or the `spec` variant generated on first request
    async fn deliver(&self, key: &str, spec: Option<&VariantSpec>) -> Result<Delivery>;

    /// Remove the original and every derived variant, best-effort
    async fn delete(&self, key: &str) -> Result<DeleteReport>;

    /// Short label for logs
    fn kind(&self) -> &'static str;
}
