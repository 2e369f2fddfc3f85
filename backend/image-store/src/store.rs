/// Store facade
///
/// The single entry point callers use. Every method that takes a key checks
/// it against the key charset before the configured variant sees it.
use crate::config::{BackendKind, StoreConfig};
use crate::error::Result;
use crate::key::{validate_key, KeyGenerator};
use crate::models::{DeleteReport, Delivery, VariantSpec};
use crate::services::{BlobStore, LocalFilesystemStore, RemoteObjectStore};
use crate::thumbnail::ThumbnailEngine;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::info;

#[derive(Clone)]
pub struct Store {
    inner: Arc<dyn BlobStore>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("kind", &self.inner.kind()).finish()
    }
}

impl Store {
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self { inner }
    }

    /// Build the configured variant
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        let inner: Arc<dyn BlobStore> = match config.backend {
            BackendKind::Local => Arc::new(
                LocalFilesystemStore::new(
                    &config.local.root,
                    KeyGenerator::new(config.key_strategy),
                    ThumbnailEngine::new(config.quality),
                )
                .await?,
            ),
            BackendKind::RemoteCached => Arc::new(RemoteObjectStore::from_config(config).await?),
        };
        info!(kind = inner.kind(), "Store ready");
        Ok(Self::new(inner))
    }

    pub fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    /// Read `content` to the end and store it under a new key
    pub async fn save<R>(&self, mut content: R, mimetype: &str) -> Result<String>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buf = Vec::new();
        content.read_to_end(&mut buf).await?;
        self.inner.save(Bytes::from(buf), mimetype).await
    }

    pub async fn deliver(&self, key: &str, spec: Option<VariantSpec>) -> Result<Delivery> {
        validate_key(key)?;
        self.inner.deliver(key, spec.as_ref()).await
    }

    /// Deliver from loose request parameters
    ///
    /// The original is served unless both dimensions are given.
    pub async fn deliver_sized(
        &self,
        key: &str,
        width: Option<u32>,
        height: Option<u32>,
        fit: bool,
    ) -> Result<Delivery> {
        validate_key(key)?;
        let spec = match (width, height) {
            (Some(width), Some(height)) => Some(VariantSpec::new(width, height, fit)?),
            _ => None,
        };
        self.inner.deliver(key, spec.as_ref()).await
    }

    pub async fn delete(&self, key: &str) -> Result<DeleteReport> {
        validate_key(key)?;
        self.inner.delete(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls that reach the variant
    #[derive(Default)]
    struct Recording {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for Recording {
        async fn save(&self, _data: Bytes, _mimetype: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("k".to_string())
        }

        async fn deliver(&self, _key: &str, _spec: Option<&VariantSpec>) -> Result<Delivery> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Delivery::content(Bytes::new(), "image/png"))
        }

        async fn delete(&self, _key: &str) -> Result<DeleteReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DeleteReport::default())
        }

        fn kind(&self) -> &'static str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_invalid_keys_never_reach_variant() {
        let inner = Arc::new(Recording::default());
        let store = Store::new(inner.clone());

        for key in ["", "../x", "a/b", "a.b", "a\u{0}"] {
            assert!(matches!(store.deliver(key, None).await, Err(StoreError::InvalidKey(_))));
            assert!(matches!(
                store.deliver_sized(key, Some(1), Some(1), true).await,
                Err(StoreError::InvalidKey(_))
            ));
            assert!(matches!(store.delete(key).await, Err(StoreError::InvalidKey(_))));
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deliver_sized_validates_box() {
        let inner = Arc::new(Recording::default());
        let store = Store::new(inner.clone());

        assert!(matches!(
            store.deliver_sized("abc", Some(0), Some(10), false).await,
            Err(StoreError::InvalidVariant(_))
        ));
        store.deliver_sized("abc", Some(10), None, false).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_save_reads_stream() {
        let store = Store::new(Arc::new(Recording::default()));
        let key = store.save(&b"bytes"[..], "image/png").await.unwrap();
        assert_eq!(key, "k");
        assert_eq!(store.kind(), "recording");
    }
}
