//! Remote object store fronted by a local disk cache
//!
//! Objects are stored remotely as `<prefix><identity>`. The cache holds
//! `<identity>.<ext>` files: originals keep the extension of their MIME
//! type, derived variants are always `.jpg`. Cached originals are served
//! directly; uncached ones are answered with a signed-URL redirect.

use super::{BlobStore, Coalescer};
use crate::backend::{ObjectBackend, ObjectHeaders, S3Backend};
use crate::cache::{AccessLog, FileCache, ManageReport};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::key::{validate_key, KeyGenerator};
use crate::media::{extension_for_mime, mime_for_extension, sniff_content_type, KNOWN_EXTENSIONS};
use crate::models::{is_identity_of, parse_identity, DeleteReport, Delivery, VariantSpec};
use crate::thumbnail::ThumbnailEngine;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CACHE_CONTROL: &str = "public, max-age=86400";
const DERIVED_EXTENSION: &str = "jpg";
const DERIVED_MIME: &str = "image/jpeg";
const WARM_CONCURRENCY: usize = 8;

/// Outcome of a cache warm-up
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmReport {
    pub fetched: Vec<String>,
    pub skipped: Vec<String>,
    /// (identity, error)
    pub failed: Vec<(String, String)>,
}

enum WarmOutcome {
    Fetched(String),
    Skipped(String),
    Failed(String, StoreError),
}

pub struct RemoteObjectStore {
    backend: Arc<dyn ObjectBackend>,
    prefix: String,
    cache: FileCache,
    keys: KeyGenerator,
    engine: ThumbnailEngine,
    url_ttl: Duration,
    coalescer: Coalescer,
}

impl std::fmt::Debug for RemoteObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObjectStore")
            .field("prefix", &self.prefix)
            .field("cache", &self.cache)
            .field("url_ttl", &self.url_ttl)
            .finish_non_exhaustive()
    }
}

impl RemoteObjectStore {
    /// Store with no key prefix, default key strategy and quality, 1h signed URLs
    pub fn new(backend: Arc<dyn ObjectBackend>, cache: FileCache) -> Self {
        Self {
            backend,
            prefix: String::new(),
            cache,
            keys: KeyGenerator::default(),
            engine: ThumbnailEngine::default(),
            url_ttl: Duration::from_secs(3600),
            coalescer: Coalescer::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_keys(mut self, keys: KeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_engine(mut self, engine: ThumbnailEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_url_ttl(mut self, url_ttl: Duration) -> Self {
        self.url_ttl = url_ttl;
        self
    }

    /// S3 backend plus an initialized cache, as configured
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        let s3 = config.s3()?;
        let backend = S3Backend::from_config(s3).await?;
        let cache = FileCache::new(&config.cache.dir);
        cache.init().await?;

        Ok(Self::new(Arc::new(backend), cache)
            .with_prefix(s3.key_prefix.clone())
            .with_keys(KeyGenerator::new(config.key_strategy))
            .with_engine(ThumbnailEngine::new(config.quality))
            .with_url_ttl(Duration::from_secs(s3.presigned_url_expiration_secs)))
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    fn remote_key(&self, identity: &str) -> String {
        format!("{}{}", self.prefix, identity)
    }

    fn headers(&self, file_name: &str) -> ObjectHeaders {
        ObjectHeaders {
            content_disposition: Some(format!("inline; filename={}{}", self.prefix, file_name)),
            cache_control: Some(CACHE_CONTROL.to_string()),
        }
    }

    /// Cached original bytes and their MIME type, probing known extensions
    ///
    /// A key shaped like `base_WxH` never matches `.jpg`; that file is the
    /// derived variant of `base`.
    async fn cached_original(&self, key: &str) -> Result<Option<(Bytes, &'static str)>> {
        let derived_shape = parse_identity(key).1.is_some();
        for ext in KNOWN_EXTENSIONS {
            if derived_shape && *ext == DERIVED_EXTENSION {
                continue;
            }
            if let Some(data) = self.cache.read(&format!("{key}.{ext}")).await? {
                return Ok(Some((data, mime_for_extension(ext))));
            }
        }
        Ok(None)
    }

    async fn is_cached(&self, identity: &str) -> bool {
        match parse_identity(identity) {
            (_, Some(_)) => {
                self.cache
                    .contains(&format!("{identity}.{DERIVED_EXTENSION}"))
                    .await
            }
            (_, None) => {
                for ext in KNOWN_EXTENSIONS {
                    if self.cache.contains(&format!("{identity}.{ext}")).await {
                        return true;
                    }
                }
                false
            }
        }
    }

    /// Download `identity` into the cache
    async fn fetch_into_cache(&self, identity: &str) -> Result<Bytes> {
        let data = self.backend.get_object(&self.remote_key(identity)).await?;
        let ext = match parse_identity(identity) {
            (_, Some(_)) => DERIVED_EXTENSION,
            (_, None) => extension_for_mime(sniff_content_type(&data)),
        };
        self.cache.write(&format!("{identity}.{ext}"), &data).await?;
        debug!(identity = %identity, size = data.len(), "Fetched remote object into cache");
        Ok(data)
    }

    async fn load_original(&self, key: &str) -> Result<Bytes> {
        match self.cached_original(key).await? {
            Some((data, _)) => Ok(data),
            None => {
                debug!(key = %key, "Original cache miss");
                self.fetch_into_cache(key).await
            }
        }
    }

    async fn deliver_original(&self, key: &str) -> Result<Delivery> {
        if let Some((data, content_type)) = self.cached_original(key).await? {
            debug!(key = %key, "Original cache hit");
            return Ok(Delivery::content(data, content_type));
        }

        let remote_key = self.remote_key(key);
        if !self.backend.head_object(&remote_key).await? {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let url = self.backend.presign_get(&remote_key, self.url_ttl).await?;
        debug!(key = %key, "Original not cached, redirecting to signed URL");
        Ok(Delivery::redirect(url))
    }

    async fn deliver_derived(&self, key: &str, spec: &VariantSpec) -> Result<Delivery> {
        let identity = spec.identity(key);
        let cache_name = format!("{identity}.{DERIVED_EXTENSION}");

        if let Some(data) = self.cache.read(&cache_name).await? {
            debug!(identity = %identity, "Derived variant cache hit");
            return Ok(Delivery::content(data, DERIVED_MIME));
        }

        let _flight = self.coalescer.acquire(&identity).await;
        if let Some(data) = self.cache.read(&cache_name).await? {
            return Ok(Delivery::content(data, DERIVED_MIME));
        }
        debug!(identity = %identity, "Derived variant cache miss");

        // generated earlier, possibly by another node
        if self.backend.head_object(&self.remote_key(&identity)).await? {
            let data = self.fetch_into_cache(&identity).await?;
            return Ok(Delivery::content(data, DERIVED_MIME));
        }

        let original = self.load_original(key).await?;
        let thumb = self.engine.render_async(original, *spec).await?;

        self.cache.write(&cache_name, &thumb.data).await?;
        if let Err(e) = self
            .backend
            .put_object(
                &self.remote_key(&identity),
                thumb.data.clone(),
                DERIVED_MIME,
                &self.headers(&cache_name),
            )
            .await
        {
            warn!(identity = %identity, error = %e, "Derived variant upload failed");
            if let Err(cleanup) = self.cache.remove(&cache_name).await {
                warn!(identity = %identity, error = %cleanup, "Failed to drop cached variant");
            }
            return Err(e);
        }

        info!(
            identity = %identity,
            width = thumb.width,
            height = thumb.height,
            size = thumb.data.len(),
            "Derived variant created"
        );
        Ok(Delivery::content(thumb.data, DERIVED_MIME))
    }

    async fn warm_one(&self, identity: String) -> WarmOutcome {
        if validate_key(&identity).is_err() {
            return WarmOutcome::Failed(identity.clone(), StoreError::InvalidKey(identity));
        }
        if self.is_cached(&identity).await {
            return WarmOutcome::Skipped(identity);
        }
        match self.fetch_into_cache(&identity).await {
            Ok(_) => WarmOutcome::Fetched(identity),
            Err(e) => WarmOutcome::Failed(identity, e),
        }
    }

    /// Download identities that are not cached yet
    ///
    /// With `None`, every original under the key prefix is warmed.
    pub async fn warm(&self, identities: Option<Vec<String>>) -> Result<WarmReport> {
        let identities = match identities {
            Some(identities) => identities,
            None => self
                .backend
                .list_objects(&self.prefix)
                .await?
                .into_iter()
                .filter_map(|name| name.strip_prefix(&self.prefix).map(str::to_string))
                .filter(|identity| parse_identity(identity).1.is_none())
                .collect(),
        };

        let outcomes: Vec<WarmOutcome> = stream::iter(identities)
            .map(|identity| self.warm_one(identity))
            .buffer_unordered(WARM_CONCURRENCY)
            .collect()
            .await;

        let mut report = WarmReport::default();
        for outcome in outcomes {
            match outcome {
                WarmOutcome::Fetched(identity) => report.fetched.push(identity),
                WarmOutcome::Skipped(identity) => report.skipped.push(identity),
                WarmOutcome::Failed(identity, e) => {
                    warn!(identity = %identity, error = %e, "Cache warm failed");
                    report.failed.push((identity, e.to_string()));
                }
            }
        }
        report.fetched.sort();
        report.skipped.sort();

        info!(
            fetched = report.fetched.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Cache warm finished"
        );
        Ok(report)
    }

    /// Evict down to `max_size` and fetch what the eviction policy nominates
    ///
    /// Nominations are fetched without knowing their size, so the cache is
    /// evicted again afterwards and always ends within `max_size`.
    pub async fn manage_cache(
        &self,
        access_log: &AccessLog,
        max_size: u64,
    ) -> Result<(ManageReport, WarmReport)> {
        let mut managed = self.cache.manage(access_log, max_size).await?;
        let warmed = self.warm(Some(managed.prefetch.clone())).await?;

        if !warmed.fetched.is_empty() {
            let settled = self.cache.manage(access_log, max_size).await?;
            managed.evicted.extend(settled.evicted);
            managed.bytes_after = settled.bytes_after;
        }
        Ok((managed, warmed))
    }

    /// Drop every cached file of `key` and its derived variants
    async fn purge_cached(&self, key: &str) -> Result<()> {
        for entry in self.cache.entries().await? {
            if is_identity_of(key, entry.identity()) {
                if let Err(e) = self.cache.remove(&entry.name).await {
                    warn!(entry = %entry.name, error = %e, "Failed to purge cache entry");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for RemoteObjectStore {
    async fn save(&self, data: Bytes, mimetype: &str) -> Result<String> {
        let key = self.keys.generate();
        validate_key(&key)?;
        let file_name = format!("{key}.{}", extension_for_mime(mimetype));

        self.cache.write(&file_name, &data).await?;
        let size = data.len();
        if let Err(e) = self
            .backend
            .put_object(&self.remote_key(&key), data, mimetype, &self.headers(&file_name))
            .await
        {
            warn!(key = %key, error = %e, "Upload failed, dropping cached copy");
            if let Err(cleanup) = self.cache.remove(&file_name).await {
                warn!(key = %key, error = %cleanup, "Failed to drop cached copy");
            }
            return Err(e);
        }

        info!(key = %key, mimetype = %mimetype, size, "Object saved");
        Ok(key)
    }

    async fn deliver(&self, key: &str, spec: Option<&VariantSpec>) -> Result<Delivery> {
        validate_key(key)?;
        match spec {
            None => self.deliver_original(key).await,
            Some(spec) => self.deliver_derived(key, spec).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<DeleteReport> {
        validate_key(key)?;

        let mut identities: Vec<String> = self
            .backend
            .list_objects(&self.remote_key(key))
            .await?
            .into_iter()
            .filter_map(|name| name.strip_prefix(&self.prefix).map(str::to_string))
            .filter(|identity| is_identity_of(key, identity))
            .collect();
        if identities.is_empty() {
            // stale local copies of an object that is gone remotely
            self.purge_cached(key).await?;
            return Err(StoreError::NotFound(key.to_string()));
        }
        identities.sort();

        let mut report = DeleteReport::default();
        for identity in identities {
            let result = self.backend.delete_object(&self.remote_key(&identity)).await;
            if let Err(e) = &result {
                warn!(identity = %identity, error = %e, "Failed to delete remote object");
            }
            report.push(identity, result);
        }

        self.purge_cached(key).await?;

        info!(
            key = %key,
            deleted = report.deleted(),
            failed = report.failures().count(),
            "Object deleted"
        );
        Ok(report)
    }

    fn kind(&self) -> &'static str {
        "remote-cached"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use image::{DynamicImage, ImageOutputFormat, RgbImage};
    use std::io::Cursor;
    use tempfile::{tempdir, TempDir};

    fn png(width: u32, height: u32) -> Bytes {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        Bytes::from(buf)
    }

    async fn store(backend: &Arc<MemoryBackend>) -> (RemoteObjectStore, TempDir) {
        let dir = tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        cache.init().await.unwrap();
        let store = RemoteObjectStore::new(backend.clone(), cache).with_prefix("images_");
        (store, dir)
    }

    #[tokio::test]
    async fn test_save_uploads_with_headers() {
        let backend = Arc::new(MemoryBackend::new());
        let (store, _dir) = store(&backend).await;

        let key = store.save(png(4, 4), "image/png").await.unwrap();
        let object = backend.object(&format!("images_{key}")).unwrap();
        assert_eq!(object.content_type, "image/png");
        assert_eq!(
            object.headers.content_disposition.as_deref(),
            Some(format!("inline; filename=images_{key}.png").as_str())
        );
        assert_eq!(object.headers.cache_control.as_deref(), Some(CACHE_CONTROL));
        assert!(store.cache().contains(&format!("{key}.png")).await);
    }

    #[tokio::test]
    async fn test_uncached_original_redirects() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("images_abc", png(4, 4), "image/png");
        let (store, _dir) = store(&backend).await;

        let delivery = store.deliver("abc", None).await.unwrap();
        assert_eq!(
            delivery,
            Delivery::Redirect {
                url: "memory://images_abc?expires_in=3600".to_string(),
                status: 307
            }
        );

        assert!(matches!(
            store.deliver("missing", None).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_derived_variant_fetched_from_remote_when_present() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("images_abc", png(40, 40), "image/png");
        backend.insert("images_abc_10x10", Bytes::from_static(b"jpeg"), "image/jpeg");
        let (store, _dir) = store(&backend).await;

        let delivery = store
            .deliver("abc", Some(&VariantSpec::cropped(10, 10).unwrap()))
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::content(Bytes::from_static(b"jpeg"), DERIVED_MIME));
        assert_eq!(backend.puts(), 0);
        assert_eq!(backend.gets(), 1);
        assert!(store.cache().contains("abc_10x10.jpg").await);
    }

    #[tokio::test]
    async fn test_delete_skips_keys_sharing_a_prefix() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("images_abc", png(4, 4), "image/png");
        backend.insert("images_abc_10x10", png(4, 4), "image/jpeg");
        backend.insert("images_abcd", png(4, 4), "image/png");
        let (store, _dir) = store(&backend).await;
        store.cache().write("abc_10x10.jpg", b"x").await.unwrap();
        store.cache().write("abcd.png", b"x").await.unwrap();

        let report = store.delete("abc").await.unwrap();
        assert_eq!(report.deleted(), 2);
        assert_eq!(backend.keys(), vec!["images_abcd".to_string()]);
        assert!(!store.cache().contains("abc_10x10.jpg").await);
        assert!(store.cache().contains("abcd.png").await);

        assert!(matches!(store.delete("abc").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_of_missing_object_purges_stale_cache() {
        let backend = Arc::new(MemoryBackend::new());
        let (store, _dir) = store(&backend).await;
        store.cache().write("abc.png", &png(4, 4)).await.unwrap();

        assert!(matches!(store.delete("abc").await, Err(StoreError::NotFound(_))));
        assert!(!store.cache().contains("abc.png").await);
        assert!(matches!(
            store.deliver("abc", None).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_derived_shaped_key_ignores_variant_cache_file() {
        let backend = Arc::new(MemoryBackend::new());
        let (store, _dir) = store(&backend).await;
        store.cache().write("abc_10x10.jpg", b"variant of abc").await.unwrap();

        assert!(matches!(
            store.deliver("abc_10x10", None).await,
            Err(StoreError::NotFound(_))
        ));

        store.cache().write("abc_10x10.png", &png(4, 4)).await.unwrap();
        let delivery = store.deliver("abc_10x10", None).await.unwrap();
        assert_eq!(delivery, Delivery::content(png(4, 4), "image/png"));
    }

    #[tokio::test]
    async fn test_warm_all_originals() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("images_a", png(4, 4), "image/png");
        backend.insert("images_b", png(4, 4), "image/png");
        backend.insert("images_b_10x10", png(4, 4), "image/jpeg");
        let (store, _dir) = store(&backend).await;
        store.cache().write("b.png", &png(4, 4)).await.unwrap();

        let report = store.warm(None).await.unwrap();
        assert_eq!(report.fetched, vec!["a".to_string()]);
        assert_eq!(report.skipped, vec!["b".to_string()]);
        assert!(report.failed.is_empty());
        assert!(store.cache().contains("a.png").await);
    }

    #[tokio::test]
    async fn test_manage_cache_prefetches_nominations() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("images_hot", png(4, 4), "image/png");
        let (store, _dir) = store(&backend).await;

        let mut log = AccessLog::new();
        log.record("hot", None);
        log.record("gone", None);

        let (managed, warmed) = store.manage_cache(&log, 1 << 20).await.unwrap();
        assert!(managed.evicted.is_empty());
        assert_eq!(warmed.fetched, vec!["hot".to_string()]);
        assert_eq!(warmed.failed.len(), 1);
        assert!(store.cache().contains("hot.png").await);
    }

    #[tokio::test]
    async fn test_manage_cache_prefetch_stays_within_budget() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert("images_big1", vec![7u8; 500], "application/octet-stream");
        backend.insert("images_big2", vec![7u8; 500], "application/octet-stream");
        let (store, _dir) = store(&backend).await;

        let mut log = AccessLog::new();
        log.record("big1", None);
        log.record("big2", None);

        let (managed, warmed) = store.manage_cache(&log, 100).await.unwrap();
        assert_eq!(warmed.fetched.len(), 2);
        assert!(managed.bytes_after <= 100);
        assert_eq!(managed.evicted.len(), 2);
        assert!(store.cache().stats().await.unwrap().total_size <= 100);
    }
}
