//! Local disk cache fronting the remote store
//!
//! The directory listing is the index: an entry exists iff its file exists.
//! `contains` is best-effort, a concurrent writer may change the answer
//! before the following `open`.

pub mod policy;

pub use policy::{AccessLog, AccessStats, EvictionPlan, EvictionPolicy, LruPolicy};

use crate::error::{Result, StoreError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tracing::{debug, info, warn};

/// How `FileCache::open` opens an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create or truncate
    Write,
    /// Create if missing, keep existing content
    ReadWrite,
}

/// One cached file
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    /// File name, e.g. `abc.jpg` or `abc_100x100.jpg`
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

impl CacheEntry {
    /// Storage identity: the file name without extension
    pub fn identity(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
}

/// What a `manage` pass did
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManageReport {
    pub evicted: Vec<String>,
    /// Identities the policy wants fetched into the cache
    pub prefetch: Vec<String>,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// File-per-entry cache rooted at one directory
#[derive(Clone)]
pub struct FileCache {
    cache_dir: PathBuf,
    policy: Arc<dyn EvictionPolicy>,
}

impl std::fmt::Debug for FileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCache")
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl FileCache {
    /// Cache with the default LRU eviction policy
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            policy: Arc::new(LruPolicy::default()),
        }
    }

    /// Replace the eviction policy used by `manage`
    pub fn with_policy(mut self, policy: Arc<dyn EvictionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Ensure the cache directory exists
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir).await?;
        info!(cache_dir = ?self.cache_dir, "File cache initialized");
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Local path an entry lives at (whether or not it exists)
    pub fn path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(key)
    }

    fn checked_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.path(key))
    }

    /// Whether the entry's file exists right now
    pub async fn contains(&self, key: &str) -> bool {
        let Ok(path) = self.checked_path(key) else {
            return false;
        };
        match fs::metadata(&path).await {
            Ok(meta) => meta.is_file(),
            Err(_) => false,
        }
    }

    /// Open an entry; the handle closes when dropped
    pub async fn open(&self, key: &str, mode: OpenMode) -> Result<File> {
        let path = self.checked_path(key)?;
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true).create(true).truncate(true),
            OpenMode::ReadWrite => options.read(true).write(true).create(true),
        };
        options.open(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(key.to_string()),
            _ => StoreError::Io(e),
        })
    }

    /// Entry content, or `None` on a miss
    pub async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.checked_path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace an entry; readers never observe a partial file
    pub async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.checked_path(key)?;
        write_atomic(&path, data).await?;
        debug!(key = %key, size = data.len(), "Cached file written");
        Ok(())
    }

    /// Remove an entry; returns whether it existed
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let path = self.checked_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Scan the directory; in-flight temporary files are skipped
    pub async fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.cache_dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let meta = match item.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                // removed between listing and stat
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            entries.push(CacheEntry {
                name,
                size: meta.len(),
                modified,
            });
        }
        Ok(entries)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let entries = self.entries().await?;
        Ok(CacheStats {
            entries: entries.len(),
            total_size: entries.iter().map(|e| e.size).sum(),
        })
    }

    /// Evict with the configured policy until the cache fits `max_size` bytes
    ///
    /// Meant to run out-of-band (cron, operator binary). Prefetch nominations
    /// are returned, not fetched; the cache has no origin to fetch from.
    pub async fn manage(&self, access_log: &AccessLog, max_size: u64) -> Result<ManageReport> {
        let entries = self.entries().await?;
        let bytes_before: u64 = entries.iter().map(|e| e.size).sum();
        let plan = self.policy.plan(&entries, access_log, max_size);

        let mut bytes_after = bytes_before;
        let mut evicted = Vec::with_capacity(plan.evict.len());
        for name in plan.evict {
            let size = entries
                .iter()
                .find(|e| e.name == name)
                .map(|e| e.size)
                .unwrap_or(0);
            match self.remove(&name).await {
                Ok(_) => {
                    bytes_after = bytes_after.saturating_sub(size);
                    evicted.push(name);
                }
                Err(e) => warn!(entry = %name, error = %e, "Failed to evict cache entry"),
            }
        }

        let report = ManageReport {
            evicted,
            prefetch: plan.prefetch,
            bytes_before,
            bytes_after,
        };
        info!(
            evicted = report.evicted.len(),
            prefetch = report.prefetch.len(),
            bytes_before,
            bytes_after,
            max_size,
            "Cache maintenance finished"
        );
        Ok(report)
    }
}

/// Write through a sibling temp file and rename into place
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{:08x}.tmp", file_name, rand::random::<u32>()));

    if let Err(e) = fs::write(&tmp, data).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn cache_in(dir: &Path) -> FileCache {
        let cache = FileCache::new(dir.join("cache"));
        cache.init().await.unwrap();
        cache
    }

    #[tokio::test]
    async fn test_write_read_contains() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path()).await;

        assert!(!cache.contains("abc.jpg").await);
        assert_eq!(cache.read("abc.jpg").await.unwrap(), None);

        cache.write("abc.jpg", b"hello").await.unwrap();
        assert!(cache.contains("abc.jpg").await);
        assert_eq!(cache.read("abc.jpg").await.unwrap().unwrap(), &b"hello"[..]);
        assert_eq!(cache.path("abc.jpg"), dir.path().join("cache/abc.jpg"));
    }

    #[tokio::test]
    async fn test_contains_reflects_external_removal() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path()).await;

        cache.write("abc.png", b"x").await.unwrap();
        std::fs::remove_file(cache.path("abc.png")).unwrap();
        assert!(!cache.contains("abc.png").await);
    }

    #[tokio::test]
    async fn test_open_modes() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path()).await;

        assert!(matches!(
            cache.open("missing.jpg", OpenMode::Read).await,
            Err(StoreError::NotFound(_))
        ));

        {
            let mut file = cache.open("k.jpg", OpenMode::Write).await.unwrap();
            file.write_all(b"0123456789").await.unwrap();
            file.flush().await.unwrap();
        }
        {
            let mut file = cache.open("k.jpg", OpenMode::Write).await.unwrap();
            file.write_all(b"ab").await.unwrap();
            file.flush().await.unwrap();
        }

        let mut content = String::new();
        cache
            .open("k.jpg", OpenMode::Read)
            .await
            .unwrap()
            .read_to_string(&mut content)
            .await
            .unwrap();
        assert_eq!(content, "ab");
    }

    #[tokio::test]
    async fn test_rejects_path_escapes() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path()).await;

        for key in ["../escape", "a/b", ".hidden", ""] {
            assert!(matches!(
                cache.write(key, b"x").await,
                Err(StoreError::InvalidKey(_))
            ));
            assert!(!cache.contains(key).await);
        }
    }

    #[tokio::test]
    async fn test_remove_and_stats() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path()).await;

        cache.write("a.jpg", b"1234").await.unwrap();
        cache.write("b_10x10.jpg", b"123456").await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.total_size, 10);

        assert!(cache.remove("a.jpg").await.unwrap());
        assert!(!cache.remove("a.jpg").await.unwrap());
        assert_eq!(cache.stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_entry_identity() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path()).await;
        cache.write("abc_100x100.jpg", b"x").await.unwrap();

        let entries = cache.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].identity(), "abc_100x100");
    }

    #[tokio::test]
    async fn test_manage_evicts_least_requested_within_budget() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path()).await;

        cache.write("hot.jpg", &[0u8; 10]).await.unwrap();
        cache.write("warm.jpg", &[0u8; 10]).await.unwrap();
        cache.write("cold.jpg", &[0u8; 10]).await.unwrap();

        let mut log = AccessLog::new();
        for _ in 0..5 {
            log.record("hot", None);
        }
        log.record("warm", None);

        let report = cache.manage(&log, 20).await.unwrap();
        assert_eq!(report.evicted, vec!["cold.jpg".to_string()]);
        assert_eq!(report.bytes_before, 30);
        assert_eq!(report.bytes_after, 20);
        assert!(cache.contains("hot.jpg").await);
        assert!(!cache.contains("cold.jpg").await);
        assert!(cache.stats().await.unwrap().total_size <= 20);
    }

    #[tokio::test]
    async fn test_manage_with_injected_policy() {
        #[derive(Debug)]
        struct EvictAll;
        impl EvictionPolicy for EvictAll {
            fn plan(&self, entries: &[CacheEntry], _: &AccessLog, _: u64) -> EvictionPlan {
                EvictionPlan {
                    evict: entries.iter().map(|e| e.name.clone()).collect(),
                    prefetch: vec!["wanted".to_string()],
                }
            }
        }

        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path()).await.with_policy(Arc::new(EvictAll));
        cache.write("a.jpg", b"1").await.unwrap();

        let report = cache.manage(&AccessLog::new(), u64::MAX).await.unwrap();
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(report.prefetch, vec!["wanted".to_string()]);
        assert_eq!(cache.stats().await.unwrap().entries, 0);
    }
}
