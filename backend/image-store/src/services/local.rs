//! Local filesystem store
//!
//! Originals live at `root/<key>`, derived variants at `root/<key>_<W>x<H>`.

use super::{BlobStore, Coalescer};
use crate::cache::write_atomic;
use crate::error::{Result, StoreError};
use crate::key::{validate_key, KeyGenerator};
use crate::media::sniff_content_type;
use crate::models::{is_identity_of, DeleteReport, Delivery, VariantSpec};
use crate::thumbnail::ThumbnailEngine;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct LocalFilesystemStore {
    root: PathBuf,
    keys: KeyGenerator,
    engine: ThumbnailEngine,
    coalescer: Coalescer,
}

impl LocalFilesystemStore {
    /// Create the store, making sure `root` exists
    pub async fn new(
        root: impl Into<PathBuf>,
        keys: KeyGenerator,
        engine: ThumbnailEngine,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        info!(root = ?root, "Local filesystem store initialized");
        Ok(Self {
            root,
            keys,
            engine,
            coalescer: Coalescer::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read(&self, identity: &str) -> Result<Option<Bytes>> {
        match fs::read(self.root.join(identity)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_original(&self, key: &str) -> Result<Bytes> {
        self.read(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn generate(&self, key: &str, spec: &VariantSpec) -> Result<Bytes> {
        let identity = spec.identity(key);
        let _flight = self.coalescer.acquire(&identity).await;

        // another request may have generated it while we waited
        if let Some(data) = self.read(&identity).await? {
            return Ok(data);
        }

        let original = self.read_original(key).await?;
        let thumb = self.engine.render_async(original, *spec).await?;
        write_atomic(&self.root.join(&identity), &thumb.data).await?;

        info!(
            identity = %identity,
            width = thumb.width,
            height = thumb.height,
            size = thumb.data.len(),
            "Derived variant created"
        );
        Ok(thumb.data)
    }
}

#[async_trait]
impl BlobStore for LocalFilesystemStore {
    async fn save(&self, data: Bytes, mimetype: &str) -> Result<String> {
        let key = self.keys.generate();
        validate_key(&key)?;

        write_atomic(&self.root.join(&key), &data).await?;
        info!(key = %key, mimetype = %mimetype, size = data.len(), "Object saved");
        Ok(key)
    }

    async fn deliver(&self, key: &str, spec: Option<&VariantSpec>) -> Result<Delivery> {
        validate_key(key)?;

        let data = match spec {
            None => self.read_original(key).await?,
            Some(spec) => match self.read(&spec.identity(key)).await? {
                Some(data) => data,
                None => {
                    debug!(key = %key, width = spec.width, height = spec.height, "Derived variant miss");
                    self.generate(key, spec).await?
                }
            },
        };

        let content_type = sniff_content_type(&data);
        Ok(Delivery::content(data, content_type))
    }

    async fn delete(&self, key: &str) -> Result<DeleteReport> {
        validate_key(key)?;

        let mut variants = Vec::new();
        let mut has_original = false;
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == key {
                has_original = true;
            } else if is_identity_of(key, &name) {
                variants.push(name);
            }
        }
        if !has_original && variants.is_empty() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        variants.sort();

        // variants go first; the original stays while any of them remain so
        // a retry can still find the key
        let mut report = DeleteReport::default();
        for identity in variants {
            let result = fs::remove_file(self.root.join(&identity))
                .await
                .map_err(StoreError::from);
            if let Err(e) = &result {
                warn!(identity = %identity, error = %e, "Failed to delete file");
            }
            report.push(identity, result);
        }

        if has_original {
            let result = if report.is_complete() {
                fs::remove_file(self.root.join(key))
                    .await
                    .map_err(StoreError::from)
            } else {
                Err(StoreError::Io(std::io::Error::other(
                    "kept while derived variants remain",
                )))
            };
            if let Err(e) = &result {
                warn!(identity = %key, error = %e, "Failed to delete file");
            }
            report.push(key, result);
        }

        info!(
            key = %key,
            deleted = report.deleted(),
            failed = report.failures().count(),
            "Object deleted"
        );
        Ok(report)
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}
