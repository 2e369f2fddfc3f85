//! Image blob storage with lazily generated thumbnails
//!
//! Originals are stored under generated keys on local disk or in S3;
//! size-constrained variants are rendered on first request and kept next to
//! the original. The S3 variant keeps a local disk cache in front of the
//! bucket.
//!
//! # Example
//!
//! ```no_run
//! use image_store::{Store, StoreConfig, VariantSpec};
//!
//! # async fn run() -> image_store::Result<()> {
//! let store = Store::from_config(&StoreConfig::from_env()?).await?;
//! let key = store.save(&b"..."[..], "image/png").await?;
//! let thumb = store.deliver(&key, Some(VariantSpec::cropped(100, 100)?)).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod logging;
pub mod media;
pub mod models;
pub mod services;
pub mod store;
pub mod thumbnail;

pub use backend::{MemoryBackend, ObjectBackend, ObjectHeaders, S3Backend};
pub use cache::{AccessLog, EvictionPolicy, FileCache, LruPolicy, ManageReport, OpenMode};
pub use config::{BackendKind, StoreConfig};
pub use error::{Result, StoreError};
pub use key::{validate_key, KeyGenerator, KeyStrategy};
pub use models::{DeleteReport, DeleteStatus, Delivery, VariantSpec};
pub use services::{BlobStore, LocalFilesystemStore, RemoteObjectStore, WarmReport};
pub use store::Store;
pub use thumbnail::{Thumbnail, ThumbnailEngine};
