/// Configuration for image-store
///
/// Loads configuration from environment variables with sensible defaults.
/// Library callers can also build a `StoreConfig` directly.
use crate::error::{Result, StoreError};
use crate::key::KeyStrategy;
use crate::thumbnail::DEFAULT_QUALITY;
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_CACHE_DIR: &str = "/tmp/image-store/cache";
const DEFAULT_CACHE_MAX_SIZE: u64 = 1024 * 1024 * 1024;
const DEFAULT_KEY_PREFIX: &str = "images_";
const DEFAULT_PRESIGNED_URL_EXPIRATION_SECS: u64 = 3600;

/// Which store variant to build
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Local,
    RemoteCached,
}

impl FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "remote-cached" | "remote_cached" | "s3" => Ok(BackendKind::RemoteCached),
            other => Err(StoreError::Config(format!("Unknown store backend: {other}"))),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: BackendKind,
    pub local: LocalConfig,
    #[serde(default)]
    pub s3: Option<S3Config>,
    pub cache: CacheConfig,
    /// JPEG quality for derived variants
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default)]
    pub key_strategy: KeyStrategy,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LocalConfig {
    pub root: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Base URL of S3-compatible storage; AWS when unset
    pub endpoint: Option<String>,
    /// Prepended to every object name
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_presigned_url_expiration_secs")]
    pub presigned_url_expiration_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CacheConfig {
    pub dir: PathBuf,
    /// Byte budget enforced by cache maintenance
    #[serde(default = "default_cache_max_size")]
    pub max_size: u64,
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_presigned_url_expiration_secs() -> u64 {
    DEFAULT_PRESIGNED_URL_EXPIRATION_SECS
}

fn default_cache_max_size() -> u64 {
    DEFAULT_CACHE_MAX_SIZE
}

impl StoreConfig {
    /// Local filesystem store rooted at `root`
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Local,
            local: LocalConfig { root: root.into() },
            s3: None,
            cache: CacheConfig {
                dir: PathBuf::from(DEFAULT_CACHE_DIR),
                max_size: DEFAULT_CACHE_MAX_SIZE,
            },
            quality: DEFAULT_QUALITY,
            key_strategy: KeyStrategy::default(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`; unparseable values fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = match lookup("STORE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => BackendKind::default(),
        };

        let s3 = match backend {
            BackendKind::Local => None,
            BackendKind::RemoteCached => Some(S3Config {
                bucket: lookup("S3_BUCKET")
                    .filter(|b| !b.trim().is_empty())
                    .ok_or_else(|| {
                        StoreError::Config("S3_BUCKET is required for remote-cached".to_string())
                    })?,
                region: lookup("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                access_key_id: lookup("AWS_ACCESS_KEY_ID"),
                secret_access_key: lookup("AWS_SECRET_ACCESS_KEY"),
                endpoint: lookup("S3_ENDPOINT"),
                key_prefix: lookup("S3_KEY_PREFIX").unwrap_or_else(default_key_prefix),
                presigned_url_expiration_secs: lookup("S3_PRESIGNED_URL_EXPIRATION")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_PRESIGNED_URL_EXPIRATION_SECS),
            }),
        };

        Ok(StoreConfig {
            backend,
            local: LocalConfig {
                root: lookup("STORE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./files")),
            },
            s3,
            cache: CacheConfig {
                dir: lookup("CACHE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
                max_size: lookup("CACHE_MAX_SIZE")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_CACHE_MAX_SIZE),
            },
            quality: lookup("THUMBNAIL_QUALITY")
                .and_then(|v| v.parse::<u8>().ok())
                .filter(|q| (1..=100).contains(q))
                .unwrap_or(DEFAULT_QUALITY),
            key_strategy: lookup("KEY_STRATEGY")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
        })
    }

    /// S3 settings, required by the remote-cached backend
    pub fn s3(&self) -> Result<&S3Config> {
        self.s3
            .as_ref()
            .ok_or_else(|| StoreError::Config("remote-cached backend needs S3 settings".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.backend, BackendKind::Local);
        assert!(config.s3.is_none());
        assert_eq!(config.cache.dir, PathBuf::from(DEFAULT_CACHE_DIR));
        assert_eq!(config.cache.max_size, DEFAULT_CACHE_MAX_SIZE);
        assert_eq!(config.quality, 75);
        assert_eq!(config.key_strategy, KeyStrategy::Packed);
    }

    #[test]
    fn test_remote_cached() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("STORE_BACKEND", "remote-cached"),
            ("S3_BUCKET", "pictures"),
            ("S3_ENDPOINT", "http://localhost:9000"),
            ("S3_PRESIGNED_URL_EXPIRATION", "600"),
            ("CACHE_MAX_SIZE", "1000"),
            ("KEY_STRATEGY", "uuid"),
        ]))
        .unwrap();

        let s3 = config.s3().unwrap();
        assert_eq!(config.backend, BackendKind::RemoteCached);
        assert_eq!(s3.bucket, "pictures");
        assert_eq!(s3.key_prefix, "images_");
        assert_eq!(s3.presigned_url_expiration_secs, 600);
        assert_eq!(s3.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.cache.max_size, 1000);
        assert_eq!(config.key_strategy, KeyStrategy::Uuid);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("THUMBNAIL_QUALITY", "250"),
            ("CACHE_MAX_SIZE", "lots"),
            ("KEY_STRATEGY", "ulid"),
        ]))
        .unwrap();
        assert_eq!(config.quality, DEFAULT_QUALITY);
        assert_eq!(config.cache.max_size, DEFAULT_CACHE_MAX_SIZE);
        assert_eq!(config.key_strategy, KeyStrategy::Packed);
    }

    #[test]
    fn test_remote_cached_requires_bucket() {
        let result = StoreConfig::from_lookup(lookup(&[("STORE_BACKEND", "remote-cached")]));
        assert!(matches!(result, Err(StoreError::Config(_))));

        let result = StoreConfig::from_lookup(lookup(&[
            ("STORE_BACKEND", "remote-cached"),
            ("S3_BUCKET", "  "),
        ]));
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn test_unknown_backend_is_error() {
        let result = StoreConfig::from_lookup(lookup(&[("STORE_BACKEND", "ftp")]));
        assert!(matches!(result, Err(StoreError::Config(_))));
        assert!(StoreConfig::local("/tmp/x").s3().is_err());
    }
}
