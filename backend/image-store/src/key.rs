//! Store key generation and validation
//!
//! Keys end up verbatim in file names and remote object names, so anything
//! outside `[A-Za-z0-9_-]` is rejected before it can reach a path.

use crate::error::{Result, StoreError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// How new keys are minted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    /// Coarse timestamp + pid + 16 random bits, base64url without padding (11 chars).
    /// Collision resistance is weak at high upload rates.
    #[default]
    Packed,
    /// Random UUID v4 in simple (hex) form
    Uuid,
}

impl FromStr for KeyStrategy {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "packed" => Ok(KeyStrategy::Packed),
            "uuid" => Ok(KeyStrategy::Uuid),
            other => Err(StoreError::Config(format!("Unknown key strategy: {other}"))),
        }
    }
}

/// Produces opaque store keys
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyGenerator {
    strategy: KeyStrategy,
}

impl KeyGenerator {
    pub fn new(strategy: KeyStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> KeyStrategy {
        self.strategy
    }

    /// Mint a new key. The result always passes [`validate_key`].
    pub fn generate(&self) -> String {
        match self.strategy {
            KeyStrategy::Packed => packed_key(),
            KeyStrategy::Uuid => uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Key for grouping a batch of uploads: `YYYYMMDD_<key>`
    pub fn upload_group(&self) -> String {
        format!("{}_{}", chrono::Utc::now().format("%Y%m%d"), self.generate())
    }
}

fn packed_key() -> String {
    // f32 seconds, ~2 minute resolution at current epoch values
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default() as f32;
    let pid = (std::process::id() % 65536) as u16;
    let salt: u16 = rand::random();

    let mut packed = [0u8; 8];
    packed[..4].copy_from_slice(&secs.to_le_bytes());
    packed[4..6].copy_from_slice(&pid.to_le_bytes());
    packed[6..].copy_from_slice(&salt.to_le_bytes());

    URL_SAFE_NO_PAD.encode(packed)
}

/// Check a caller-supplied key against the `[A-Za-z0-9_-]+` charset
pub fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
