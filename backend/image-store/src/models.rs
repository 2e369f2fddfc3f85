/// Value types shared by the store variants and the facade
use crate::error::{Result, StoreError};
use bytes::Bytes;
use serde::Serialize;

/// Status used for signed-URL redirects
pub const TEMPORARY_REDIRECT: u16 = 307;

/// Largest accepted thumbnail box side
pub const MAX_DIMENSION: u32 = 4096;

/// One thumbnail rendering of an original: a box plus a fit mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct VariantSpec {
    pub width: u32,
    pub height: u32,
    /// Crop to fill the box exactly instead of bounding within it
    pub fit: bool,
}

impl VariantSpec {
    pub fn new(width: u32, height: u32, fit: bool) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(StoreError::InvalidVariant(format!(
                "box must be non-zero, got {width}x{height}"
            )));
        }
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(StoreError::InvalidVariant(format!(
                "box exceeds {MAX_DIMENSION}px, got {width}x{height}"
            )));
        }
        Ok(Self { width, height, fit })
    }

    /// Bound within the box, preserving aspect ratio
    pub fn bounded(width: u32, height: u32) -> Result<Self> {
        Self::new(width, height, false)
    }

    /// Crop to fill the box exactly
    pub fn cropped(width: u32, height: u32) -> Result<Self> {
        Self::new(width, height, true)
    }

    /// Storage identity of this variant of `key`: `key_WxH`
    ///
    /// Fit mode is not part of the identity.
    pub fn identity(&self, key: &str) -> String {
        format!("{}_{}x{}", key, self.width, self.height)
    }
}

/// Whether `candidate` is `key` itself or one of its `key_WxH` variants
pub fn is_identity_of(key: &str, candidate: &str) -> bool {
    match candidate.strip_prefix(key) {
        Some("") => true,
        Some(rest) => rest.strip_prefix('_').and_then(parse_box).is_some(),
        None => false,
    }
}

/// Split a storage identity into its key and, for derived variants, the box
pub fn parse_identity(identity: &str) -> (&str, Option<(u32, u32)>) {
    if let Some((key, suffix)) = identity.rsplit_once('_') {
        if let Some(dims) = parse_box(suffix) {
            if !key.is_empty() {
                return (key, Some(dims));
            }
        }
    }
    (identity, None)
}

fn parse_box(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once('x')?;
    let digits = |v: &str| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit());
    if !digits(w) || !digits(h) {
        return None;
    }
    Some((w.parse().ok()?, h.parse().ok()?))
}

/// What `deliver` hands back to the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Bytes served directly from local disk
    Content { data: Bytes, content_type: String },
    /// Time-limited signed URL the caller should redirect to
    Redirect { url: String, status: u16 },
}

impl Delivery {
    pub fn content(data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Delivery::Content {
            data: data.into(),
            content_type: content_type.into(),
        }
    }

    pub fn redirect(url: impl Into<String>) -> Self {
        Delivery::Redirect {
            url: url.into(),
            status: TEMPORARY_REDIRECT,
        }
    }

    pub fn data(&self) -> Option<&Bytes> {
        match self {
            Delivery::Content { data, .. } => Some(data),
            Delivery::Redirect { .. } => None,
        }
    }
}

/// Result of removing one storage identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum DeleteStatus {
    Deleted,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub identity: String,
    pub status: DeleteStatus,
}

/// Per-identity outcomes of deleting a key and all its derived variants
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub outcomes: Vec<DeleteOutcome>,
}

impl DeleteReport {
    pub fn push(&mut self, identity: impl Into<String>, result: Result<()>) {
        let status = match result {
            Ok(()) => DeleteStatus::Deleted,
            Err(e) => DeleteStatus::Failed(e.to_string()),
        };
        self.outcomes.push(DeleteOutcome {
            identity: identity.into(),
            status,
        });
    }

    /// True when every identity was removed
    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeleteOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, DeleteStatus::Failed(_)))
    }

    pub fn deleted(&self) -> usize {
        self.outcomes.len() - self.failures().count()
    }
}
