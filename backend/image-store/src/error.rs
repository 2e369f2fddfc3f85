/// Error types for image-store
///
/// Every public operation returns [`StoreError`]. Client mistakes (bad keys,
/// bad variant boxes) are separated from storage failures so callers can map
/// them to 4xx/5xx without inspecting messages.
use thiserror::Error;

/// Result type for image-store operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Caller-supplied key failed charset validation; rejected before any I/O
    #[error("Invalid store key: {0:?}")]
    InvalidKey(String),

    /// Requested thumbnail box is unusable (zero width or height)
    #[error("Invalid variant: {0}")]
    InvalidVariant(String),

    /// No original object exists for the key
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote object storage failure
    #[error("Remote storage error: {0}")]
    Remote(String),

    /// Source bytes could not be decoded, or the thumbnail could not be encoded
    #[error("Encode failure: {0}")]
    Encode(String),

    /// Configuration could not be turned into a store
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether the error was caused by the caller's input rather than storage
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidKey(_) | StoreError::InvalidVariant(_) | StoreError::NotFound(_)
        )
    }

    /// Filesystem and network failures; retrying is left to the caller
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Remote(_))
    }
}

impl From<image::ImageError> for StoreError {
    fn from(err: image::ImageError) -> Self {
        StoreError::Encode(err.to_string())
    }
}
