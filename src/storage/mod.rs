mod local;

pub use local::*;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::{AppError, msg};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("invalid or expired signature")]
    InvalidSignature,

    #[error("operation not supported by this store")]
    Unsupported,

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(_) | StorageError::Unsupported => {
                AppError::NotFound(msg::REPORT_FILE_MISSING.into())
            }
            StorageError::InvalidSignature => AppError::Forbidden(msg::INVALID_LINK.into()),
            StorageError::InvalidKey(key) => AppError::BadRequest(format!("invalid key: {}", key)),
            StorageError::Io(e) => AppError::Internal(format!("storage I/O error: {}", e)),
        }
    }
}

/// Blob store holding rendered reports.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether a blob exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Mint a time-boxed, tamper-evident URL granting read access to `key`.
    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<String, StorageError>;

    /// Read a blob through a link this store signed.
    ///
    /// Stores whose links point at an external host never serve blobs
    /// themselves.
    async fn read_signed(
        &self,
        _key: &str,
        _expires: i64,
        _signature: &str,
    ) -> Result<Vec<u8>, StorageError> {
        Err(StorageError::Unsupported)
    }
}
