//! Error types for the storage module.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while persisting artifacts.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend-hosted output is past its expiry.
    #[error("artifact {location} expired at {expired_at}")]
    Expired {
        location: String,
        expired_at: DateTime<Utc>,
    },

    #[error("artifact source not found: {path}")]
    SourceNotFound { path: PathBuf },

    #[error("failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("i/o error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported artifact location: {0}")]
    UnsupportedLocation(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}
