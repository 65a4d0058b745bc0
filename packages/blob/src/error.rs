//! Error types for blob storage and retrieval.

use std::path::PathBuf;

use thiserror::Error;

use crate::registry::BlobId;

/// Errors that can occur when creating, reading or resolving blobs.
#[derive(Debug, Error)]
pub enum Error {
    /// No handle with this id was ever issued by the registry.
    #[error("blob not found: {0}")]
    NotFound(BlobId),

    /// The handle exists but its retention window has passed.
    #[error("blob handle expired: {0}")]
    Expired(BlobId),

    /// The handle is still valid but the blob it pointed at has been dropped.
    #[error("blob is gone: {0}")]
    Gone(BlobId),

    /// A file-backed blob was created for a path that does not exist.
    #[error("tried to return a file that doesn't exist: {}", .0.display())]
    MissingFile(PathBuf),

    /// A blob href could not be parsed back into a handle id.
    #[error("could not find blob id in href: {0}")]
    InvalidHref(String),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Result type alias for blob operations.
pub type Result<T> = std::result::Result<T, Error>;
