//! Error types for bioprovision.

use std::path::PathBuf;

use thiserror::Error;

/// Provisioning error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Model reference is empty or names an unsafe path component
    #[error("Invalid model reference: {0}")]
    InvalidReference(String),

    /// HTTP transfer or registry pull failed
    #[error("Download of '{reference}' failed: {reason}")]
    DownloadFailed { reference: String, reason: String },

    /// Staging produced zero or several payload candidates
    #[error("Expected exactly one payload in {}, found {}", .dir.display(), .candidates.len())]
    AmbiguousArchiveContents {
        dir: PathBuf,
        candidates: Vec<PathBuf>,
    },

    /// Directory creation, move or link at the target failed
    #[error("Publish to {} failed: {reason}", .target.display())]
    PublishFailed { target: PathBuf, reason: String },

    /// Version marker could not be written
    #[error("Recording version marker {} failed: {reason}", .marker.display())]
    RecordFailed { marker: PathBuf, reason: String },

    /// Checksum mismatch
    #[error("Integrity check failed: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    /// Archive extraction error
    #[error("Extraction error: {0}")]
    Extract(String),

    /// Failed to acquire a target lock
    #[error("Failed to acquire lock: {0}")]
    Lock(String),

    /// Invalid configuration or manifest
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn download(reference: &str, reason: impl std::fmt::Display) -> Self {
        Self::DownloadFailed {
            reference: reference.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn publish(target: &std::path::Path, reason: impl std::fmt::Display) -> Self {
        Self::PublishFailed {
            target: target.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, Error>;
