//! Error types for scrape-toolkit
//!
//! This module provides the error taxonomy for the library:
//! - [`Error`] - crate-wide error for construction and run-level failures
//! - [`TransferError`] - the outcome of a single failed transfer attempt
//! - [`PipelineError`] - run-level faults surfaced by the orchestrator

use crate::types::FailureKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for scrape-toolkit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for scrape-toolkit
///
/// Expected transfer failures never surface through this type; they are reported
/// in a failed [`DownloadResult`](crate::types::DownloadResult) instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "retry.max_attempts")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error raised while building or using the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Run-level pipeline failure
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Invalid path handed to the storage layer
    #[error("invalid path {}: {reason}", .path.display())]
    InvalidPath {
        /// The offending path
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Failure of a single transfer attempt
///
/// Strategies return this from [`DownloadStrategy::attempt`](crate::download::DownloadStrategy::attempt).
/// The downloader classifies it through [`TransferError::kind`] and decides whether to retry.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The request or body read exceeded the configured timeout
    #[error("transfer timed out")]
    Timeout,

    /// Connection-level failure (refused, reset, DNS, broken body stream)
    #[error("network failure: {0}")]
    Network(String),

    /// Server answered with a non-2xx status
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Body length differs from the declared Content-Length
    #[error("content length mismatch: expected {expected} bytes, received {actual}")]
    ContentLengthMismatch {
        /// Declared length
        expected: u64,
        /// Bytes actually received
        actual: u64,
    },

    /// Not enough free space on the destination filesystem
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the transfer
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Local filesystem failure while writing the staged file
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The source locator cannot be handled by this strategy
    #[error("invalid source locator: {0}")]
    InvalidSource(String),

    /// The download was cancelled between attempts
    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Closed classification of this failure, as recorded in a download result
    pub fn kind(&self) -> FailureKind {
        match self {
            TransferError::Timeout => FailureKind::Timeout,
            TransferError::Network(_) => FailureKind::Network,
            TransferError::Status(code) => FailureKind::Status(*code),
            TransferError::ContentLengthMismatch { .. } => FailureKind::ContentLengthMismatch,
            TransferError::InsufficientSpace { .. } => FailureKind::InsufficientSpace,
            TransferError::Io(_) => FailureKind::Io,
            TransferError::InvalidSource(_) => FailureKind::InvalidSource,
            TransferError::Cancelled => FailureKind::Cancelled,
        }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransferError::Timeout
        } else if let Some(status) = e.status() {
            TransferError::Status(status.as_u16())
        } else {
            TransferError::Network(e.to_string())
        }
    }
}

/// Run-level pipeline faults
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// A stage signalled an unrecoverable condition
    #[error("pipeline aborted by stage {stage}: {reason}")]
    Aborted {
        /// Name of the stage that aborted the run
        stage: String,
        /// Reason given by the stage
        reason: String,
    },

    /// The run was cancelled from outside
    #[error("pipeline cancelled")]
    Cancelled,

    /// A stage failed to initialize; no item was processed
    #[error("stage {stage} failed to initialize: {reason}")]
    InitializationFailed {
        /// Name of the stage that failed
        stage: String,
        /// Reason given by the stage
        reason: String,
    },
}
