//! Error types for replay-dl
//!
//! This module provides the error taxonomy of the pipeline:
//! - Component errors (fetch, extraction, download, state, retention, lock)
//! - A crate-level [`Error`] wrapping them for propagation with `?`
//! - Exit code mapping for the command line surface

use std::path::PathBuf;
use thiserror::Error;

use crate::types::FailureKind;

/// Result type alias for replay-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for replay-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "target_url")
        key: Option<String>,
    },

    /// Listing page could not be fetched
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Link extraction could not be set up
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// A single download failed terminally
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Persisted state could not be read or written
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Retention sweep failure
    #[error("retention error: {0}")]
    Retention(#[from] RetentionError),

    /// Cycle lock could not be acquired
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// External tool execution failed (yt-dlp missing, probe failed, etc.)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Process exit code for this error
    ///
    /// - `1` fatal cycle abort or failed check
    /// - `2` configuration error
    /// - `3` another live process holds the cycle lock
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config { .. } => 2,
            Error::Lock(LockError::AlreadyHeld { .. }) => 3,
            _ => 1,
        }
    }
}

/// Errors fetching the listing page
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, DNS or HTTP status failure
    #[error("network error fetching {url}: {message}")]
    Network {
        /// The URL being fetched
        url: String,
        /// Underlying failure description
        message: String,
    },

    /// TLS handshake or certificate failure
    #[error("SSL error fetching {url}: {message}")]
    Ssl {
        /// The URL being fetched
        url: String,
        /// Underlying failure description
        message: String,
    },

    /// Request exceeded the configured timeout
    #[error("timed out after {timeout_secs}s fetching {url}")]
    Timeout {
        /// The URL being fetched
        url: String,
        /// The timeout that elapsed
        timeout_secs: u64,
    },
}

/// Errors preparing link extraction
///
/// Malformed page content never produces this error; it only yields fewer
/// candidates.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// A CSS selector failed to compile
    #[error("invalid selector {selector}: {reason}")]
    InvalidSelector {
        /// The selector source text
        selector: String,
        /// Parser message
        reason: String,
    },

    /// A URL pattern failed to compile
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Failure of a single download
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// Transient transfer failure
    #[error("network failure: {0}")]
    Network(String),

    /// Transfer exceeded the wall-clock limit
    #[error("transfer exceeded {limit_secs}s")]
    Timeout {
        /// Limit that was exceeded, in seconds
        limit_secs: u64,
    },

    /// Transfer grew past the size ceiling
    #[error("transfer exceeded size limit of {limit} bytes (observed {observed} bytes)")]
    SizeExceeded {
        /// Configured ceiling in bytes
        limit: u64,
        /// Bytes observed when the transfer was aborted
        observed: u64,
    },

    /// The host or requested format cannot be served
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Shutdown requested while the transfer was running
    #[error("transfer cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Classification used in outcomes and state records
    pub fn kind(&self) -> FailureKind {
        match self {
            DownloadError::Network(_) => FailureKind::Network,
            DownloadError::Timeout { .. } => FailureKind::Timeout,
            DownloadError::SizeExceeded { .. } => FailureKind::SizeExceeded,
            DownloadError::UnsupportedFormat(_) => FailureKind::UnsupportedFormat,
            DownloadError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Persisted state errors
#[derive(Debug, Error)]
pub enum StateError {
    /// State file exists but cannot be parsed
    #[error("state file {path} is corrupt: {reason}")]
    Corrupt {
        /// The corrupt file
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// State file could not be written durably
    #[error("failed to write state file {path}: {source}")]
    WriteFailure {
        /// The file being replaced
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// State file exists but cannot be read
    #[error("failed to read state file {path}: {source}")]
    ReadFailure {
        /// The file being loaded
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A record would break a store invariant
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Retention sweep errors
#[derive(Debug, Error)]
pub enum RetentionError {
    /// Expired file was already gone (tolerated)
    #[error("file {path} already missing")]
    FileMissing {
        /// The missing file
        path: PathBuf,
    },

    /// Expired file could not be deleted
    #[error("permission denied deleting {path}")]
    PermissionDenied {
        /// The file that could not be deleted
        path: PathBuf,
    },

    /// Any other deletion failure
    #[error("failed to delete {path}: {source}")]
    Io {
        /// The file that could not be deleted
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },
}

impl RetentionError {
    /// Classify a failed removal of `path`
    pub fn from_io(path: PathBuf, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => RetentionError::FileMissing { path },
            std::io::ErrorKind::PermissionDenied => RetentionError::PermissionDenied { path },
            _ => RetentionError::Io { path, source },
        }
    }
}

/// Cycle lock errors
#[derive(Debug, Error)]
pub enum LockError {
    /// Another live process holds the lock
    #[error("cycle lock {path} is held by process {pid}")]
    AlreadyHeld {
        /// The lock file
        path: PathBuf,
        /// PID recorded in the lock file
        pid: u32,
    },

    /// Lock file could not be created or inspected
    #[error("lock file {path}: {source}")]
    Io {
        /// The lock file
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },
}
