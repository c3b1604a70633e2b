//! Video transfer engines
//!
//! The download engine drives retries, timeouts and size enforcement against
//! the [`TransferEngine`] trait. [`YtDlpEngine`] is the subprocess-backed
//! implementation; tests substitute their own.

mod parser;
mod ytdlp;

pub use parser::classify_failure;
pub use ytdlp::YtDlpEngine;

use crate::error::DownloadError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One transfer of a single video to a file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    /// Video page or embed URL
    pub url: String,
    /// Final output file; partial artifacts live next to it
    pub output_path: PathBuf,
    /// Format selector for the host
    pub format: String,
    /// Host-specific extra arguments
    pub extra_args: Vec<String>,
    /// Wall-clock limit for this attempt
    pub timeout: Duration,
    /// Size ceiling in bytes
    pub max_bytes: u64,
}

/// What a successful transfer produced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferReport {
    /// Size of the output file after the transfer
    pub bytes_written: u64,
}

/// Trait for video transfer implementations
///
/// Implementations continue from partial artifacts next to
/// `output_path` when present, must stop and clean up their child work when
/// `cancel` fires, and must abort once more than `max_bytes` have been
/// transferred.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Transfer `request.url` to `request.output_path`
    async fn transfer(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, DownloadError>;

    /// Check the engine is usable, returning its version string
    async fn probe(&self) -> crate::Result<String>;

    /// Get the name of this engine (for logging)
    fn name(&self) -> &'static str;
}
