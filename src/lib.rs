//! # replay-dl
//!
//! One-shot discovery, download and retention pipeline for sports replay
//! videos posted on a listing page.
//!
//! Each invocation runs one cycle: fetch the page, extract candidate links
//! matching the configured keywords and video hosts, download the ones never
//! seen before, and retire downloads older than the retention window.
//! Scheduling is left to an external trigger such as cron or a systemd timer.
//!
//! ## Guarantees
//!
//! - **No duplicate downloads** - a URL is recorded as known before its
//!   download starts and is never attempted again
//! - **No data loss on crash** - state files are replaced atomically
//! - **Bounded resources** - every transfer has a wall-clock limit and a size
//!   ceiling, and downloads run one at a time
//!
//! ## Quick Start
//!
//! ```no_run
//! use replay_dl::{Config, HttpFetcher, Orchestrator, YtDlpEngine};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
//!     let engine = Arc::new(YtDlpEngine::from_config(&config.transfer)?);
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(replay_dl::cancel_on_signal(cancel.clone()));
//!
//!     let report = Orchestrator::new(config, fetcher, engine, cancel).run().await?;
//!     println!("{}", serde_json::to_string_pretty(&report)?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Bounded-retry download engine
pub mod downloader;
/// Error types
pub mod error;
/// Candidate link extraction
pub mod extractor;
/// Listing page retrieval
pub mod fetch;
/// Single-cycle advisory lock
pub mod lock;
/// Cycle orchestration
pub mod orchestrator;
/// Age-based file retention
pub mod retention;
/// Retry logic with exponential backoff
pub mod retry;
/// Durable known-link and download state
pub mod state;
/// Video transfer engines
pub mod transfer;
/// Core types and reports
pub mod types;
/// Utility functions
pub mod utils;
/// Setup checks and test downloads
pub mod validate;

// Re-export commonly used types
pub use config::{Config, HostPattern};
pub use downloader::{DownloadEngine, FormatPolicy};
pub use error::{
    DownloadError, Error, ExtractionError, FetchError, LockError, RetentionError, Result,
    StateError,
};
pub use extractor::LinkExtractor;
pub use fetch::{HttpFetcher, PageFetcher};
pub use lock::CycleLock;
pub use orchestrator::Orchestrator;
pub use retention::{RetentionManager, RetentionSummary};
pub use state::{StateCorruptionWarning, StateStore};
pub use transfer::{TransferEngine, TransferReport, TransferRequest, YtDlpEngine};
pub use types::{
    CandidateLink, CycleOutcome, CyclePhase, CycleReport, DownloadOutcome, DownloadRecord,
    DownloadStatus, FailureKind, HostPlatform, KnownLinkRecord,
};
pub use validate::{CheckResult, ValidationReport, test_download, validate};

/// Cancel `token` when a termination signal arrives.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// A running cycle stops between candidates and kills its in-flight transfer.
pub async fn cancel_on_signal(token: tokio_util::sync::CancellationToken) {
    tokio::select! {
        _ = wait_for_signal() => {
            tracing::warn!("Shutdown requested, stopping cycle");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_cancel_on_signal_returns_when_token_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let handle = tokio::spawn(cancel_on_signal(token.clone()));

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("signal task should exit once the token is cancelled")
            .unwrap();
    }
}
