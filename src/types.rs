//! Core types for replay-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Video hosting platform a candidate link points at
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostPlatform {
    /// ok.ru
    OkRu,
    /// youtube.com / youtu.be
    YouTube,
    /// vimeo.com
    Vimeo,
    /// dailymotion.com
    Dailymotion,
    /// streamable.com
    Streamable,
    /// Any other configured host
    Other,
}

impl HostPlatform {
    /// Stable lowercase name used in config and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            HostPlatform::OkRu => "ok_ru",
            HostPlatform::YouTube => "youtube",
            HostPlatform::Vimeo => "vimeo",
            HostPlatform::Dailymotion => "dailymotion",
            HostPlatform::Streamable => "streamable",
            HostPlatform::Other => "other",
        }
    }
}

impl std::fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HostPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "ok_ru" | "okru" => Ok(HostPlatform::OkRu),
            "youtube" => Ok(HostPlatform::YouTube),
            "vimeo" => Ok(HostPlatform::Vimeo),
            "dailymotion" => Ok(HostPlatform::Dailymotion),
            "streamable" => Ok(HostPlatform::Streamable),
            "other" => Ok(HostPlatform::Other),
            other => Err(format!("unknown host platform: {other}")),
        }
    }
}

/// A video link discovered on the listing page during one cycle
///
/// Never persisted directly; the URL is recorded through the state store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateLink {
    /// Absolute, fragment-free URL of the video
    pub url: String,
    /// Platform classified from the URL host
    pub host_platform: HostPlatform,
    /// Lowercase keywords found in the link context
    pub matched_keywords: BTreeSet<String>,
    /// When the link was seen on the page
    pub discovered_at: DateTime<Utc>,
    /// Anchor or title text the link was found with
    pub title: String,
}

/// A URL that has been observed at least once
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownLinkRecord {
    /// Unique key; filled from the map key on load
    #[serde(skip_serializing, default)]
    pub url: String,
    /// First cycle that observed the URL
    pub first_seen_at: DateTime<Utc>,
    /// Reason of the last terminal download failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
}

/// Terminal status of a download attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// File exists at `file_path`
    Completed,
    /// Retries exhausted or permanent failure
    Failed,
}

/// Result of a terminal download attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Unique key; filled from the map key on load
    #[serde(skip_serializing, default)]
    pub url: String,
    /// Output file (intended path for failures)
    pub file_path: PathBuf,
    /// Size of the completed file, 0 for failures
    pub size_bytes: u64,
    /// When the attempt became terminal
    pub downloaded_at: DateTime<Utc>,
    /// Terminal status
    pub status: DownloadStatus,
    /// Failure description for failed records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Classification of a failed download
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient transfer failure
    Network,
    /// Wall-clock limit exceeded
    Timeout,
    /// Size ceiling exceeded
    SizeExceeded,
    /// Host or format cannot be served
    UnsupportedFormat,
    /// Shutdown requested mid-transfer
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Network => "network",
            FailureKind::Timeout => "timeout",
            FailureKind::SizeExceeded => "size_exceeded",
            FailureKind::UnsupportedFormat => "unsupported_format",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Outcome of [`DownloadEngine::download`](crate::downloader::DownloadEngine::download)
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DownloadOutcome {
    /// File exists at `path` with `size` bytes
    Completed {
        /// Output file
        path: PathBuf,
        /// File size in bytes
        size: u64,
    },
    /// No artifact remains for this download
    Failed {
        /// Failure classification
        kind: FailureKind,
        /// Human-readable detail
        message: String,
        /// Path the download was written to
        path: PathBuf,
    },
}

impl DownloadOutcome {
    /// Whether the download completed
    pub fn is_completed(&self) -> bool {
        matches!(self, DownloadOutcome::Completed { .. })
    }
}

/// Phase of a pipeline cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    /// Listing page fetch
    Fetch,
    /// Candidate extraction
    Extract,
    /// Known-link and cutoff filtering
    Filter,
    /// Sequential downloads
    DownloadLoop,
    /// Retention sweep
    Retain,
    /// Summary emission
    Report,
}

/// Terminal state of a cycle
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Every phase ran; individual downloads may still have failed
    Completed,
    /// A fatal condition stopped the cycle
    FatalAborted {
        /// Phase in which the cycle aborted
        phase: CyclePhase,
        /// Failure description
        reason: String,
    },
}

/// One failed download in a cycle report
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    /// Candidate URL
    pub url: String,
    /// Failure classification
    pub kind: FailureKind,
    /// Failure description
    pub message: String,
}

/// Structured summary emitted at the end of every cycle
#[derive(Clone, Debug, Serialize)]
pub struct CycleReport {
    /// Cycle start
    pub started_at: DateTime<Utc>,
    /// Cycle end
    pub finished_at: DateTime<Utc>,
    /// Candidates extracted from the page
    pub discovered: usize,
    /// Candidates that passed the filter
    pub new: usize,
    /// Completed downloads
    pub downloaded: usize,
    /// Terminal download failures
    pub failed: usize,
    /// Download records removed by retention
    pub retired: usize,
    /// Terminal cycle state
    pub outcome: CycleOutcome,
    /// State corruption warnings raised while loading
    pub state_warnings: Vec<String>,
    /// Per-candidate failures
    pub failures: Vec<FailureSummary>,
}

impl CycleReport {
    /// Empty report for a cycle starting at `started_at`
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            discovered: 0,
            new: 0,
            downloaded: 0,
            failed: 0,
            retired: 0,
            outcome: CycleOutcome::Completed,
            state_warnings: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Process exit code: 0 when the cycle completed, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        match self.outcome {
            CycleOutcome::Completed => 0,
            CycleOutcome::FatalAborted { .. } => 1,
        }
    }
}
