//! Setup checks and one-off test downloads
//!
//! Neither entrypoint touches the state store.

use crate::config::Config;
use crate::downloader::DownloadEngine;
use crate::error::{Error, Result};
use crate::extractor::classify;
use crate::fetch::PageFetcher;
use crate::transfer::TransferEngine;
use crate::types::{CandidateLink, DownloadOutcome, HostPlatform};
use crate::utils::title_from_url;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Result of one setup check
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    /// Short check name
    pub name: String,
    /// Whether the check passed
    pub passed: bool,
    /// What was found
    pub detail: String,
}

/// Outcome of [`validate`]
#[derive(Clone, Debug, Default, Serialize)]
pub struct ValidationReport {
    /// Individual checks, in the order they ran
    pub checks: Vec<CheckResult>,
}

impl ValidationReport {
    /// Whether every check passed
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    fn push(&mut self, name: &str, outcome: std::result::Result<String, String>) {
        let (passed, detail) = match outcome {
            Ok(detail) => (true, detail),
            Err(detail) => (false, detail),
        };
        if passed {
            tracing::info!(check = name, %detail, "check passed");
        } else {
            tracing::error!(check = name, %detail, "check failed");
        }
        self.checks.push(CheckResult {
            name: name.to_string(),
            passed,
            detail,
        });
    }
}

/// Check the environment a cycle needs
///
/// Covers write access to the download directory and every state file
/// directory, reachability of the target page, and the transfer engine.
pub async fn validate(
    config: &Config,
    fetcher: &dyn PageFetcher,
    engine: &dyn TransferEngine,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    let valid = config
        .validate()
        .map(|()| "configuration is valid".to_string())
        .map_err(|e| e.to_string());
    report.push("config", valid);

    report.push("download_dir", check_writable(&config.download_dir));
    let persistence = &config.persistence;
    for (name, path) in [
        ("known_links_dir", &persistence.known_links_path),
        ("downloads_dir", &persistence.downloads_path),
        ("lock_dir", &persistence.lock_path),
    ] {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        report.push(name, check_writable(dir));
    }

    let target = match config.target() {
        Ok(url) => match fetcher.fetch(&url).await {
            Ok(body) => Ok(format!("{} responded with {} bytes", url, body.len())),
            Err(e) => Err(e.to_string()),
        },
        Err(e) => Err(e.to_string()),
    };
    report.push("target_url", target);

    let probe = engine
        .probe()
        .await
        .map(|version| format!("{} {}", engine.name(), version))
        .map_err(|e| e.to_string());
    report.push("transfer_engine", probe);

    report
}

/// Download a single URL outside the discovery and state flow
///
/// The URL must be http(s). Unlisted hosts use the default format policy.
pub async fn test_download(
    url: &str,
    config: &Config,
    engine: Arc<dyn TransferEngine>,
    cancel: &CancellationToken,
) -> Result<DownloadOutcome> {
    let parsed = Url::parse(url).map_err(|e| Error::config("test_download", format!("{url}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::config(
            "test_download",
            format!("unsupported scheme {}", parsed.scheme()),
        ));
    }

    let candidate = CandidateLink {
        url: parsed.to_string(),
        host_platform: classify(&parsed, &config.host_patterns).unwrap_or(HostPlatform::Other),
        matched_keywords: BTreeSet::new(),
        discovered_at: Utc::now(),
        title: format!("test-{}", title_from_url(&parsed)),
    };
    tracing::info!(url = %candidate.url, platform = %candidate.host_platform, "test download");

    let downloader = DownloadEngine::new(config, engine);
    Ok(downloader.download(&candidate, |_| false, cancel).await)
}

/// Create `dir` if needed and prove a file can be written in it
fn check_writable(dir: &Path) -> std::result::Result<String, String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;
    tempfile::Builder::new()
        .prefix(".replay-dl-probe-")
        .tempfile_in(dir)
        .map(|_| format!("{} is writable", dir.display()))
        .map_err(|e| format!("{} is not writable: {}", dir.display(), e))
}
