//! One discovery, download and retention cycle
//!
//! ```text
//! Fetch -> Extract -> Filter -> DownloadLoop -> Retain -> Report
//! ```
//!
//! A failure isolated to fetching or to the download directory aborts the
//! cycle but still runs retention. A state write failure aborts without
//! retention, since nothing further can be recorded.

use crate::config::Config;
use crate::downloader::DownloadEngine;
use crate::error::{Result, StateError};
use crate::extractor::LinkExtractor;
use crate::fetch::PageFetcher;
use crate::lock::CycleLock;
use crate::retention::RetentionManager;
use crate::retry::retry_with_backoff;
use crate::state::StateStore;
use crate::transfer::TransferEngine;
use crate::types::{
    CandidateLink, CycleOutcome, CyclePhase, CycleReport, DownloadOutcome, DownloadStatus,
    DownloadRecord, FailureKind, FailureSummary,
};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs pipeline cycles against injected fetch and transfer collaborators
pub struct Orchestrator {
    config: Config,
    fetcher: Arc<dyn PageFetcher>,
    downloader: DownloadEngine,
    retention: RetentionManager,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator
    ///
    /// `cancel` stops the download loop between candidates and aborts an
    /// in-flight transfer.
    pub fn new(
        config: Config,
        fetcher: Arc<dyn PageFetcher>,
        engine: Arc<dyn TransferEngine>,
        cancel: CancellationToken,
    ) -> Self {
        let downloader = DownloadEngine::new(&config, engine);
        Self {
            config,
            fetcher,
            downloader,
            retention: RetentionManager::new(),
            cancel,
        }
    }

    /// Run one cycle under the cycle lock
    ///
    /// Errors are returned only when the cycle could not start: the lock is
    /// held or the state files are unreadable. Everything after that is
    /// reflected in the returned report.
    pub async fn run(&self) -> Result<CycleReport> {
        let _lock = CycleLock::acquire(&self.config.persistence.lock_path)?;
        let mut store = StateStore::open(&self.config.persistence)?;
        Ok(self.run_cycle_at(&mut store, Utc::now()).await)
    }

    /// Run one cycle with an explicit clock, against an already open store
    pub async fn run_cycle_at(&self, store: &mut StateStore, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::new(now);
        report.state_warnings = store.warnings().iter().map(|w| w.to_string()).collect();
        tracing::info!(target_url = %self.config.target_url, "cycle started");

        let outcome = match self.discover_and_download(store, now, &mut report).await {
            Ok(()) => {
                self.retain(store, now, &mut report);
                CycleOutcome::Completed
            }
            Err(abort) => {
                if abort.retain {
                    self.retain(store, now, &mut report);
                }
                CycleOutcome::FatalAborted {
                    phase: abort.phase,
                    reason: abort.reason,
                }
            }
        };

        report.outcome = outcome;
        report.finished_at = Utc::now().max(now);
        match &report.outcome {
            CycleOutcome::Completed => tracing::info!(
                discovered = report.discovered,
                new = report.new,
                downloaded = report.downloaded,
                failed = report.failed,
                retired = report.retired,
                "cycle completed"
            ),
            CycleOutcome::FatalAborted { phase, reason } => tracing::error!(
                phase = ?phase,
                reason = %reason,
                downloaded = report.downloaded,
                "cycle aborted"
            ),
        }
        report
    }

    async fn discover_and_download(
        &self,
        store: &mut StateStore,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> std::result::Result<(), Abort> {
        // Fetch
        let target = match self.config.target() {
            Ok(url) => url,
            Err(e) => return Err(Abort::isolated(CyclePhase::Fetch, e)),
        };
        let fetched = retry_with_backoff(&self.config.retry, |attempt| {
            let target = &target;
            async move {
                tracing::debug!(url = %target, attempt, "fetching listing page");
                self.fetcher.fetch(target).await
            }
        })
        .await;
        let content = match fetched {
            Ok(content) => content,
            Err(e) => return Err(Abort::isolated(CyclePhase::Fetch, e)),
        };

        // Extract
        let candidates = match LinkExtractor::new(&self.config) {
            Ok(extractor) => extractor.extract(&content, &target, now),
            Err(e) => {
                tracing::warn!(error = %e, "link extraction unavailable, no candidates this cycle");
                Vec::new()
            }
        };
        report.discovered = candidates.len();

        // Filter
        let fresh = self
            .filter(store, candidates, now)
            .map_err(|e| Abort::state(CyclePhase::Filter, e))?;
        report.new = fresh.len();
        tracing::info!(discovered = report.discovered, new = report.new, "candidates filtered");

        if fresh.is_empty() {
            return Ok(());
        }

        // DownloadLoop
        let download_dir = self.downloader.download_dir();
        probe_writable(download_dir).map_err(|e| {
            Abort::isolated(
                CyclePhase::DownloadLoop,
                format!("download directory {} is not writable: {}", download_dir.display(), e),
            )
        })?;

        for candidate in &fresh {
            if self.cancel.is_cancelled() {
                return Err(Abort::interrupted());
            }
            store
                .record_known(&candidate.url, now)
                .map_err(|e| Abort::state(CyclePhase::DownloadLoop, e))?;

            let outcome = self
                .downloader
                .download(candidate, |p| store.path_in_use(p), &self.cancel)
                .await;

            self.settle(store, candidate, outcome, report)?;
        }

        Ok(())
    }

    /// Drop known and pre-cutoff candidates, recording the pre-cutoff ones as known
    fn filter(
        &self,
        store: &mut StateStore,
        candidates: Vec<CandidateLink>,
        now: DateTime<Utc>,
    ) -> std::result::Result<Vec<CandidateLink>, StateError> {
        let cutoff = self.config.cutoff_instant();
        let mut fresh = Vec::new();

        for candidate in candidates {
            if store.is_known(&candidate.url) {
                continue;
            }
            if let Some(cutoff) = cutoff
                && candidate.discovered_at < cutoff
            {
                tracing::debug!(url = %candidate.url, cutoff = %cutoff, "before start date, marking known");
                store.record_known(&candidate.url, now)?;
                continue;
            }
            fresh.push(candidate);
        }
        Ok(fresh)
    }

    /// Record one download outcome, returning an abort reason when the cycle must stop
    fn settle(
        &self,
        store: &mut StateStore,
        candidate: &CandidateLink,
        outcome: DownloadOutcome,
        report: &mut CycleReport,
    ) -> std::result::Result<(), Abort> {
        let finished_at = Utc::now();
        let recorded = match outcome {
            DownloadOutcome::Completed { path, size } => {
                report.downloaded += 1;
                store.record_download(DownloadRecord {
                    url: candidate.url.clone(),
                    file_path: path,
                    size_bytes: size,
                    downloaded_at: finished_at,
                    status: DownloadStatus::Completed,
                    reason: None,
                })
            }
            DownloadOutcome::Failed {
                kind: FailureKind::Cancelled,
                ..
            } => return Err(Abort::interrupted()),
            DownloadOutcome::Failed {
                kind,
                message,
                path,
            } => {
                report.failed += 1;
                report.failures.push(FailureSummary {
                    url: candidate.url.clone(),
                    kind,
                    message: message.clone(),
                });
                // Oversized videos leave no record; the URL stays known
                if kind == FailureKind::SizeExceeded {
                    Ok(())
                } else {
                    store.record_failure(&candidate.url, &path, &message, finished_at)
                }
            }
        };

        recorded.map_err(|e| Abort::state(CyclePhase::DownloadLoop, e))
    }

    fn retain(&self, store: &mut StateStore, now: DateTime<Utc>, report: &mut CycleReport) {
        match self
            .retention
            .sweep(store, now, self.config.retention_days)
        {
            Ok(summary) => report.retired = summary.removed,
            Err(e) => {
                tracing::error!(error = %e, "retention sweep could not persist removals");
                report.state_warnings.push(e.to_string());
            }
        }

        let max_age = Duration::from_secs(self.config.partial_max_age_hours.saturating_mul(3600));
        self.retention.sweep_partials(
            self.downloader.download_dir(),
            std::time::SystemTime::now(),
            max_age,
        );
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("target_url", &self.config.target_url)
            .field("downloader", &self.downloader)
            .finish()
    }
}

/// Why a cycle stopped early
#[derive(Debug)]
struct Abort {
    phase: CyclePhase,
    reason: String,
    /// Whether retention still runs; false once state can no longer be written
    retain: bool,
}

impl Abort {
    fn isolated(phase: CyclePhase, reason: impl ToString) -> Self {
        Self {
            phase,
            reason: reason.to_string(),
            retain: true,
        }
    }

    fn state(phase: CyclePhase, error: StateError) -> Self {
        tracing::error!(error = %error, "state write failed, stopping cycle");
        Self {
            phase,
            reason: error.to_string(),
            retain: false,
        }
    }

    fn interrupted() -> Self {
        Self::isolated(CyclePhase::DownloadLoop, "interrupted by shutdown")
    }
}

/// Check the download directory can be created and written to
fn probe_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    tempfile::Builder::new()
        .prefix(".replay-dl-probe-")
        .tempfile_in(dir)
        .map(drop)
}
