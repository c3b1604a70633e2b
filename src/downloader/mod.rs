//! Bounded-retry download engine
//!
//! Turns one [`CandidateLink`] into a file in the download directory:
//! - [`policy`] picks the format selector for the candidate's host
//! - the [`TransferEngine`] performs each attempt under a hard wall-clock limit
//! - [`finalization`] verifies the output before it counts as completed
//!
//! Transient failures are retried with backoff. Partial artifacts survive
//! between attempts so the engine can continue, and are removed once the
//! outcome is terminal.

mod finalization;
mod policy;

pub use policy::FormatPolicy;

use crate::config::{Config, RetryConfig};
use crate::error::DownloadError;
use crate::retry::retry_with_backoff;
use crate::transfer::{TransferEngine, TransferRequest};
use crate::types::{CandidateLink, DownloadOutcome, FailureKind};
use crate::utils::{partial_artifacts, remove_artifacts, sanitize_filename, unique_path};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Downloads candidates one at a time through a [`TransferEngine`]
#[derive(Clone)]
pub struct DownloadEngine {
    engine: Arc<dyn TransferEngine>,
    download_dir: PathBuf,
    max_download_time: Duration,
    max_file_size_bytes: u64,
    min_file_size_bytes: u64,
    retry: RetryConfig,
}

impl DownloadEngine {
    /// Create a download engine for `config`
    pub fn new(config: &Config, engine: Arc<dyn TransferEngine>) -> Self {
        Self {
            engine,
            download_dir: config.download_dir.clone(),
            max_download_time: config.max_download_time,
            max_file_size_bytes: config.max_file_size_bytes,
            min_file_size_bytes: config.min_file_size_bytes,
            retry: config.retry.clone(),
        }
    }

    /// The directory output files are written to
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Choose a free output path for `candidate`
    ///
    /// The name comes from the sanitized title; `is_taken` reports paths
    /// already owned by other records.
    pub fn output_path_for(
        &self,
        candidate: &CandidateLink,
        is_taken: impl Fn(&Path) -> bool,
    ) -> Option<PathBuf> {
        let preferred = self.download_dir.join(sanitize_filename(&candidate.title));
        unique_path(&preferred, is_taken)
    }

    /// Download `candidate`, retrying transient failures
    ///
    /// On `Completed` the file exists at the returned path with the returned
    /// size. On `Failed` no artifact for that path remains.
    pub async fn download(
        &self,
        candidate: &CandidateLink,
        is_taken: impl Fn(&Path) -> bool,
        cancel: &CancellationToken,
    ) -> DownloadOutcome {
        let Some(output_path) = self.output_path_for(candidate, is_taken) else {
            return DownloadOutcome::Failed {
                kind: FailureKind::Network,
                message: format!("no free file name for {:?}", candidate.title),
                path: self.download_dir.join(sanitize_filename(&candidate.title)),
            };
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.download_dir).await {
            return DownloadOutcome::Failed {
                kind: FailureKind::Network,
                message: format!(
                    "cannot create download directory {}: {}",
                    self.download_dir.display(),
                    e
                ),
                path: output_path,
            };
        }

        let policy = FormatPolicy::for_platform(candidate.host_platform);
        let request = TransferRequest {
            url: candidate.url.clone(),
            output_path: output_path.clone(),
            format: policy.format.to_string(),
            extra_args: policy.extra_args(),
            timeout: self.max_download_time,
            max_bytes: self.max_file_size_bytes,
        };

        tracing::info!(
            url = %candidate.url,
            platform = %candidate.host_platform,
            output = ?output_path,
            engine = self.engine.name(),
            "downloading"
        );

        let result = retry_with_backoff(&self.retry, |attempt| {
            let request = &request;
            async move { self.attempt(request, attempt, cancel).await }
        })
        .await;

        match result {
            Ok(size) => {
                finalization::set_file_mode(&output_path).await;
                for leftover in partial_artifacts(&output_path) {
                    if let Err(e) = tokio::fs::remove_file(&leftover).await {
                        tracing::debug!(path = ?leftover, error = %e, "failed to remove leftover partial");
                    }
                }
                tracing::info!(url = %candidate.url, output = ?output_path, size, "download completed");
                DownloadOutcome::Completed {
                    path: output_path,
                    size,
                }
            }
            Err(error) => {
                let removed = remove_artifacts(&output_path);
                tracing::warn!(
                    url = %candidate.url,
                    kind = %error.kind(),
                    error = %error,
                    removed,
                    "download failed"
                );
                DownloadOutcome::Failed {
                    kind: error.kind(),
                    message: error.to_string(),
                    path: output_path,
                }
            }
        }
    }

    /// One transfer attempt, bounded by the wall-clock limit
    async fn attempt(
        &self,
        request: &TransferRequest,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        tracing::debug!(url = %request.url, attempt, "transfer attempt");

        // Dropping the transfer future kills the child process
        match tokio::time::timeout(self.max_download_time, self.engine.transfer(request, cancel))
            .await
        {
            Ok(Ok(report)) => {
                tracing::debug!(url = %request.url, bytes = report.bytes_written, "transfer finished");
                finalization::verify_output(
                    &request.output_path,
                    self.min_file_size_bytes,
                    self.max_file_size_bytes,
                )
                .await
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DownloadError::Timeout {
                limit_secs: self.max_download_time.as_secs(),
            }),
        }
    }
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("engine", &self.engine.name())
            .field("download_dir", &self.download_dir)
            .field("max_download_time", &self.max_download_time)
            .field("max_file_size_bytes", &self.max_file_size_bytes)
            .finish()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferReport;
    use crate::types::HostPlatform;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::{TempDir, tempdir};

    enum Step {
        Write(u64),
        WritePartialThenFail(u64),
        Fail(DownloadError),
        Hang,
    }

    struct ScriptedEngine {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicU32,
        saw_partial: Mutex<Vec<bool>>,
        formats: Mutex<Vec<String>>,
    }

    impl ScriptedEngine {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicU32::new(0),
                saw_partial: Mutex::new(Vec::new()),
                formats: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TransferEngine for ScriptedEngine {
        async fn transfer(
            &self,
            request: &TransferRequest,
            _cancel: &CancellationToken,
        ) -> Result<TransferReport, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.saw_partial
                .lock()
                .unwrap()
                .push(!partial_artifacts(&request.output_path).is_empty());
            self.formats.lock().unwrap().push(request.format.clone());

            let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Hang);
            match step {
                Step::Write(bytes) => {
                    std::fs::write(&request.output_path, vec![0u8; bytes as usize]).unwrap();
                    Ok(TransferReport {
                        bytes_written: bytes,
                    })
                }
                Step::WritePartialThenFail(bytes) => {
                    let mut partial = request.output_path.clone().into_os_string();
                    partial.push(".part");
                    std::fs::write(partial, vec![0u8; bytes as usize]).unwrap();
                    Err(DownloadError::Network("connection reset".into()))
                }
                Step::Fail(e) => Err(e),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                    Err(DownloadError::Network("unreachable".into()))
                }
            }
        }

        async fn probe(&self) -> crate::Result<String> {
            Ok("scripted".into())
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn engine_for(dir: &TempDir, transfer: Arc<ScriptedEngine>) -> DownloadEngine {
        let config = Config {
            download_dir: dir.path().join("downloads"),
            max_download_time: Duration::from_secs(60),
            max_file_size_bytes: 1000,
            min_file_size_bytes: 10,
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(60),
                backoff_multiplier: 2.0,
                jitter: false,
            },
            ..Default::default()
        };
        DownloadEngine::new(&config, transfer)
    }

    fn candidate(platform: HostPlatform) -> CandidateLink {
        CandidateLink {
            url: "https://ok.ru/video/1".into(),
            host_platform: platform,
            matched_keywords: ["nba".to_string()].into_iter().collect(),
            discovered_at: Utc::now(),
            title: "NBA Finals: Game 7".into(),
        }
    }

    #[tokio::test]
    async fn test_completed_download_uses_sanitized_name_and_policy() {
        let dir = tempdir().unwrap();
        let transfer = ScriptedEngine::new(vec![Step::Write(100)]);
        let engine = engine_for(&dir, transfer.clone());

        let outcome = engine
            .download(&candidate(HostPlatform::OkRu), |_| false, &CancellationToken::new())
            .await;

        let expected = dir.path().join("downloads/NBA Finals Game 7.mp4");
        assert_eq!(
            outcome,
            DownloadOutcome::Completed {
                path: expected.clone(),
                size: 100
            }
        );
        assert!(expected.exists());
        assert_eq!(transfer.formats.lock().unwrap()[0], "hd/sd/low/lowest");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&expected).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o644);
        }
    }

    #[tokio::test]
    async fn test_claimed_path_gets_suffix() {
        let dir = tempdir().unwrap();
        let transfer = ScriptedEngine::new(vec![Step::Write(100)]);
        let engine = engine_for(&dir, transfer);
        let claimed = dir.path().join("downloads/NBA Finals Game 7.mp4");

        let outcome = engine
            .download(
                &candidate(HostPlatform::OkRu),
                |p| p == claimed,
                &CancellationToken::new(),
            )
            .await;
        match outcome {
            DownloadOutcome::Completed { path, .. } => {
                assert_eq!(path, dir.path().join("downloads/NBA Finals Game 7 (1).mp4"))
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_continues_from_partial_artifact() {
        let dir = tempdir().unwrap();
        let transfer = ScriptedEngine::new(vec![Step::WritePartialThenFail(50), Step::Write(100)]);
        let engine = engine_for(&dir, transfer.clone());

        let outcome = engine
            .download(&candidate(HostPlatform::YouTube), |_| false, &CancellationToken::new())
            .await;

        assert!(outcome.is_completed());
        assert_eq!(*transfer.saw_partial.lock().unwrap(), vec![false, true]);
        let output = dir.path().join("downloads/NBA Finals Game 7.mp4");
        assert!(partial_artifacts(&output).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_transfer_times_out_after_all_attempts() {
        let dir = tempdir().unwrap();
        let transfer = ScriptedEngine::new(vec![Step::Hang, Step::Hang, Step::Hang]);
        let engine = engine_for(&dir, transfer.clone());

        let outcome = engine
            .download(&candidate(HostPlatform::Vimeo), |_| false, &CancellationToken::new())
            .await;

        match outcome {
            DownloadOutcome::Failed { kind, .. } => assert_eq!(kind, FailureKind::Timeout),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(transfer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_size_exceeded_is_not_retried_and_leaves_nothing() {
        let dir = tempdir().unwrap();
        let transfer = ScriptedEngine::new(vec![Step::Write(5000)]);
        let engine = engine_for(&dir, transfer.clone());

        let outcome = engine
            .download(&candidate(HostPlatform::OkRu), |_| false, &CancellationToken::new())
            .await;

        match outcome {
            DownloadOutcome::Failed { kind, path, .. } => {
                assert_eq!(kind, FailureKind::SizeExceeded);
                assert!(!path.exists());
            }
            other => panic!("expected size exceeded, got {other:?}"),
        }
        assert_eq!(transfer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsupported_format_is_permanent() {
        let dir = tempdir().unwrap();
        let transfer = ScriptedEngine::new(vec![Step::Fail(DownloadError::UnsupportedFormat(
            "Unsupported URL".into(),
        ))]);
        let engine = engine_for(&dir, transfer.clone());

        let outcome = engine
            .download(&candidate(HostPlatform::Other), |_| false, &CancellationToken::new())
            .await;
        assert!(matches!(
            outcome,
            DownloadOutcome::Failed {
                kind: FailureKind::UnsupportedFormat,
                ..
            }
        ));
        assert_eq!(transfer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undersized_result_is_retried_then_fails_clean() {
        let dir = tempdir().unwrap();
        let transfer = ScriptedEngine::new(vec![Step::Write(3), Step::Write(3), Step::Write(3)]);
        let engine = engine_for(&dir, transfer.clone());

        let outcome = engine
            .download(&candidate(HostPlatform::OkRu), |_| false, &CancellationToken::new())
            .await;

        match outcome {
            DownloadOutcome::Failed { kind, path, .. } => {
                assert_eq!(kind, FailureKind::Network);
                assert!(!path.exists());
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(transfer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempdir().unwrap();
        let transfer = ScriptedEngine::new(vec![Step::Write(100)]);
        let engine = engine_for(&dir, transfer.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = engine
            .download(&candidate(HostPlatform::OkRu), |_| false, &cancel)
            .await;
        assert!(matches!(
            outcome,
            DownloadOutcome::Failed {
                kind: FailureKind::Cancelled,
                ..
            }
        ));
        assert_eq!(transfer.calls.load(Ordering::SeqCst), 0);
    }
}
