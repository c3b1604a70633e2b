//! yt-dlp subprocess transfer engine

use super::parser::{classify_failure, exceeded_max_filesize};
use super::{TransferEngine, TransferReport, TransferRequest};
use crate::config::TransferConfig;
use crate::error::DownloadError;
use crate::utils::transferred_bytes;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Output lines kept per stream for failure classification
const OUTPUT_TAIL_LINES: usize = 40;

/// Transfer engine that runs the external `yt-dlp` binary per video
///
/// # Examples
///
/// ```no_run
/// use replay_dl::config::TransferConfig;
/// use replay_dl::transfer::{TransferEngine, YtDlpEngine};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = YtDlpEngine::from_path(&TransferConfig::default())
///     .expect("yt-dlp not found in PATH");
/// println!("{}", engine.probe().await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct YtDlpEngine {
    binary_path: PathBuf,
    socket_timeout: Duration,
    fragment_retries: u32,
    size_poll_interval: Duration,
}

impl YtDlpEngine {
    /// Create an engine with an explicit binary path
    pub fn new(binary_path: PathBuf, config: &TransferConfig) -> Self {
        Self {
            binary_path,
            socket_timeout: config.socket_timeout,
            fragment_retries: config.fragment_retries,
            size_poll_interval: config.size_poll_interval.max(Duration::from_millis(10)),
        }
    }

    /// Attempt to find yt-dlp in PATH
    pub fn from_path(config: &TransferConfig) -> Option<Self> {
        which::which("yt-dlp").ok().map(|path| Self::new(path, config))
    }

    /// Use the configured binary, falling back to a PATH lookup
    pub fn from_config(config: &TransferConfig) -> crate::Result<Self> {
        match &config.ytdlp_path {
            Some(path) => Ok(Self::new(path.clone(), config)),
            None => Self::from_path(config).ok_or_else(|| {
                crate::Error::ExternalTool("yt-dlp not found in PATH".to_string())
            }),
        }
    }

    /// Path of the binary this engine runs
    pub fn binary_path(&self) -> &std::path::Path {
        &self.binary_path
    }

    fn command_args(&self, request: &TransferRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--no-playlist".into(),
            "--format".into(),
            request.format.clone().into(),
            "--output".into(),
            request.output_path.clone().into_os_string(),
            "--continue".into(),
            "--max-filesize".into(),
            request.max_bytes.to_string().into(),
            "--socket-timeout".into(),
            self.socket_timeout.as_secs().max(1).to_string().into(),
            "--retries".into(),
            "3".into(),
            "--fragment-retries".into(),
            self.fragment_retries.to_string().into(),
            "--no-check-certificates".into(),
            "--concurrent-fragments".into(),
            "1".into(),
            "--hls-use-mpegts".into(),
            "--merge-output-format".into(),
            "mp4".into(),
            "--newline".into(),
            "--no-warnings".into(),
        ];
        args.extend(request.extra_args.iter().map(OsString::from));
        // End of options so a URL starting with '-' is never read as a flag
        args.push("--".into());
        args.push(request.url.clone().into());
        args
    }
}

/// Collect the last lines of a child output stream
fn spawn_tail<R>(stream: Option<R>, label: &'static str) -> JoinHandle<VecDeque<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut tail = VecDeque::with_capacity(OUTPUT_TAIL_LINES);
        let Some(stream) = stream else {
            return tail;
        };
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::trace!(stream = label, "{}", line);
            if tail.len() == OUTPUT_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail
    })
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "failed to kill yt-dlp");
    }
}

#[async_trait]
impl TransferEngine for YtDlpEngine {
    async fn transfer(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, DownloadError> {
        tracing::debug!(url = %request.url, output = ?request.output_path, format = %request.format, "starting yt-dlp");

        let mut child = Command::new(&self.binary_path)
            .args(self.command_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DownloadError::Network(format!("Failed to execute yt-dlp: {}", e)))?;

        let stdout_tail = spawn_tail(child.stdout.take(), "stdout");
        let stderr_tail = spawn_tail(child.stderr.take(), "stderr");

        let deadline = tokio::time::sleep(request.timeout);
        tokio::pin!(deadline);
        let mut size_poll = tokio::time::interval(self.size_poll_interval);
        size_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.map_err(|e| {
                        DownloadError::Network(format!("Failed to wait for yt-dlp: {}", e))
                    })?;
                }
                _ = size_poll.tick() => {
                    let observed = transferred_bytes(&request.output_path);
                    if observed > request.max_bytes {
                        tracing::warn!(url = %request.url, observed, limit = request.max_bytes, "size ceiling exceeded, aborting transfer");
                        kill(&mut child).await;
                        return Err(DownloadError::SizeExceeded {
                            limit: request.max_bytes,
                            observed,
                        });
                    }
                }
                _ = cancel.cancelled() => {
                    kill(&mut child).await;
                    return Err(DownloadError::Cancelled);
                }
                _ = &mut deadline => {
                    kill(&mut child).await;
                    return Err(DownloadError::Timeout {
                        limit_secs: request.timeout.as_secs(),
                    });
                }
            }
        };

        let mut output: Vec<String> = stdout_tail.await.unwrap_or_default().into();
        output.extend(stderr_tail.await.unwrap_or_default());
        let output = output.join("\n");

        // --max-filesize rejections exit 0 without writing the file
        if exceeded_max_filesize(&output) || !status.success() {
            let error = classify_failure(&output, request.max_bytes);
            tracing::debug!(url = %request.url, code = ?status.code(), error = %error, "yt-dlp failed");
            return Err(error);
        }

        let bytes_written = tokio::fs::metadata(&request.output_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(TransferReport { bytes_written })
    }

    async fn probe(&self) -> crate::Result<String> {
        let output = Command::new(&self.binary_path)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| crate::Error::ExternalTool(format!("Failed to execute yt-dlp: {}", e)))?;

        if !output.status.success() {
            return Err(crate::Error::ExternalTool(format!(
                "yt-dlp --version exited with {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn request(output_path: PathBuf) -> TransferRequest {
        TransferRequest {
            url: "https://ok.ru/video/1".into(),
            output_path,
            format: "hd/sd/low/lowest".into(),
            extra_args: vec!["--referer".into(), "https://ok.ru/".into()],
            timeout: Duration::from_secs(5),
            max_bytes: 1000,
        }
    }

    #[test]
    fn test_command_args_carry_policy_and_limits() {
        let engine = YtDlpEngine::new(PathBuf::from("yt-dlp"), &TransferConfig::default());
        let args: Vec<String> = engine
            .command_args(&request(PathBuf::from("/downloads/game.mp4")))
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();

        let value_of = |flag: &str| {
            let i = args.iter().position(|a| a == flag).unwrap();
            args[i + 1].clone()
        };
        assert_eq!(value_of("--format"), "hd/sd/low/lowest");
        assert_eq!(value_of("--output"), "/downloads/game.mp4");
        assert_eq!(value_of("--max-filesize"), "1000");
        assert_eq!(value_of("--socket-timeout"), "30");
        assert_eq!(value_of("--referer"), "https://ok.ru/");
        assert!(args.contains(&"--continue".to_string()));
        assert!(args.contains(&"--no-check-certificates".to_string()));
        assert_eq!(args.last().unwrap(), "https://ok.ru/video/1");
        assert_eq!(args[args.len() - 2], "--");
    }

    #[test]
    fn test_from_path_consistency_with_which_crate() {
        let which_result = which::which("yt-dlp");
        let from_path_result = YtDlpEngine::from_path(&TransferConfig::default());
        assert_eq!(which_result.is_ok(), from_path_result.is_some());
    }

    #[test]
    fn test_from_config_prefers_explicit_path() {
        let config = TransferConfig {
            ytdlp_path: Some(PathBuf::from("/opt/bin/yt-dlp")),
            ..Default::default()
        };
        let engine = YtDlpEngine::from_config(&config).unwrap();
        assert_eq!(engine.binary_path(), std::path::Path::new("/opt/bin/yt-dlp"));
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use serial_test::serial;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// An executable stand-in for yt-dlp that finds `--output` and runs `body`
        fn fake_ytdlp(dir: &TempDir, body: &str) -> YtDlpEngine {
            let script = dir.path().join("fake-yt-dlp");
            let content = format!(
                "#!/bin/sh\nout=\"\"\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"--output\" ]; then out=\"$2\"; shift; fi\n  shift\ndone\n{body}\n"
            );
            std::fs::write(&script, content).unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

            let config = TransferConfig {
                size_poll_interval: Duration::from_millis(20),
                ..Default::default()
            };
            YtDlpEngine::new(script, &config)
        }

        #[tokio::test]
        #[serial]
        async fn test_successful_transfer_reports_size() {
            let dir = TempDir::new().unwrap();
            let engine = fake_ytdlp(&dir, "head -c 600 /dev/zero > \"$out\"");
            let output = dir.path().join("game.mp4");

            let report = engine
                .transfer(&request(output.clone()), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(report.bytes_written, 600);
            assert!(output.exists());
        }

        #[tokio::test]
        #[serial]
        async fn test_growing_partial_file_hits_size_ceiling() {
            let dir = TempDir::new().unwrap();
            let engine = fake_ytdlp(&dir, "head -c 4096 /dev/zero > \"$out.part\"\nsleep 30");

            let result = engine
                .transfer(&request(dir.path().join("game.mp4")), &CancellationToken::new())
                .await;
            match result {
                Err(DownloadError::SizeExceeded { limit, observed }) => {
                    assert_eq!(limit, 1000);
                    assert_eq!(observed, 4096);
                }
                other => panic!("expected size exceeded, got {other:?}"),
            }
        }

        #[tokio::test]
        #[serial]
        async fn test_hung_transfer_times_out() {
            let dir = TempDir::new().unwrap();
            let engine = fake_ytdlp(&dir, "sleep 30");
            let mut req = request(dir.path().join("game.mp4"));
            req.timeout = Duration::from_millis(300);

            let result = engine.transfer(&req, &CancellationToken::new()).await;
            assert!(matches!(result, Err(DownloadError::Timeout { .. })));
        }

        #[tokio::test]
        #[serial]
        async fn test_cancellation_stops_transfer() {
            let dir = TempDir::new().unwrap();
            let engine = fake_ytdlp(&dir, "sleep 30");
            let cancel = CancellationToken::new();

            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                trigger.cancel();
            });

            let result = engine
                .transfer(&request(dir.path().join("game.mp4")), &cancel)
                .await;
            assert!(matches!(result, Err(DownloadError::Cancelled)));
        }

        #[tokio::test]
        #[serial]
        async fn test_failure_output_is_classified() {
            let dir = TempDir::new().unwrap();
            let engine = fake_ytdlp(
                &dir,
                "echo \"ERROR: [generic] Unsupported URL: https://ok.ru/video/1\" >&2\nexit 1",
            );

            let result = engine
                .transfer(&request(dir.path().join("game.mp4")), &CancellationToken::new())
                .await;
            assert!(matches!(result, Err(DownloadError::UnsupportedFormat(_))));
        }

        #[tokio::test]
        #[serial]
        async fn test_probe_reports_version() {
            let dir = TempDir::new().unwrap();
            let script = dir.path().join("fake-yt-dlp");
            std::fs::write(&script, "#!/bin/sh\necho 2025.10.01\n").unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

            let engine = YtDlpEngine::new(script, &TransferConfig::default());
            assert_eq!(engine.probe().await.unwrap(), "2025.10.01");
        }
    }
}
