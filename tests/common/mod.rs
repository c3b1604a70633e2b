//! Shared fakes and configuration for replay-dl pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use replay_dl::config::RetryConfig;
use replay_dl::{
    Config, DownloadError, FetchError, PageFetcher, TransferEngine, TransferReport,
    TransferRequest,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Fetcher that serves a fixed page, or fails every time
pub struct StaticFetcher {
    page: Option<String>,
    calls: Mutex<u32>,
}

impl StaticFetcher {
    pub fn page(html: impl Into<String>) -> Self {
        Self {
            page: Some(html.into()),
            calls: Mutex::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            page: None,
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        *self.calls.lock().unwrap() += 1;
        self.page.clone().ok_or_else(|| FetchError::Network {
            url: url.to_string(),
            message: "connection refused".into(),
        })
    }
}

/// What the fake engine does for a URL
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Write this many bytes and succeed
    Write(u64),
    /// Report a size overflow after leaving a partial artifact
    Oversized,
    /// Never finish
    Hang,
    /// Fail as an unsupported format
    Unsupported,
}

/// Transfer engine scripted per URL, counting calls
#[derive(Default)]
pub struct FakeTransferEngine {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<Vec<String>>,
}

impl FakeTransferEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(url.to_string(), behavior);
        self
    }

    /// URLs transferred, one entry per attempt
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, url: &str) -> usize {
        self.calls().iter().filter(|u| u.as_str() == url).count()
    }
}

#[async_trait]
impl TransferEngine for FakeTransferEngine {
    async fn transfer(
        &self,
        request: &TransferRequest,
        _cancel: &CancellationToken,
    ) -> Result<TransferReport, DownloadError> {
        self.calls.lock().unwrap().push(request.url.clone());
        let behavior = self
            .behaviors
            .get(&request.url)
            .cloned()
            .unwrap_or(Behavior::Write(2048));

        match behavior {
            Behavior::Write(bytes) => {
                std::fs::write(&request.output_path, vec![0u8; bytes as usize]).unwrap();
                Ok(TransferReport {
                    bytes_written: bytes,
                })
            }
            Behavior::Oversized => {
                let partial = format!("{}.part", request.output_path.display());
                std::fs::write(&partial, vec![0u8; 4096]).unwrap();
                Err(DownloadError::SizeExceeded {
                    limit: request.max_bytes,
                    observed: 4096,
                })
            }
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Behavior::Unsupported => Err(DownloadError::UnsupportedFormat(
                "ERROR: Unsupported URL".into(),
            )),
        }
    }

    async fn probe(&self) -> replay_dl::Result<String> {
        Ok("fake 1.0".into())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Config rooted in a temp dir, with small size limits and fast retries
pub fn test_config(dir: &TempDir) -> Config {
    let root = dir.path();
    let mut config = Config {
        target_url: "https://replays.example/".into(),
        download_dir: root.join("downloads"),
        min_file_size_bytes: 512,
        max_file_size_bytes: 1024 * 1024,
        max_download_time: Duration::from_secs(60),
        keywords: vec!["nba".into(), "championship".into()],
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        ..Default::default()
    };
    config.persistence.known_links_path = root.join("state/known_links.json");
    config.persistence.downloads_path = root.join("state/downloads.json");
    config.persistence.lock_path = root.join("state/replay-dl.lock");
    config
}

/// Files in `dir`, sorted by name
pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
