//! Command line surface
//!
//! Every setting can come from a JSON config file, an environment variable or
//! a flag. Flags and environment variables override the file.

use chrono::NaiveDate;
use clap::Parser;
use replay_dl::config::{Config, HostPattern};
use replay_dl::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Discover, download and retire sports replay videos
#[derive(Debug, Parser)]
#[command(name = "replay-dl")]
#[command(about = "Download new replay videos from a listing page and retire old ones")]
#[command(version)]
pub struct Cli {
    /// Check permissions, page reachability and yt-dlp, then exit
    #[arg(long, conflicts_with = "test_download")]
    pub validate: bool,

    /// Download one URL without touching state, then exit
    #[arg(long = "test-download", value_name = "URL")]
    pub test_download: Option<String>,

    /// JSON configuration file
    #[arg(short, long, value_name = "FILE", env = "REPLAY_DL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listing page to scan
    #[arg(long = "website-url", env = "WEBSITE_URL")]
    pub website_url: Option<String>,

    /// Directory videos are written to
    #[arg(long = "download-path", env = "DOWNLOAD_PATH")]
    pub download_path: Option<PathBuf>,

    /// Days a download is kept
    #[arg(long = "retention-days", env = "RETENTION_DAYS")]
    pub retention_days: Option<u32>,

    /// Wall-clock limit per transfer attempt, in seconds
    #[arg(long = "max-download-time", env = "MAX_DOWNLOAD_TIME")]
    pub max_download_time: Option<u64>,

    /// Size ceiling per video, in bytes
    #[arg(long = "max-file-size", env = "MAX_FILE_SIZE")]
    pub max_file_size: Option<u64>,

    /// Ignore links first seen before this day (YYYY-MM-DD, UTC)
    #[arg(long = "start-date", env = "START_DATE")]
    pub start_date: Option<NaiveDate>,

    /// Download records file
    #[arg(long = "data-file", env = "DATA_FILE")]
    pub data_file: Option<PathBuf>,

    /// Known links file
    #[arg(long = "known-links-file", env = "KNOWN_LINKS_FILE")]
    pub known_links_file: Option<PathBuf>,

    /// Cycle lock file
    #[arg(long = "lock-file", env = "LOCK_FILE")]
    pub lock_file: Option<PathBuf>,

    /// Append logs to this file as well as stderr
    #[arg(long = "log-file", env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Comma separated keywords
    #[arg(long, env = "KEYWORDS", value_delimiter = ',')]
    pub keywords: Option<Vec<String>>,

    /// Comma separated video hosts as domain=platform
    #[arg(long = "host-patterns", env = "HOST_PATTERNS", value_delimiter = ',')]
    pub host_patterns: Option<Vec<HostPattern>>,

    /// Path to the yt-dlp binary
    #[arg(long = "ytdlp-path", env = "YTDLP_PATH")]
    pub ytdlp_path: Option<PathBuf>,
}

impl Cli {
    /// Build the configuration: file (or defaults), then overrides
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::config("config", format!("cannot read {}: {}", path.display(), e))
                })?;
                serde_json::from_str(&content).map_err(|e| {
                    Error::config("config", format!("invalid {}: {}", path.display(), e))
                })?
            }
            None => Config::default(),
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut Config) {
        if let Some(url) = &self.website_url {
            config.target_url = url.clone();
        }
        if let Some(dir) = &self.download_path {
            config.download_dir = dir.clone();
        }
        if let Some(days) = self.retention_days {
            config.retention_days = days;
        }
        if let Some(secs) = self.max_download_time {
            config.max_download_time = Duration::from_secs(secs);
        }
        if let Some(bytes) = self.max_file_size {
            config.max_file_size_bytes = bytes;
        }
        if self.start_date.is_some() {
            config.start_date_cutoff = self.start_date;
        }
        if let Some(path) = &self.data_file {
            config.persistence.downloads_path = path.clone();
        }
        if let Some(path) = &self.known_links_file {
            config.persistence.known_links_path = path.clone();
        }
        if let Some(path) = &self.lock_file {
            config.persistence.lock_path = path.clone();
        }
        if self.log_file.is_some() {
            config.log_file = self.log_file.clone();
        }
        if let Some(keywords) = &self.keywords {
            config.keywords = keywords
                .iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
        if let Some(patterns) = &self.host_patterns {
            config.host_patterns = patterns.clone();
        }
        if self.ytdlp_path.is_some() {
            config.transfer.ytdlp_path = self.ytdlp_path.clone();
        }
    }
}
