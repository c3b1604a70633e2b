//! Configuration types for replay-dl
//!
//! [`Config`] is built once at process start (see the binary's `cli` module)
//! and passed by reference into every component. Nothing reads ambient
//! global state after that point.

use crate::error::{Error, Result};
use crate::types::HostPlatform;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Main configuration for one pipeline cycle
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Listing page to scan for new videos
    #[serde(default = "default_target_url")]
    pub target_url: String,

    /// Directory completed videos are written to (default: "downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Completed downloads older than this many days are retired (default: 7)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Hard wall-clock limit for one transfer attempt (default: 4 hours)
    #[serde(default = "default_max_download_time", with = "duration_serde")]
    pub max_download_time: Duration,

    /// Size ceiling for one video in bytes (default: 15 GiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,

    /// A finished transfer smaller than this is treated as incomplete (default: 10 MiB)
    #[serde(default = "default_min_file_size")]
    pub min_file_size_bytes: u64,

    /// Links first seen before this day (UTC) are never downloaded
    #[serde(default)]
    pub start_date_cutoff: Option<NaiveDate>,

    /// Case-insensitive keywords; a link needs at least one in its context
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,

    /// Anchor texts that mark navigation links rather than videos
    #[serde(default = "default_exclude_phrases")]
    pub exclude_phrases: Vec<String>,

    /// Video hosts that qualify a URL as a candidate
    #[serde(default = "default_host_patterns")]
    pub host_patterns: Vec<HostPattern>,

    /// Partial transfer files older than this many hours are swept (default: 24)
    #[serde(default = "default_partial_max_age_hours")]
    pub partial_max_age_hours: u64,

    /// Log file appended to in addition to stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// State file locations
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Retry policy for transient transfer failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Listing page HTTP client settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// External transfer engine settings
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_url: default_target_url(),
            download_dir: default_download_dir(),
            retention_days: default_retention_days(),
            max_download_time: default_max_download_time(),
            max_file_size_bytes: default_max_file_size(),
            min_file_size_bytes: default_min_file_size(),
            start_date_cutoff: None,
            keywords: default_keywords(),
            exclude_phrases: default_exclude_phrases(),
            host_patterns: default_host_patterns(),
            partial_max_age_hours: default_partial_max_age_hours(),
            log_file: None,
            persistence: PersistenceConfig::default(),
            retry: RetryConfig::default(),
            fetch: FetchConfig::default(),
            transfer: TransferConfig::default(),
        }
    }
}

impl Config {
    /// Check the configuration for values no cycle can run with
    pub fn validate(&self) -> Result<()> {
        self.target()?;

        if self.retention_days == 0 {
            return Err(Error::config("retention_days", "must be at least 1"));
        }
        if self.max_download_time.is_zero() {
            return Err(Error::config("max_download_time", "must be greater than 0"));
        }
        if self.max_file_size_bytes == 0 {
            return Err(Error::config("max_file_size_bytes", "must be greater than 0"));
        }
        if self.min_file_size_bytes > self.max_file_size_bytes {
            return Err(Error::config(
                "min_file_size_bytes",
                "must not exceed max_file_size_bytes",
            ));
        }
        if self.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(Error::config("keywords", "at least one keyword is required"));
        }
        if self.host_patterns.is_empty() {
            return Err(Error::config(
                "host_patterns",
                "at least one host pattern is required",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts", "must be at least 1"));
        }
        Ok(())
    }

    /// Parsed listing page URL
    pub fn target(&self) -> Result<Url> {
        let url = Url::parse(&self.target_url)
            .map_err(|e| Error::config("target_url", format!("{}: {}", self.target_url, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(Error::config(
                "target_url",
                format!("unsupported scheme {other}"),
            )),
        }
    }

    /// Start of the cutoff day in UTC, if a cutoff is configured
    pub fn cutoff_instant(&self) -> Option<DateTime<Utc>> {
        self.start_date_cutoff
            .and_then(|day| day.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }

    /// Retention window as a chrono duration
    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

/// A host that serves videos, and the platform it maps to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPattern {
    /// Domain, matched exactly or as a parent of the URL host (e.g. "ok.ru")
    pub domain: String,
    /// Platform used for format policy selection
    pub platform: HostPlatform,
}

impl HostPattern {
    /// Create a pattern for `domain`
    pub fn new(domain: impl Into<String>, platform: HostPlatform) -> Self {
        Self {
            domain: domain.into().to_ascii_lowercase(),
            platform,
        }
    }

    /// Whether `host` is this domain or one of its subdomains
    pub fn matches(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let domain = self.domain.to_ascii_lowercase();
        let domain = domain.as_str();
        host == domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}

impl std::str::FromStr for HostPattern {
    type Err = String;

    /// Parse `domain=platform`, or a bare domain mapped to [`HostPlatform::Other`]
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (domain, platform) = match s.split_once('=') {
            Some((domain, platform)) => (domain, platform.parse()?),
            None => (s, HostPlatform::Other),
        };
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(format!("empty domain in host pattern {s:?}"));
        }
        Ok(Self::new(domain, platform))
    }
}

/// State file locations
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Known links file (default: "state/known_links.json")
    #[serde(default = "default_known_links_path")]
    pub known_links_path: PathBuf,

    /// Download records file (default: "state/downloads.json")
    #[serde(default = "default_downloads_path")]
    pub downloads_path: PathBuf,

    /// Cycle lock file (default: "state/replay-dl.lock")
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            known_links_path: default_known_links_path(),
            downloads_path: default_downloads_path(),
            lock_path: default_lock_path(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 5 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Listing page HTTP client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Request timeout (default: 30 seconds)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Hosts whose broken TLS certificates are tolerated
    #[serde(default = "default_insecure_hosts")]
    pub insecure_hosts: Vec<String>,

    /// User agents rotated per request
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_fetch_timeout(),
            insecure_hosts: default_insecure_hosts(),
            user_agents: default_user_agents(),
        }
    }
}

/// External transfer engine settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Path to yt-dlp (auto-detected from PATH if None)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Socket timeout handed to the engine (default: 30 seconds)
    #[serde(default = "default_socket_timeout", with = "duration_serde")]
    pub socket_timeout: Duration,

    /// Fragment retries inside the engine (default: 10)
    #[serde(default = "default_fragment_retries")]
    pub fragment_retries: u32,

    /// How often the partial file size is checked against the ceiling (default: 1 second)
    #[serde(default = "default_size_poll_interval", with = "duration_serde")]
    pub size_poll_interval: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            socket_timeout: default_socket_timeout(),
            fragment_retries: default_fragment_retries(),
            size_poll_interval: default_size_poll_interval(),
        }
    }
}

// Default value functions
fn default_target_url() -> String {
    "https://basketballreplays.net".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_retention_days() -> u32 {
    7
}

fn default_max_download_time() -> Duration {
    Duration::from_secs(4 * 60 * 60)
}

fn default_max_file_size() -> u64 {
    15 * 1024 * 1024 * 1024
}

fn default_min_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_partial_max_age_hours() -> u64 {
    24
}

pub(crate) fn default_keywords() -> Vec<String> {
    [
        "vs",
        "v.",
        "game",
        "replay",
        "nba",
        "basketball",
        "football",
        "soccer",
        "hockey",
        "baseball",
        "highlights",
        "final",
        "match",
        "championship",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_exclude_phrases() -> Vec<String> {
    [
        "read more",
        "continue reading",
        "home",
        "about",
        "contact",
        "privacy",
        "terms",
        "subscribe",
        "follow",
        "share",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub(crate) fn default_host_patterns() -> Vec<HostPattern> {
    vec![
        HostPattern::new("ok.ru", HostPlatform::OkRu),
        HostPattern::new("youtube.com", HostPlatform::YouTube),
        HostPattern::new("youtu.be", HostPlatform::YouTube),
        HostPattern::new("vimeo.com", HostPlatform::Vimeo),
        HostPattern::new("dailymotion.com", HostPlatform::Dailymotion),
        HostPattern::new("streamable.com", HostPlatform::Streamable),
    ]
}

fn default_known_links_path() -> PathBuf {
    PathBuf::from("state/known_links.json")
}

fn default_downloads_path() -> PathBuf {
    PathBuf::from("state/downloads.json")
}

fn default_lock_path() -> PathBuf {
    PathBuf::from("state/replay-dl.lock")
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_insecure_hosts() -> Vec<String> {
    vec!["basketballreplays.net".to_string()]
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_socket_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_fragment_retries() -> u32 {
    10
}

fn default_size_poll_interval() -> Duration {
    Duration::from_secs(1)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
