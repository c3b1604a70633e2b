//! Durable known-link and download-record state
//!
//! Two independent JSON files back the store:
//! - known links: `url -> { first_seen_at, last_failure? }`
//! - downloads: `url -> { file_path, size_bytes, downloaded_at, status, reason? }`
//!
//! Every mutation is written to a temporary file in the target directory,
//! fsynced and atomically renamed over the persisted file before the call
//! returns. The in-memory maps are only replaced once the write succeeded.
//! Retention removes download records only, so a retired URL stays known.

use crate::config::PersistenceConfig;
use crate::error::StateError;
use crate::types::{DownloadRecord, DownloadStatus, KnownLinkRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A persisted state file could not be parsed and was reset to empty
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StateCorruptionWarning {
    /// The corrupt state file
    pub path: PathBuf,
    /// Parser message
    pub reason: String,
    /// Where the unreadable content was moved, if the move succeeded
    pub preserved_as: Option<PathBuf>,
}

impl std::fmt::Display for StateCorruptionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "state file {} was corrupt ({}); continuing with empty state",
            self.path.display(),
            self.reason
        )?;
        if let Some(preserved) = &self.preserved_as {
            write!(f, ", original kept at {}", preserved.display())?;
        }
        Ok(())
    }
}

/// Records which URLs have been seen and which were downloaded
#[derive(Debug)]
pub struct StateStore {
    known_path: PathBuf,
    downloads_path: PathBuf,
    known: BTreeMap<String, KnownLinkRecord>,
    downloads: BTreeMap<String, DownloadRecord>,
    warnings: Vec<StateCorruptionWarning>,
}

impl StateStore {
    /// Load the store from the configured state files
    pub fn open(config: &PersistenceConfig) -> Result<Self, StateError> {
        Self::open_paths(&config.known_links_path, &config.downloads_path)
    }

    /// Load the store from explicit file paths
    ///
    /// Missing files are empty state. Corrupt files are moved aside, reported
    /// through [`warnings`](Self::warnings), and treated as empty state.
    pub fn open_paths(
        known_path: impl Into<PathBuf>,
        downloads_path: impl Into<PathBuf>,
    ) -> Result<Self, StateError> {
        let known_path = known_path.into();
        let downloads_path = downloads_path.into();
        let mut warnings = Vec::new();

        let (mut known, warning) = load_map::<KnownLinkRecord>(&known_path)?;
        warnings.extend(warning);
        for (url, record) in known.iter_mut() {
            record.url = url.clone();
        }

        let (mut downloads, warning) = load_map::<DownloadRecord>(&downloads_path)?;
        warnings.extend(warning);
        for (url, record) in downloads.iter_mut() {
            record.url = url.clone();
        }

        debug!(
            known = known.len(),
            downloads = downloads.len(),
            "state loaded"
        );

        Ok(Self {
            known_path,
            downloads_path,
            known,
            downloads,
            warnings,
        })
    }

    /// Corruption warnings raised while loading
    pub fn warnings(&self) -> &[StateCorruptionWarning] {
        &self.warnings
    }

    /// Whether `url` has ever been observed
    pub fn is_known(&self, url: &str) -> bool {
        self.known.contains_key(url)
    }

    /// Whether `url` has a completed download record
    pub fn is_downloaded(&self, url: &str) -> bool {
        self.downloads
            .get(url)
            .is_some_and(|r| r.status == DownloadStatus::Completed)
    }

    /// Known-link record for `url`
    pub fn known_link(&self, url: &str) -> Option<&KnownLinkRecord> {
        self.known.get(url)
    }

    /// Download record for `url`
    pub fn download_record(&self, url: &str) -> Option<&DownloadRecord> {
        self.downloads.get(url)
    }

    /// Number of known links
    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    /// Number of download records
    pub fn download_count(&self) -> usize {
        self.downloads.len()
    }

    /// Whether any download record claims `path`
    pub fn path_in_use(&self, path: &Path) -> bool {
        self.downloads.values().any(|r| r.file_path == path)
    }

    /// Mark `url` as known
    ///
    /// Returns `Ok(false)` without writing when the URL was already known;
    /// the original `first_seen_at` is kept.
    pub fn record_known(
        &mut self,
        url: &str,
        first_seen_at: DateTime<Utc>,
    ) -> Result<bool, StateError> {
        if self.is_known(url) {
            return Ok(false);
        }
        let mut next = self.known.clone();
        next.insert(
            url.to_string(),
            KnownLinkRecord {
                url: url.to_string(),
                first_seen_at,
                last_failure: None,
            },
        );
        write_atomic(&self.known_path, &next)?;
        self.known = next;
        Ok(true)
    }

    /// Store the result of a terminal download attempt
    ///
    /// A completed record's file must exist and no other record may hold the
    /// same file path. The URL becomes known if it was not already.
    pub fn record_download(&mut self, record: DownloadRecord) -> Result<(), StateError> {
        if record.status == DownloadStatus::Completed && !record.file_path.is_file() {
            return Err(StateError::InvalidRecord(format!(
                "completed download {} has no file at {}",
                record.url,
                record.file_path.display()
            )));
        }
        if let Some(other) = self
            .downloads
            .values()
            .find(|r| r.file_path == record.file_path && r.url != record.url)
        {
            return Err(StateError::InvalidRecord(format!(
                "{} is already recorded for {}",
                record.file_path.display(),
                other.url
            )));
        }

        self.record_known(&record.url, record.downloaded_at)?;

        let mut next = self.downloads.clone();
        next.insert(record.url.clone(), record);
        write_atomic(&self.downloads_path, &next)?;
        self.downloads = next;
        Ok(())
    }

    /// Record a terminal failure for `url`
    ///
    /// The URL becomes (or stays) known with `reason` as its last failure, and
    /// a failed download record is written for `attempted_path`. The URL is
    /// never reported as downloaded.
    pub fn record_failure(
        &mut self,
        url: &str,
        attempted_path: &Path,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let mut known = self.known.clone();
        known
            .entry(url.to_string())
            .or_insert_with(|| KnownLinkRecord {
                url: url.to_string(),
                first_seen_at: at,
                last_failure: None,
            })
            .last_failure = Some(reason.to_string());
        write_atomic(&self.known_path, &known)?;
        self.known = known;

        self.record_download(DownloadRecord {
            url: url.to_string(),
            file_path: attempted_path.to_path_buf(),
            size_bytes: 0,
            downloaded_at: at,
            status: DownloadStatus::Failed,
            reason: Some(reason.to_string()),
        })
    }

    /// Download records with `downloaded_at <= cutoff`
    pub fn list_expired_downloads(&self, cutoff: DateTime<Utc>) -> Vec<DownloadRecord> {
        self.downloads
            .values()
            .filter(|r| r.downloaded_at <= cutoff)
            .cloned()
            .collect()
    }

    /// Remove the download record for `url`, keeping it known
    pub fn remove_download_record(
        &mut self,
        url: &str,
    ) -> Result<Option<DownloadRecord>, StateError> {
        if !self.downloads.contains_key(url) {
            return Ok(None);
        }
        let mut next = self.downloads.clone();
        let removed = next.remove(url);
        write_atomic(&self.downloads_path, &next)?;
        self.downloads = next;
        Ok(removed)
    }
}

/// Load a `url -> record` map, treating corruption as empty state
fn load_map<T: DeserializeOwned>(
    path: &Path,
) -> Result<(BTreeMap<String, T>, Option<StateCorruptionWarning>), StateError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "state file missing, starting empty");
            return Ok((BTreeMap::new(), None));
        }
        // Undecodable bytes are corruption, not an I/O failure
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            return Ok((BTreeMap::new(), Some(quarantine(path, e.to_string()))));
        }
        Err(source) => {
            return Err(StateError::ReadFailure {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    match serde_json::from_str(&content) {
        Ok(map) => Ok((map, None)),
        Err(e) => Ok((BTreeMap::new(), Some(quarantine(path, e.to_string())))),
    }
}

/// Move a corrupt state file aside and describe what happened
fn quarantine(path: &Path, reason: String) -> StateCorruptionWarning {
    let mut preserved = path.as_os_str().to_owned();
    preserved.push(format!(".corrupt-{}", Utc::now().timestamp()));
    let preserved = PathBuf::from(preserved);

    let preserved_as = match std::fs::rename(path, &preserved) {
        Ok(()) => Some(preserved),
        Err(e) => {
            warn!(?path, error = %e, "could not move corrupt state file aside");
            None
        }
    };

    let warning = StateCorruptionWarning {
        path: path.to_path_buf(),
        reason,
        preserved_as,
    };
    warn!(?path, reason = %warning.reason, preserved_as = ?warning.preserved_as, "state file corrupt, reset to empty");
    warning
}

/// Durably replace `path` with the JSON encoding of `value`
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    let fail = |source: std::io::Error| StateError::WriteFailure {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(fail)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".state-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(fail)?;
    serde_json::to_writer_pretty(tmp.as_file_mut(), value)
        .map_err(|e| fail(std::io::Error::from(e)))?;
    tmp.as_file_mut().write_all(b"\n").map_err(fail)?;
    tmp.as_file().sync_all().map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;

    sync_dir(dir);
    Ok(())
}

/// Flush the directory entry of a rename so it survives power loss
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Err(e) = std::fs::File::open(dir).and_then(|d| d.sync_all()) {
        debug!(?dir, error = %e, "directory fsync failed");
    }
    #[cfg(not(unix))]
    let _ = dir;
}
