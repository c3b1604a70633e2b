//! Age-based retirement of downloaded files
//!
//! Expired download records have their file deleted and their record removed.
//! The URL stays in the known-link set, so a retired video is never fetched
//! again.

use crate::error::{RetentionError, StateError};
use crate::state::StateStore;
use crate::utils::is_partial_name;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Result of one retention sweep
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RetentionSummary {
    /// Download records removed
    pub removed: usize,
    /// Removed records whose file was already gone
    pub missing: usize,
    /// Records kept because their file could not be deleted
    pub errors: usize,
}

/// Deletes downloads older than the retention window
#[derive(Clone, Copy, Debug, Default)]
pub struct RetentionManager;

impl RetentionManager {
    /// Create a retention manager
    pub fn new() -> Self {
        Self
    }

    /// Retire every download record with `downloaded_at <= now - retention_days`
    ///
    /// A file that is already missing is tolerated and its record is still
    /// removed. A file that cannot be deleted keeps its record so the next
    /// sweep tries again. Only a failure to persist the record removal is
    /// returned as an error.
    pub fn sweep(
        &self,
        store: &mut StateStore,
        now: DateTime<Utc>,
        retention_days: u32,
    ) -> Result<RetentionSummary, StateError> {
        let cutoff = now - chrono::Duration::days(i64::from(retention_days));
        let mut summary = RetentionSummary::default();

        for record in store.list_expired_downloads(cutoff) {
            match delete_file(&record.file_path) {
                Ok(()) => {
                    tracing::info!(url = %record.url, path = ?record.file_path, "retired expired download");
                }
                Err(RetentionError::FileMissing { path }) => {
                    tracing::info!(url = %record.url, path = ?path, "expired download already missing");
                    summary.missing += 1;
                }
                Err(e) => {
                    tracing::warn!(url = %record.url, error = %e, "failed to retire expired download");
                    summary.errors += 1;
                    continue;
                }
            }

            store.remove_download_record(&record.url)?;
            summary.removed += 1;
        }

        if summary.removed > 0 || summary.errors > 0 {
            tracing::info!(
                removed = summary.removed,
                missing = summary.missing,
                errors = summary.errors,
                "retention sweep complete"
            );
        }
        Ok(summary)
    }

    /// Remove partial transfer files in `dir` not modified for `max_age`
    ///
    /// Returns the number of files removed. An unreadable directory removes
    /// nothing.
    pub fn sweep_partials(&self, dir: &Path, now: SystemTime, max_age: Duration) -> usize {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };

        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name();
            if !name.to_str().is_some_and(is_partial_name) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            let path = entry.path();
            match delete_file(&path) {
                Ok(()) => {
                    tracing::info!(path = ?path, age_hours = age.as_secs() / 3600, "removed stale partial download");
                    removed += 1;
                }
                Err(RetentionError::FileMissing { .. }) => {}
                Err(e) => tracing::warn!(error = %e, "failed to remove stale partial download"),
            }
        }
        removed
    }
}

fn delete_file(path: &Path) -> Result<(), RetentionError> {
    std::fs::remove_file(path).map_err(|e| RetentionError::from_io(path.to_path_buf(), e))
}
