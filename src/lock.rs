//! Single-cycle advisory lock
//!
//! The lock is a file holding the owner's PID, created with `create_new`. An
//! existing lock whose owner is no longer alive, or whose content is not a
//! PID, is stale and taken over. The file is removed when the guard drops.

use crate::error::LockError;
use std::io::Write;
use std::path::{Path, PathBuf};

/// How many times acquisition races a concurrent stale-lock takeover
const ACQUIRE_ATTEMPTS: u32 = 3;

/// Guard for the running cycle; releases the lock on drop
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct CycleLock {
    path: PathBuf,
}

impl CycleLock {
    /// Acquire the lock at `path`
    ///
    /// Fails with [`LockError::AlreadyHeld`] when a live process owns it.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();
        let io_err = |source: std::io::Error| LockError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let pid = std::process::id();
        for _ in 0..ACQUIRE_ATTEMPTS {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    let written = writeln!(file, "{}", pid).and_then(|()| file.sync_all());
                    if let Err(e) = written {
                        let _ = std::fs::remove_file(&path);
                        return Err(io_err(e));
                    }
                    tracing::debug!(path = ?path, pid, "cycle lock acquired");
                    return Ok(Self { path: path.clone() });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match read_owner(&path) {
                        Some(owner) if owner != pid && process_alive(owner) => {
                            return Err(LockError::AlreadyHeld {
                                path: path.clone(),
                                pid: owner,
                            });
                        }
                        owner => {
                            tracing::warn!(path = ?path, owner = ?owner, "taking over stale cycle lock");
                            match std::fs::remove_file(&path) {
                                Ok(()) => {}
                                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                                Err(e) => return Err(io_err(e)),
                            }
                        }
                    }
                }
                Err(e) => return Err(io_err(e)),
            }
        }

        Err(io_err(std::io::Error::other(
            "lock file kept reappearing during stale takeover",
        )))
    }

    /// Path of the held lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CycleLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = ?self.path, "cycle lock released"),
            Err(e) => tracing::warn!(path = ?self.path, error = %e, "failed to release cycle lock"),
        }
    }
}

/// PID recorded in the lock file, if it holds one
fn read_owner(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether a process with `pid` exists
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs existence and permission checks only
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    // EPERM means the process exists but belongs to another user
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // Without a liveness probe every existing lock is treated as held
    true
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_writes_pid_and_releases_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state/replay-dl.lock");

        let lock = CycleLock::acquire(&path).unwrap();
        assert_eq!(read_owner(&path), Some(std::process::id()));
        assert_eq!(lock.path(), path);

        drop(lock);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_live_owner_blocks_acquisition() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replay-dl.lock");
        // PID 1 is always alive
        std::fs::write(&path, "1\n").unwrap();

        match CycleLock::acquire(&path) {
            Err(LockError::AlreadyHeld { pid, .. }) => assert_eq!(pid, 1),
            other => panic!("expected lock held, got {other:?}"),
        }
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_dead_owner_is_taken_over() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replay-dl.lock");

        // Reap a short-lived child so its PID is known to be dead
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();
        std::fs::write(&path, format!("{dead_pid}\n")).unwrap();

        let _lock = CycleLock::acquire(&path).unwrap();
        assert_eq!(read_owner(&path), Some(std::process::id()));
    }

    #[test]
    fn test_garbage_lock_is_stale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replay-dl.lock");
        std::fs::write(&path, "not a pid").unwrap();

        let _lock = CycleLock::acquire(&path).unwrap();
        assert_eq!(read_owner(&path), Some(std::process::id()));
    }

    #[test]
    fn test_second_acquire_in_same_process_takes_over_own_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replay-dl.lock");
        std::fs::write(&path, format!("{}\n", std::process::id())).unwrap();

        let _lock = CycleLock::acquire(&path).unwrap();
        assert!(path.exists());
    }
}
