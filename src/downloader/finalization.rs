//! Post-transfer checks on the output file

use crate::error::DownloadError;
use std::path::Path;

/// Check a transfer that reported success actually produced a complete file
///
/// A missing file, or one smaller than `min_bytes`, is an incomplete transfer
/// and is reported as a transient failure. The undersized output is removed so
/// the next attempt does not mistake it for a finished download; partial
/// artifacts are left for resumption.
pub(super) async fn verify_output(
    path: &Path,
    min_bytes: u64,
    max_bytes: u64,
) -> Result<u64, DownloadError> {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) | Err(_) => {
            return Err(DownloadError::Network(format!(
                "transfer reported success but {} is missing",
                path.display()
            )));
        }
    };

    if size > max_bytes {
        return Err(DownloadError::SizeExceeded {
            limit: max_bytes,
            observed: size,
        });
    }

    if size < min_bytes {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = ?path, error = %e, "failed to remove incomplete output");
        }
        return Err(DownloadError::Network(format!(
            "incomplete transfer: {} bytes is below the {} byte minimum",
            size, min_bytes
        )));
    }

    Ok(size)
}

/// Make a completed file world-readable (0644)
#[cfg(unix)]
pub(super) async fn set_file_mode(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) =
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).await
    {
        tracing::warn!(path = ?path, error = %e, "failed to set file mode");
    }
}

#[cfg(not(unix))]
pub(super) async fn set_file_mode(_path: &Path) {}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_output_is_transient() {
        let dir = tempdir().unwrap();
        let result = verify_output(&dir.path().join("game.mp4"), 10, 100).await;
        assert!(matches!(result, Err(DownloadError::Network(_))));
    }

    #[tokio::test]
    async fn test_undersized_output_is_removed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("game.mp4");
        std::fs::write(&path, vec![0u8; 5]).unwrap();

        let result = verify_output(&path, 10, 100).await;
        assert!(matches!(result, Err(DownloadError::Network(_))));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_oversized_output_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("game.mp4");
        std::fs::write(&path, vec![0u8; 200]).unwrap();

        let result = verify_output(&path, 10, 100).await;
        assert!(matches!(
            result,
            Err(DownloadError::SizeExceeded {
                limit: 100,
                observed: 200
            })
        ));
    }

    #[tokio::test]
    async fn test_complete_output_reports_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("game.mp4");
        std::fs::write(&path, vec![0u8; 50]).unwrap();
        assert_eq!(verify_output(&path, 10, 100).await.unwrap(), 50);
    }
}
