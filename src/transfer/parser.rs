//! yt-dlp output classification

use crate::error::DownloadError;
use regex::Regex;
use std::sync::OnceLock;

/// Markers of failures that another attempt cannot fix
const UNSUPPORTED_MARKERS: &[&str] = &[
    "unsupported url",
    "requested format is not available",
    "no video formats found",
    "unable to extract",
    "private video",
    "video unavailable",
    "this video is unavailable",
    "has been removed",
    "http error 404",
    "http error 410",
];

/// Marker yt-dlp prints when `--max-filesize` rejects a file
const MAX_FILESIZE_MARKER: &str = "larger than max-filesize";

fn filesize_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\((\d+) bytes > (\d+) bytes\)").ok())
        .as_ref()
}

/// Whether the output reports a file rejected by `--max-filesize`
pub(crate) fn exceeded_max_filesize(output: &str) -> bool {
    output.to_ascii_lowercase().contains(MAX_FILESIZE_MARKER)
}

/// Classify a failed yt-dlp run from its combined output
///
/// Size rejections become [`DownloadError::SizeExceeded`], failures listed in
/// the unsupported markers become [`DownloadError::UnsupportedFormat`], and
/// everything else is a transient [`DownloadError::Network`] failure.
pub fn classify_failure(output: &str, max_bytes: u64) -> DownloadError {
    if exceeded_max_filesize(output) {
        let observed = filesize_pattern()
            .and_then(|re| re.captures(output))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(max_bytes.saturating_add(1));
        return DownloadError::SizeExceeded {
            limit: max_bytes,
            observed,
        };
    }

    let message = summary_line(output);
    let lowered = output.to_ascii_lowercase();
    if UNSUPPORTED_MARKERS.iter().any(|m| lowered.contains(m)) {
        DownloadError::UnsupportedFormat(message)
    } else {
        DownloadError::Network(message)
    }
}

/// The most informative line of the output: the last `ERROR:` line, or the last line
fn summary_line(output: &str) -> String {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .map(|l| l.to_string())
        .unwrap_or_else(|| "yt-dlp failed without output".to_string())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_url_is_permanent() {
        let output = "[generic] Extracting URL: https://example.com\n\
                      ERROR: Unsupported URL: https://example.com/page";
        match classify_failure(output, 100) {
            DownloadError::UnsupportedFormat(message) => {
                assert_eq!(message, "ERROR: Unsupported URL: https://example.com/page")
            }
            other => panic!("expected unsupported format, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_format_is_permanent() {
        let output = "ERROR: [youtube] abc: Requested format is not available. Use --list-formats";
        assert!(matches!(
            classify_failure(output, 100),
            DownloadError::UnsupportedFormat(_)
        ));
    }

    #[test]
    fn test_connection_failures_are_transient() {
        let output = "ERROR: unable to download video data: <urlopen error [Errno 104] Connection reset by peer>";
        assert!(matches!(
            classify_failure(output, 100),
            DownloadError::Network(_)
        ));
    }

    #[test]
    fn test_max_filesize_rejection() {
        let output = "[download] File is larger than max-filesize (5242880 bytes > 1048576 bytes). Aborting.";
        assert!(exceeded_max_filesize(output));
        match classify_failure(output, 1_048_576) {
            DownloadError::SizeExceeded { limit, observed } => {
                assert_eq!(limit, 1_048_576);
                assert_eq!(observed, 5_242_880);
            }
            other => panic!("expected size exceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_output_still_has_message() {
        match classify_failure("", 1) {
            DownloadError::Network(message) => assert!(!message.is_empty()),
            other => panic!("expected network failure, got {other:?}"),
        }
    }
}
