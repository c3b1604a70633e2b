//! Utility functions for file naming and partial-transfer bookkeeping

use std::path::{Path, PathBuf};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Maximum length of a sanitized file stem, in characters
const MAX_STEM_CHARS: usize = 200;

/// Extension every output file is written with
pub const VIDEO_EXTENSION: &str = "mp4";

/// Suffixes the transfer engine uses for in-progress files
pub const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp"];

/// Turn a link title into a filesystem-safe file name with the video extension
///
/// Removes `<>:"/\|?*` and control characters, collapses whitespace, trims
/// spaces and dots, and limits the stem to 200 characters. An empty result
/// falls back to `"video"`.
///
/// # Examples
///
/// ```
/// use replay_dl::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("Lakers vs. Celtics: Game 7"), "Lakers vs. Celtics Game 7.mp4");
/// assert_eq!(sanitize_filename("   "), "video.mp4");
/// ```
#[must_use]
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut stem: String = collapsed
        .trim_matches(|c| c == ' ' || c == '.')
        .chars()
        .take(MAX_STEM_CHARS)
        .collect();
    stem = stem.trim_end_matches([' ', '.']).to_string();

    let suffix = format!(".{VIDEO_EXTENSION}");
    if stem.is_empty() {
        return format!("video{suffix}");
    }
    if stem.to_ascii_lowercase().ends_with(&suffix) {
        stem
    } else {
        format!("{stem}{suffix}")
    }
}

/// Derive a title for a bare URL (used when no anchor text is known)
///
/// Uses the last non-empty path segment, falling back to the host.
pub fn title_from_url(url: &url::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(|s| s.to_string())
        .or_else(|| url.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| "video".to_string())
}

/// Get a path that neither exists on disk nor is claimed by `is_taken`
///
/// If `path` is free it is returned unchanged; otherwise ` (1)`, ` (2)`, ...
/// is appended to the stem until a free name is found.
///
/// # Examples
///
/// ```
/// use replay_dl::utils::unique_path;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/replay-dl-doc/game.mp4");
/// let unique = unique_path(path, |p| p == path).unwrap();
/// assert_eq!(unique, Path::new("/tmp/replay-dl-doc/game (1).mp4"));
/// ```
pub fn unique_path(path: &Path, is_taken: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    let free = |candidate: &Path| !candidate.exists() && !is_taken(candidate);
    if free(path) {
        return Some(path.to_path_buf());
    }

    let stem = path.file_stem().and_then(|s| s.to_str())?;
    let extension = path.extension().and_then(|e| e.to_str());
    let parent = path.parent()?;

    // Try adding (1), (2), (3), ... until we find a unique name
    (1..=MAX_RENAME_ATTEMPTS)
        .map(|i| {
            let name = match extension {
                Some(ext) => format!("{} ({}).{}", stem, i, ext),
                None => format!("{} ({})", stem, i),
            };
            parent.join(name)
        })
        .find(|candidate| free(candidate))
}

/// Whether a file name is an in-progress transfer artifact
pub fn is_partial_name(name: &str) -> bool {
    PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Find the in-progress artifacts belonging to `output`
///
/// Matches siblings named `<stem>.<anything><partial suffix>`, e.g.
/// `game.mp4.part`, `game.f137.mp4.part` or `game.mp4.ytdl` for `game.mp4`.
/// The output file itself is not included.
pub fn partial_artifacts(output: &Path) -> Vec<PathBuf> {
    let (Some(parent), Some(stem)) = (
        output.parent(),
        output.file_stem().and_then(|s| s.to_str()),
    ) else {
        return Vec::new();
    };

    let Ok(entries) = std::fs::read_dir(parent) else {
        return Vec::new();
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let same_stem = name
                .strip_prefix(stem)
                .is_some_and(|rest| rest.starts_with('.'));
            (same_stem && is_partial_name(&name)).then(|| entry.path())
        })
        .collect()
}

/// Size of the largest artifact of an in-progress transfer to `output`
///
/// Considers the output file and its partial artifacts; 0 when none exist.
pub fn transferred_bytes(output: &Path) -> u64 {
    std::iter::once(output.to_path_buf())
        .chain(partial_artifacts(output))
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .max()
        .unwrap_or(0)
}

/// Remove `output` and every partial artifact of it, returning how many files were deleted
pub fn remove_artifacts(output: &Path) -> usize {
    let mut removed = 0;
    for path in std::iter::once(output.to_path_buf()).chain(partial_artifacts(output)) {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(?path, "removed transfer artifact");
                removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(?path, error = %e, "failed to remove transfer artifact"),
        }
    }
    removed
}
