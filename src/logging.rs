//! Tracing subscriber setup for the binary
//!
//! Log level is controlled by the RUST_LOG environment variable (default:
//! info). Logs go to stderr, since stdout carries the JSON report, and are
//! appended to the configured log file when one is set.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global subscriber
pub fn init(log_file: Option<&Path>) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let mut file_error = None;
    let file_layer = log_file.and_then(|path| {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            file_error = Some((path.to_path_buf(), e));
            return None;
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false), // No ANSI colors in files
            ),
            Err(e) => {
                file_error = Some((path.to_path_buf(), e));
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .ok(); // Ignore error if already initialized

    if let Some((path, error)) = file_error {
        tracing::warn!(path = ?path, error = %error, "cannot open log file, logging to stderr only");
    }
}
