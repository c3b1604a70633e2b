//! replay-dl command line entrypoint
//!
//! Runs one cycle by default, or `--validate` / `--test-download <url>`.
//! The resulting report is printed to stdout as JSON.
//!
//! Exit codes: 0 success, 1 fatal cycle abort or failed check, 2 configuration
//! error, 3 another cycle holds the lock.

mod cli;
mod logging;

use clap::Parser;
use cli::Cli;
use replay_dl::{
    Config, HttpFetcher, Orchestrator, Result, TransferEngine, YtDlpEngine, test_download,
    validate,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("replay-dl: {e}");
            return ExitCode::from(e.exit_code());
        }
    };
    logging::init(config.log_file.as_deref());

    let cancel = CancellationToken::new();
    let signals = tokio::spawn(replay_dl::cancel_on_signal(cancel.clone()));

    let code = match run(&cli, config, cancel.clone()).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "replay-dl failed");
            e.exit_code()
        }
    };

    // The signal task exits once the token is cancelled
    cancel.cancel();
    let _ = signals.await;
    ExitCode::from(code)
}

async fn run(cli: &Cli, config: Config, cancel: CancellationToken) -> Result<u8> {
    if cli.validate {
        let fetcher = HttpFetcher::new(&config.fetch)?;
        // A missing binary is reported by the probe check
        let engine = YtDlpEngine::from_config(&config.transfer)
            .unwrap_or_else(|_| YtDlpEngine::new(PathBuf::from("yt-dlp"), &config.transfer));
        let report = validate(&config, &fetcher, &engine).await;
        print_json(&report)?;
        return Ok(if report.passed() { 0 } else { 1 });
    }

    config.validate()?;
    let engine: Arc<dyn TransferEngine> = Arc::new(YtDlpEngine::from_config(&config.transfer)?);

    if let Some(url) = &cli.test_download {
        let outcome = test_download(url, &config, engine, &cancel).await?;
        print_json(&outcome)?;
        return Ok(if outcome.is_completed() { 0 } else { 1 });
    }

    let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
    let report = Orchestrator::new(config, fetcher, engine, cancel)
        .run()
        .await?;
    print_json(&report)?;
    Ok(report.exit_code())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
