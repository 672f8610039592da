//! Log setup: console, a main log file and a requests log file
//!
//! The requests file only receives events on the `tftp::requests` target;
//! every event also reaches the console and the main file.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tftp::REQUEST_LOG_TARGET;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub const DEFAULT_MAIN_LOG: &str = "tftpd.log";
pub const DEFAULT_REQUESTS_LOG: &str = "tftpd_requests.log";

/// Where log files go; `None` disables that file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub main_log: Option<PathBuf>,
    pub requests_log: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            main_log: Some(PathBuf::from(DEFAULT_MAIN_LOG)),
            requests_log: Some(PathBuf::from(DEFAULT_REQUESTS_LOG)),
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Create (or truncate) a log file
fn open_log_file(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Build the subscriber without installing it
///
/// The returned guards flush the files when dropped and must be kept alive
/// for as long as logging is needed.
fn build_subscriber(config: &LogConfig) -> Result<(impl tracing::Subscriber + Send + Sync + 'static, Vec<WorkerGuard>)> {
    let mut guards = Vec::new();

    let main_layer = match &config.main_log {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(open_log_file(path)?);
            guards.push(guard);
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(env_filter()),
            )
        }
        None => None,
    };

    let requests_layer = match &config.requests_log {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(open_log_file(path)?);
            guards.push(guard);
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(writer)
                    .with_filter(Targets::new().with_target(REQUEST_LOG_TARGET, Level::INFO)),
            )
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(fmt::layer().with_filter(env_filter()))
        .with(main_layer)
        .with(requests_layer);

    Ok((subscriber, guards))
}

/// Install the global subscriber
pub fn init_logging(config: &LogConfig) -> Result<Vec<WorkerGuard>> {
    let (subscriber, guards) = build_subscriber(config)?;
    subscriber.try_init().context("Failed to install the log subscriber")?;
    Ok(guards)
}
