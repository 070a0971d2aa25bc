use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt};

use crate::config::LoggingSettings;

static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static ACTIVE_LOG_FILE: OnceCell<PathBuf> = OnceCell::new();
static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Log files kept in the log directory, newest first.
const MAX_LOG_FILES: usize = 10;

fn install_subscriber<S>(subscriber: S) -> Result<()>
where
    S: Subscriber + Send + Sync + 'static,
{
    if TRACING_INITIALIZED.get().is_some() {
        return Ok(());
    }

    subscriber::set_global_default(subscriber)?;
    let _ = TRACING_INITIALIZED.set(());
    Ok(())
}

fn default_filter(verbose: bool) -> EnvFilter {
    let default_level = if verbose {
        "crossroads=debug"
    } else {
        "crossroads=info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the stderr subscriber, plus a JSON log file when enabled.
pub fn init_tracing(verbose: bool, logging: &LoggingSettings) -> Result<()> {
    match build_file_layer(logging)? {
        Some((writer, guard, path)) => {
            let subscriber = tracing_subscriber::registry()
                .with(default_filter(verbose))
                .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_file(true)
                        .with_line_number(true)
                        .with_target(true)
                        .with_writer(writer)
                        .with_filter(LevelFilter::DEBUG),
                );
            let _ = LOG_GUARD.set(guard);
            let _ = ACTIVE_LOG_FILE.set(path);
            install_subscriber(subscriber)
        }
        None => {
            let subscriber = tracing_subscriber::registry()
                .with(default_filter(verbose))
                .with(fmt::layer().with_target(false).with_writer(std::io::stderr));
            install_subscriber(subscriber)
        }
    }
}

/// Log file written by this process, if file logging is on.
pub fn current_log_file() -> Option<&'static PathBuf> {
    ACTIVE_LOG_FILE.get()
}

fn build_file_layer(
    logging: &LoggingSettings,
) -> Result<Option<(NonBlocking, WorkerGuard, PathBuf)>> {
    if !logging.file_enabled {
        return Ok(None);
    }

    let directory = logging.resolve_directory()?;
    fs::create_dir_all(&directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

    let (file, path) = create_log_file(&directory)?;
    prune_old_logs(&directory, MAX_LOG_FILES, &path)?;

    let (writer, guard) = tracing_appender::non_blocking(file);
    Ok(Some((writer, guard, path)))
}

fn create_log_file(directory: &Path) -> Result<(fs::File, PathBuf)> {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let mut candidate = directory.join(format!("crossroads-{timestamp}.log.jsonl"));
    let mut counter = 0;
    while candidate.exists() {
        counter += 1;
        candidate = directory.join(format!("crossroads-{timestamp}-{counter}.log.jsonl"));
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&candidate)
        .with_context(|| format!("Failed to open log file {}", candidate.display()))?;
    Ok((file, candidate))
}

fn prune_old_logs(directory: &Path, max_files: usize, keep: &Path) -> Result<()> {
    if max_files == 0 {
        return Ok(());
    }
    let mut logs: Vec<PathBuf> = fs::read_dir(directory)
        .with_context(|| format!("Failed to list log directory {}", directory.display()))?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("crossroads-") && name.ends_with(".log.jsonl"))
        })
        .collect();
    // Timestamped names sort chronologically.
    logs.sort();
    logs.reverse();
    for stale in logs.into_iter().skip(max_files) {
        if stale == keep {
            continue;
        }
        fs::remove_file(&stale)
            .with_context(|| format!("Failed to prune log file {}", stale.display()))?;
    }
    Ok(())
}
