use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

const LOG_FILE_PREFIX: &str = "progress-sync.log";

/// Keeps the non-blocking file writer alive. Dropping it flushes pending
/// lines and stops file logging.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// Installs the global subscriber: stderr always, plus a daily file under
/// `config.log_dir` when one is configured and can be created.
pub fn init_tracing(config: &Config) -> Option<FileLogGuard> {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the JSON report
    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(true);

    let (file, guard) = match config.log_dir.as_deref().and_then(daily_writer) {
        Some((writer, guard)) => (
            Some(fmt::layer().with_writer(writer).with_ansi(false).with_target(true)),
            Some(FileLogGuard { _guard: guard }),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .init();

    guard
}

fn daily_writer(dir: &Path) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    if let Err(err) = std::fs::create_dir_all(dir) {
        eprintln!("failed to create log directory {}: {err}", dir.display());
        return None;
    }
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    Some(tracing_appender::non_blocking(appender))
}
