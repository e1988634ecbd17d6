use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "vocab-sync.log";

/// Keeps the non-blocking file writer flushing until dropped.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// Stdout logging, plus a daily-rotated file in `log_dir` when given.
pub fn init_tracing(log_level: &str, log_dir: Option<&Path>) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(true);

    let file_setup = log_dir.map(|dir| std::fs::create_dir_all(dir).map(|()| dir));
    match file_setup {
        Some(Ok(dir)) => {
            let (file_writer, guard) =
                tracing_appender::non_blocking(RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(fmt::layer().with_writer(file_writer).with_ansi(false).with_target(true))
                .init();
            tracing::debug!(log_dir = %dir.display(), "file logging enabled");
            Some(FileLogGuard { _guard: guard })
        }
        Some(Err(err)) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .init();
            tracing::warn!(error = %err, "log directory unavailable, logging to stdout only");
            None
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .init();
            None
        }
    }
}
