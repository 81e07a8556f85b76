use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "papertrade.log";

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(&config.level))
}

/// Configured directives, or `info` when they do not parse
fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Daily rolling appender under `dir`; errors instead of panicking when the
/// directory or today's file cannot be created.
fn file_appender(dir: &Path) -> Result<RollingFileAppender, String> {
    std::fs::create_dir_all(dir).map_err(|e| e.to_string())?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .build(dir)
        .map_err(|e| e.to_string())
}

/// Install the global subscriber: console (plain or JSON) plus an optional
/// daily rolling file under `config.dir`.
///
/// Keep the returned guard alive for as long as file logs should flush.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let console: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let mut guard = None;
    let file_layer = match config.dir.as_deref().map(|dir| (dir, file_appender(dir))) {
        Some((_, Ok(appender))) => {
            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            guard = Some(worker_guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true),
            )
        }
        Some((dir, Err(e))) => {
            eprintln!(
                "Warning: Could not open log file in {} ({}), file logging disabled",
                dir.display(),
                e
            );
            None
        }
        None => None,
    };

    let file_logging_enabled = file_layer.is_some();
    let installed = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .with(build_filter(config))
        .try_init()
        .is_ok();

    if installed && file_logging_enabled {
        if let Some(dir) = config.dir.as_ref() {
            eprintln!("Logging to: {}/{}", dir.display(), LOG_FILE_PREFIX);
        }
    }
    guard
}
