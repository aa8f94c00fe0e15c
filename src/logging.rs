use std::path::PathBuf;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const ENV_LOG_FILTER: &str = "LISTING_DESK_LOG";
pub const ENV_LOG_FORMAT: &str = "LISTING_DESK_LOG_FORMAT";
pub const ENV_LOG_DIR: &str = "LISTING_DESK_LOG_DIR";

const DEFAULT_FILTER: &str = "listing_desk=info";
const LOG_FILE_PREFIX: &str = "listing-desk.log";

/// Keeps the file sink flushing; drop it only at process exit.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(ENV_LOG_FILTER).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn json_requested() -> bool {
    std::env::var(ENV_LOG_FORMAT)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

fn log_dir() -> Option<PathBuf> {
    std::env::var_os(ENV_LOG_DIR)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
}

/// Install the global subscriber: stderr output plus an optional daily
/// rolling JSON file under `LISTING_DESK_LOG_DIR`.
pub fn init() -> anyhow::Result<LoggingGuard> {
    let stderr_layer = if json_requested() {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(env_filter())
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(env_filter())
            .boxed()
    };

    let (file_layer, file_guard) = match log_dir() {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(env_filter())
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;

    Ok(LoggingGuard { _file: file_guard })
}
