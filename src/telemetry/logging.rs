//! Subscriber setup
//!
//! One registry carries up to four layers: the level filter, the debug
//! console mirror, a terminal formatter (compact or JSON) and a daily log
//! file.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*, Layer};

use super::console::{DebugConsole, DebugConsoleLayer};

pub use tracing_appender::non_blocking::WorkerGuard as LogGuard;

const FILTER_ENV: &str = "SMART_CAMERA_LOG";
const FORMAT_ENV: &str = "SMART_CAMERA_LOG_FORMAT";
const LOG_FILE_PREFIX: &str = "smart-camera.log";

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Write to stderr
    pub console_enabled: bool,
    pub file_enabled: bool,
    /// Directory for rotated log files. Defaults to [`default_log_dir`].
    pub log_dir: Option<PathBuf>,
    pub json_format: bool,
    /// Filter used when neither `SMART_CAMERA_LOG` nor `RUST_LOG` is set
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enabled: true,
            file_enabled: false,
            log_dir: None,
            json_format: false,
            default_level: "info".to_string(),
        }
    }
}

/// `<data_local_dir>/SmartCamera/logs`, or `./logs` without a data dir
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("SmartCamera").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Directive string to filter with: the first of `overrides` that is set
/// and non-empty, else `default`.
fn filter_directives(overrides: &[Option<String>], default: &str) -> String {
    overrides
        .iter()
        .flatten()
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn wants_json(format_env: Option<&str>, configured: bool) -> bool {
    match format_env {
        Some(value) => value.trim().eq_ignore_ascii_case("json"),
        None => configured,
    }
}

/// Install the global subscriber. Keep the returned guard alive until exit
/// so the file writer flushes. Events from this crate are mirrored into
/// `console` when one is given.
pub fn init_logging(
    config: &LogConfig,
    console: Option<DebugConsole>,
) -> Result<Option<LogGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let directives = filter_directives(
        &[std::env::var(FILTER_ENV).ok(), std::env::var("RUST_LOG").ok()],
        &config.default_level,
    );
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("Ignoring log filter {:?}: {}", directives, e);
        EnvFilter::new(&config.default_level)
    });
    let json = wants_json(std::env::var(FORMAT_ENV).ok().as_deref(), config.json_format);

    let terminal = config.console_enabled.then(|| {
        if json {
            fmt::layer()
                .json()
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed()
        } else {
            fmt::layer().compact().with_target(true).boxed()
        }
    });

    let mut guard: Option<WorkerGuard> = None;
    let mut log_dir = None;
    let file = if config.file_enabled {
        let dir = config.log_dir.clone().unwrap_or_else(default_log_dir);
        std::fs::create_dir_all(&dir)?;
        let (writer, file_guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX));
        guard = Some(file_guard);
        log_dir = Some(dir);
        Some(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console.map(DebugConsoleLayer::new))
        .with(terminal)
        .with(file)
        .try_init()?;

    tracing::info!(
        target: "smart_camera",
        version = env!("CARGO_PKG_VERSION"),
        filter = %directives,
        json,
        "Logging initialized"
    );
    if let Some(dir) = log_dir {
        tracing::info!(target: "smart_camera", "Writing logs to {}", dir.display());
    }

    Ok(guard)
}
