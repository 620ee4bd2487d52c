//! Logging for applications embedding the driver layer.
//!
//! Driver code only emits `tracing` events. [`init_logging`] is a
//! convenience for hosts that have no subscriber of their own: it writes
//! daily files under the data directory and mirrors them to stdout, or
//! logs to the terminal alone when stdout is interactive.
//!
//! `TUSK_LOG` overrides the filter, then `RUST_LOG`.

use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Where and how much to log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory for rolling log files
    pub log_dir: PathBuf,
    /// Log file name prefix; files are `<prefix>.<date>.log`
    pub file_prefix: String,
    /// Skip files and log to the terminal only
    pub console_only: bool,
    /// Most verbose level mirrored to stdout when also writing files
    pub console_level: Level,
    /// Filter directives used instead of the environment
    pub filter: Option<String>,
}

impl LogConfig {
    /// Files under `log_dir`; console only when stdout is a terminal.
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            file_prefix: "tusk_db".to_string(),
            console_only: atty::is(atty::Stream::Stdout),
            console_level: Level::INFO,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    pub fn console_only(mut self, console_only: bool) -> Self {
        self.console_only = console_only;
        self
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new(log_dir())
    }
}

/// Keeps the background file writer alive. Dropping it flushes.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _worker: Option<WorkerGuard>,
}

/// Install a global subscriber.
///
/// File setup failures fall back to the terminal. If a subscriber is
/// already installed it is left in place.
pub fn init_logging(config: LogConfig) -> LoggingGuard {
    let filter = env_filter(config.filter.as_deref());
    if config.console_only {
        init_console(filter);
        return LoggingGuard { _worker: None };
    }

    match init_files(&config, filter) {
        Ok(worker) => LoggingGuard { _worker: Some(worker) },
        Err(e) => {
            eprintln!("tusk_db: file logging unavailable ({e}), logging to stdout");
            init_console(env_filter(config.filter.as_deref()));
            LoggingGuard { _worker: None }
        }
    }
}

fn init_console(filter: EnvFilter) {
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

fn init_files(config: &LogConfig, filter: EnvFilter) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.log_dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .build(&config.log_dir)?;
    let (files, worker) = tracing_appender::non_blocking(appender);
    let writer = std::io::stdout.with_max_level(config.console_level).and(files);

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|e| e.to_string())?;

    Ok(worker)
}

/// Explicit directives, then `TUSK_LOG`, then `RUST_LOG`, then the build default.
/// Unparsable directives fall through to the default.
fn env_filter(directives: Option<&str>) -> EnvFilter {
    let fallback = || EnvFilter::new(default_log_filter());
    match directives {
        Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| fallback()),
        None => EnvFilter::try_from_env("TUSK_LOG")
            .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
            .unwrap_or_else(|_| fallback()),
    }
}

/// Default directives. Debug builds trace the driver layer; the
/// PostgreSQL client and pool stay at warn either way.
pub fn default_log_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "info,tusk_db=trace,tokio_postgres=warn,deadpool_postgres=warn"
    } else {
        "warn,tusk_db=info,tokio_postgres=warn,deadpool_postgres=warn"
    }
}

/// `<data dir>/logs`.
pub fn log_dir() -> PathBuf {
    crate::services::default_data_dir().join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_directives_fall_back() {
        let _ = env_filter(Some("tusk_db=[[[notalevel"));
        let _ = env_filter(Some("tusk_db=debug"));
    }

    #[test]
    fn test_default_filter_quiets_postgres_client() {
        assert!(default_log_filter().contains("tokio_postgres=warn"));
        assert!(default_log_filter().contains("tusk_db="));
    }

    #[test]
    fn test_config_builders() {
        let config = LogConfig::new(PathBuf::from("/tmp/tusk-logs"))
            .with_file_prefix("driver")
            .with_filter("tusk_db=debug")
            .console_only(true);
        assert_eq!(config.file_prefix, "driver");
        assert_eq!(config.filter.as_deref(), Some("tusk_db=debug"));
        assert!(config.console_only);
        assert!(log_dir().ends_with("logs"));
    }
}
