//! Logging and tracing configuration
//!
//! Logs go to stderr so that the human-readable run summary on stdout stays
//! clean. A run can also be mirrored to a log file for later inspection.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

/// Name of the log file inside the log directory
const LOG_FILE: &str = "qualifier.log";

/// Handle returned by [`init`]; dropping it flushes the file writer
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
    log_file: Option<PathBuf>,
}

impl LogGuard {
    /// Where the log file is written, when file logging is enabled
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
}

/// Initialize tracing for the CLI
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate (DEBUG with `verbose`), WARN for dependencies.
pub fn init(verbose: bool, to_file: bool) -> LogGuard {
    let default_directive = if verbose {
        "dss_qualifier=debug,warn"
    } else {
        "dss_qualifier=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    if to_file {
        if let Some(log_dir) = paths::log_dir() {
            if paths::ensure_dir(&log_dir).is_ok() {
                let appender = tracing_appender::rolling::never(&log_dir, LOG_FILE);
                let (writer, guard) = tracing_appender::non_blocking(appender);

                // File logging with full details
                let file_layer = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true);

                tracing_subscriber::registry()
                    .with(filter)
                    .with(file_layer)
                    .with(stderr_layer())
                    .init();

                return LogGuard {
                    _file_guard: Some(guard),
                    log_file: Some(log_dir.join(LOG_FILE)),
                };
            }
            eprintln!("Warning: Could not create log directory {}", log_dir.display());
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer())
        .init();

    LogGuard {
        _file_guard: None,
        log_file: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_reports_log_file() {
        let guard = LogGuard {
            _file_guard: None,
            log_file: Some(PathBuf::from("/var/log/dss-qualifier/qualifier.log")),
        };
        assert_eq!(
            guard.log_file(),
            Some(Path::new("/var/log/dss-qualifier/qualifier.log"))
        );
        let disabled = LogGuard {
            _file_guard: None,
            log_file: None,
        };
        assert!(disabled.log_file().is_none());
    }
}
