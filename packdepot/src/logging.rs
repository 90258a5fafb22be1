//! Logging setup for hosts embedding the pack manager.
//!
//! The library only emits `tracing` events. Applications that do not install
//! their own subscriber can call [`init`] once at startup.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Default filter directive when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "packdepot=info";

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Directory for daily-rolling log files. Logs go to stderr when unset.
    pub directory: Option<PathBuf>,

    /// Filter directive used when `RUST_LOG` is unset.
    pub directive: Option<String>,
}

impl LogConfig {
    /// Log to daily-rolling files in `directory`.
    pub fn to_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Some(directory.into()),
            directive: None,
        }
    }

    /// Override the default filter directive.
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = Some(directive.into());
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(self.directive.as_deref().unwrap_or(DEFAULT_DIRECTIVE))
        })
    }
}

/// Install a global `tracing` subscriber.
///
/// Returns the appender guard when logging to files; keep it alive for the
/// lifetime of the process or buffered lines are lost. Calling this twice is
/// harmless: the second subscriber is rejected and `None` is returned.
pub fn init(config: &LogConfig) -> Option<WorkerGuard> {
    let filter = config.filter();

    match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "packdepot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .ok()
                .map(|_| guard)
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
            None
        }
    }
}
