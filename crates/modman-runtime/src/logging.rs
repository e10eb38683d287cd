//! `tracing`-backed logger.

use std::error::Error;

use modman_kernel::{LogLevel, ModuleLogger};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Forwards [`ModuleLogger`] calls to `tracing` under the `modman` target.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    source: String,
}

impl TracingLogger {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new("modman")
    }
}

impl ModuleLogger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, cause: Option<&(dyn Error + 'static)>) {
        let source = self.source.as_str();
        match (level, cause) {
            (LogLevel::Info, None) => info!(target: "modman", source, "{message}"),
            (LogLevel::Info, Some(c)) => info!(target: "modman", source, cause = %c, "{message}"),
            (LogLevel::Warning, None) => warn!(target: "modman", source, "{message}"),
            (LogLevel::Warning, Some(c)) => {
                warn!(target: "modman", source, cause = %c, "{message}")
            }
            (LogLevel::Severe, None) => error!(target: "modman", source, "{message}"),
            (LogLevel::Severe, Some(c)) => {
                error!(target: "modman", source, cause = %c, "{message}")
            }
        }
    }
}

/// Install a global `fmt` subscriber. `RUST_LOG` wins over `verbose`.
///
/// Does nothing if a subscriber is already installed.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_without_subscriber_is_harmless() {
        init_tracing(false);
        let logger = TracingLogger::new("test");
        let cause = std::io::Error::other("disk gone");
        logger.info("hello");
        logger.warning_with_cause("careful", &cause);
        logger.severe("broken");
        assert_eq!(logger.source(), "test");
    }
}
