//! Logger capability handed to every component.

use std::error::Error;
use std::fmt;

/// Severity understood by [`ModuleLogger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Info,
    Warning,
    Severe,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Severe => "SEVERE",
        };
        f.write_str(label)
    }
}

/// Sink for operator-facing log lines.
///
/// Implementations must be safe to call from any thread.
pub trait ModuleLogger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, cause: Option<&(dyn Error + 'static)>);

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, None);
    }

    fn info_with_cause(&self, message: &str, cause: &(dyn Error + 'static)) {
        self.log(LogLevel::Info, message, Some(cause));
    }

    fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message, None);
    }

    fn warning_with_cause(&self, message: &str, cause: &(dyn Error + 'static)) {
        self.log(LogLevel::Warning, message, Some(cause));
    }

    fn severe(&self, message: &str) {
        self.log(LogLevel::Severe, message, None);
    }

    fn severe_with_cause(&self, message: &str, cause: &(dyn Error + 'static)) {
        self.log(LogLevel::Severe, message, Some(cause));
    }
}
