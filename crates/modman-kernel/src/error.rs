//! Typed errors and result aliases shared by hosts and the reload engine.

use error_stack::Report;
use thiserror::Error;

/// Error-stack backed result alias for host primitives.
///
/// Equivalent to `Result<T, error_stack::Report<HostError>>`.
pub type HostResult<T> = ::std::result::Result<T, Report<HostError>>;

/// Extension trait to convert `Result<T, HostError>` into [`HostResult<T>`].
pub trait IntoHostReport<T> {
    /// Wrap the error in an `error_stack::Report`.
    fn into_report(self) -> HostResult<T>;
}

impl<T> IntoHostReport<T> for ::std::result::Result<T, HostError> {
    #[inline]
    fn into_report(self) -> HostResult<T> {
        self.map_err(Report::new)
    }
}

/// Errors surfaced by host primitives.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HostError {
    /// An internal host structure the teardown relies on could not be found.
    #[error("Host structure unavailable: {0}")]
    StructureUnavailable(String),

    /// The module is not known to the host.
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// A module with the same name is already loaded.
    #[error("Module already loaded: {0}")]
    AlreadyLoaded(String),

    #[error("Module not enabled: {0}")]
    NotEnabled(String),

    #[error("Module already enabled: {0}")]
    AlreadyEnabled(String),

    /// The package descriptor could not be read.
    #[error("Invalid module descriptor: {0}")]
    InvalidDescriptor(String),

    /// A hard dependency is not loaded.
    #[error("Module {module} is missing dependency {dependency}")]
    MissingDependency {
        /// Module being instantiated.
        module: String,
        /// Dependency that was not found.
        dependency: String,
    },

    /// No entry point could be resolved for the module.
    #[error("No entry point for module {module}: {reason}")]
    EntryNotFound {
        /// Module being instantiated.
        module: String,
        /// Why resolution failed.
        reason: String,
    },

    /// Module code returned an error from a lifecycle callback.
    #[error("Module {module} failed during {phase}: {message}")]
    Callback {
        /// Module whose callback failed.
        module: String,
        /// Lifecycle phase, e.g. `enable`.
        phase: &'static str,
        /// Error reported by the module.
        message: String,
    },

    /// Closing a code-loading context failed.
    #[error("Failed to close load context: {0}")]
    ContextClose(String),

    /// The code-loading context backing a command is closed.
    #[error("Load context closed: {0}")]
    ContextClosed(String),

    /// No command is registered under the label.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// An I/O failure inside the host.
    #[error("Host I/O error: {0}")]
    Io(String),
}

/// Errors reading a module descriptor from a package.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DescriptorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The package is not a readable archive. Usually a half-written or
    /// otherwise broken package.
    #[error("Broken package archive: {0}")]
    Archive(String),

    /// The package has no descriptor entry.
    #[error("Package has no descriptor: {0}")]
    Missing(String),

    /// The descriptor exists but could not be parsed or validated.
    #[error("Invalid descriptor: {0}")]
    Invalid(String),
}

/// Errors from the service registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// A required service was looked up before anything registered it.
    #[error("Service not registered: {0}")]
    NotRegistered(&'static str),
}
