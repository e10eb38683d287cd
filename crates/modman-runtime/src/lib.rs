//! Modman runtime.
//!
//! An embeddable host that loads module packages (`*.modpkg` zip archives
//! with a `module.yml` descriptor) and everything needed to manage it at
//! runtime: a tokio-backed [`scheduler`], [`logging`] through `tracing`, a
//! YAML [`messages`] catalog, the operator [`commands`] console and the
//! [`bootstrap`] that wires them together.
//!
//! ```rust,ignore
//! use modman_runtime::bootstrap::Bootstrap;
//! use modman_runtime::host::ClassicFlavor;
//!
//! let runtime = Bootstrap::new("data", "modules").start(ClassicFlavor)?;
//! runtime.console().execute(&ConsoleSender::new(runtime.formatter()), "list -v");
//! ```

pub mod bootstrap;
pub mod commands;
pub mod host;
pub mod logging;
pub mod messages;
pub mod scheduler;
pub mod testing;

pub use bootstrap::{Bootstrap, BootstrapError, ModmanRuntime};
pub use commands::{CommandSender, ConsoleSender, OperatorConsole};
pub use host::{ClassicFlavor, EmbeddedHost, HostBuilder, ProviderFlavor};
pub use logging::{TracingLogger, init_tracing};
pub use messages::MessageCatalog;
pub use scheduler::TokioScheduler;
