//! Modman reload engine.
//!
//! - [`coordinator`]: the unload sequence and the [`ModuleManager`] built on it
//! - [`tracker`]: package file hashes and owners
//! - [`auto`]: periodic auto-load, auto-unload and auto-reload
//! - [`gentle`]: cooperative unload vetoes
//! - [`command_table`]: a command map kept in step with a host-native map
//!
//! [`ModuleManager`]: modman_kernel::ModuleManager

pub mod auto;
pub mod command_table;
pub mod coordinator;
pub mod gentle;
pub mod ownership;
pub mod tracker;

pub use auto::AutoFeatureManager;
pub use command_table::{CommandTableBridge, NativeCommandMap};
pub use coordinator::ModuleCoordinator;
pub use gentle::GentleUnloadRegistry;
pub use ownership::{CommandOwnership, classify_command};
pub use tracker::{FileTracker, TrackedFile, calculate_hash};

#[cfg(test)]
pub(crate) mod test_support;
