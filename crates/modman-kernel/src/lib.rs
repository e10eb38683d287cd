//! Modman kernel.
//!
//! Host-neutral contracts for runtime module management: the module and
//! command views a host exposes, the manager contract operators drive, the
//! scheduler and logger capabilities, the per-operation result type and the
//! service registry that wires components together at start-up.
//!
//! The kernel holds traits and small value types only. The reload engine
//! lives in `modman-reload` and the reference host in `modman-runtime`.

pub mod config;
pub mod error;
pub mod host;
pub mod logger;
pub mod manager;
pub mod message;
pub mod module;
pub mod registry;
pub mod result;
pub mod scheduler;

pub use error::{DescriptorError, HostError, HostResult, IntoHostReport, RegistryError};
pub use host::{
    CommandTable, DescriptorReader, HostPlatform, ListenerTable, ModuleList, NameLookup,
    UnloadSnapshot,
};
pub use logger::{LogLevel, ModuleLogger};
pub use manager::ModuleManager;
pub use message::MessageFormatter;
pub use module::{
    CommandOwner, ContextClosed, LoadContextId, Module, ModuleCommand, ModuleDescriptor,
    ModuleHandle,
};
pub use registry::ServiceRegistry;
pub use result::{OpResult, keys};
pub use scheduler::{Job, RepeatingJob, Scheduler, TaskHandle};
