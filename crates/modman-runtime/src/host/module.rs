//! Module code and the host's record of a loaded module.

use std::any::Any;
use std::error::Error;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use modman_kernel::{LoadContextId, Module, ModuleDescriptor, ModuleHandle};
use parking_lot::Mutex;

use super::api::ModuleContext;
use super::context::LoadContext;

/// Error type module code reports from its callbacks.
pub type ModuleError = Box<dyn Error + Send + Sync>;

/// Code behind a module. Implemented by module authors.
///
/// Callbacks run on the synchronous context.
pub trait ModuleEntry: Send {
    /// Called once after the module was instantiated, before it is enabled.
    fn on_load(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        let _ = ctx;
        Ok(())
    }

    /// Register commands and listeners here.
    fn on_enable(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError>;

    fn on_disable(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        let _ = ctx;
        Ok(())
    }
}

/// A module instance owned by the embedded host.
pub struct EmbeddedModule {
    descriptor: ModuleDescriptor,
    file: PathBuf,
    handle: ModuleHandle,
    context: Arc<LoadContext>,
    enabled: AtomicBool,
    entry: Mutex<Option<Box<dyn ModuleEntry>>>,
}

impl EmbeddedModule {
    pub fn new(
        descriptor: ModuleDescriptor,
        file: PathBuf,
        handle: ModuleHandle,
        context: Arc<LoadContext>,
        entry: Box<dyn ModuleEntry>,
    ) -> Self {
        Self {
            descriptor,
            file,
            handle,
            context,
            enabled: AtomicBool::new(false),
            entry: Mutex::new(Some(entry)),
        }
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    pub fn context(&self) -> &Arc<LoadContext> {
        &self.context
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Run a lifecycle callback against the entry.
    ///
    /// The entry is taken out of its slot while the callback runs so module
    /// code may call back into the host. A panic in module code is reported
    /// as an error and the entry is put back. Returns `None` if the entry was
    /// already released or is in use further up the stack.
    pub(crate) fn with_entry(
        &self,
        call: impl FnOnce(&mut dyn ModuleEntry) -> Result<(), ModuleError>,
    ) -> Option<Result<(), ModuleError>> {
        let mut entry = self.entry.lock().take()?;
        let result = catch_unwind(AssertUnwindSafe(|| call(entry.as_mut())))
            .unwrap_or_else(|payload| Err(panic_error(payload.as_ref())));
        let mut slot = self.entry.lock();
        if slot.is_none() && !self.context.is_closed() {
            *slot = Some(entry);
        }
        Some(result)
    }

    /// Drop the module's code. Must happen before its context is closed.
    pub(crate) fn release_entry(&self) -> bool {
        self.entry.lock().take().is_some()
    }
}

fn panic_error(payload: &(dyn Any + Send)) -> ModuleError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|m| (*m).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("panicked: {message}").into()
}

impl Module for EmbeddedModule {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn version(&self) -> &str {
        &self.descriptor.version
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn authors(&self) -> &[String] {
        &self.descriptor.authors
    }

    fn depend(&self) -> &[String] {
        &self.descriptor.depend
    }

    fn soft_depend(&self) -> &[String] {
        &self.descriptor.soft_depend
    }

    fn description(&self) -> Option<&str> {
        self.descriptor.description.as_deref()
    }

    fn file(&self) -> &Path {
        &self.file
    }

    fn handle(&self) -> ModuleHandle {
        self.handle
    }

    fn load_context(&self) -> Option<LoadContextId> {
        Some(self.context.id())
    }
}

impl std::fmt::Debug for EmbeddedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedModule")
            .field("name", &self.descriptor.name)
            .field("version", &self.descriptor.version)
            .field("handle", &self.handle)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
