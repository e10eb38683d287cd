//! Cooperative unload negotiation.
//!
//! A module may register a predicate that is consulted before it is
//! unloaded. Returning `false` vetoes the unload before anything is touched.

use std::collections::HashMap;
use std::sync::Arc;

use modman_kernel::{Module, ModuleHandle};
use parking_lot::Mutex;
use tracing::debug;

type Veto = Arc<dyn Fn() -> bool + Send + Sync>;

struct Registration {
    module: String,
    predicate: Veto,
}

/// Module handle to unload predicate. At most one registration per module.
#[derive(Default)]
pub struct GentleUnloadRegistry {
    registrations: Mutex<HashMap<ModuleHandle, Registration>>,
}

impl GentleUnloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `predicate` for `module`. Returns `false` if the module is
    /// already registered; the first registration stays in place.
    pub fn register(
        &self,
        module: &dyn Module,
        predicate: impl Fn() -> bool + Send + Sync + 'static,
    ) -> bool {
        self.register_handle(module.handle(), module.name(), predicate)
    }

    /// Same as [`GentleUnloadRegistry::register`] for callers that only hold
    /// the handle.
    pub fn register_handle(
        &self,
        handle: ModuleHandle,
        name: &str,
        predicate: impl Fn() -> bool + Send + Sync + 'static,
    ) -> bool {
        let mut registrations = self.registrations.lock();
        if registrations.contains_key(&handle) {
            return false;
        }
        debug!("{name} registered for gentle unload");
        registrations.insert(
            handle,
            Registration {
                module: name.to_string(),
                predicate: Arc::new(predicate),
            },
        );
        true
    }

    /// Register a predicate that always refuses.
    pub fn refuse_unload(&self, module: &dyn Module) -> bool {
        self.register(module, || false)
    }

    pub fn is_registered(&self, handle: ModuleHandle) -> bool {
        self.registrations.lock().contains_key(&handle)
    }

    /// Ask `module` whether it may be unloaded. Modules without a
    /// registration always agree.
    ///
    /// The predicate runs without the registry lock held.
    pub fn negotiate(&self, module: &dyn Module) -> bool {
        let predicate = self
            .registrations
            .lock()
            .get(&module.handle())
            .map(|r| r.predicate.clone());
        match predicate {
            Some(predicate) => predicate(),
            None => true,
        }
    }

    /// Drop the registration for `handle`.
    pub fn forget(&self, handle: ModuleHandle) -> bool {
        self.registrations.lock().remove(&handle).is_some()
    }

    /// Names of registered modules, sorted.
    pub fn registered_modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registrations
            .lock()
            .values()
            .map(|r| r.module.clone())
            .collect();
        names.sort();
        names
    }
}
