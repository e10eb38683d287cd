//! Provider storage of the newer module subsystem.
//!
//! Hosts running the provider flavour keep extra caches besides the classic
//! command table: one provider entry per module, a context map keyed by
//! `name@version`, an identifier map keyed by `modman:<name>`, a cache of
//! listener executors keyed by event and a dispatcher command table. Every
//! one of them must be scrubbed on unload or the module's code stays pinned.

use std::collections::HashMap;
use std::path::PathBuf;

use modman_kernel::{LoadContextId, Module, ModuleHandle};
use parking_lot::Mutex;
use tracing::debug;

use super::command::{CommandMap, command_map};

/// One module as the provider subsystem knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEntry {
    pub module: String,
    pub handle: ModuleHandle,
    pub file: PathBuf,
    pub context: Option<LoadContextId>,
}

pub struct ProviderStorage {
    providers: Mutex<Vec<ProviderEntry>>,
    provider_context: Mutex<HashMap<String, Option<LoadContextId>>>,
    identifiers: Mutex<HashMap<String, String>>,
    executor_cache: Mutex<HashMap<String, LoadContextId>>,
    dispatcher: CommandMap,
}

impl Default for ProviderStorage {
    fn default() -> Self {
        Self {
            providers: Mutex::new(Vec::new()),
            provider_context: Mutex::new(HashMap::new()),
            identifiers: Mutex::new(HashMap::new()),
            executor_cache: Mutex::new(HashMap::new()),
            dispatcher: command_map("dispatcher"),
        }
    }
}

fn context_key(module: &dyn Module) -> String {
    format!("{}@{}", module.name(), module.version())
}

fn identifier_key(name: &str) -> String {
    format!("modman:{}", name.to_lowercase())
}

impl ProviderStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_module(&self, module: &dyn Module) {
        self.providers.lock().push(ProviderEntry {
            module: module.name().to_string(),
            handle: module.handle(),
            file: module.file().to_path_buf(),
            context: module.load_context(),
        });
        self.provider_context
            .lock()
            .insert(context_key(module), module.load_context());
        self.identifiers
            .lock()
            .insert(identifier_key(module.name()), module.name().to_string());
    }

    /// Remember that the executor cached under `key` was defined in `context`.
    pub fn cache_executor(&self, key: impl Into<String>, context: LoadContextId) {
        self.executor_cache.lock().insert(key.into(), context);
    }

    /// Drop every entry tied to `module`. Returns how many were removed.
    ///
    /// Provider entries match on the module handle, never on a name prefix,
    /// so `Foo` never takes `FooBar` with it.
    pub fn remove_module(&self, module: &dyn Module) -> usize {
        let handle = module.handle();
        let context = module.load_context();
        let mut removed = 0;

        {
            let mut providers = self.providers.lock();
            let before = providers.len();
            providers.retain(|p| p.handle != handle);
            removed += before - providers.len();
        }
        if self
            .provider_context
            .lock()
            .remove(&context_key(module))
            .is_some()
        {
            removed += 1;
        }
        {
            let mut identifiers = self.identifiers.lock();
            let before = identifiers.len();
            identifiers.retain(|key, name| {
                name.as_str() != module.name() && *key != identifier_key(module.name())
            });
            removed += before - identifiers.len();
        }
        if let Some(context) = context {
            let mut cache = self.executor_cache.lock();
            let before = cache.len();
            cache.retain(|_, defined_in| *defined_in != context);
            removed += before - cache.len();
        }

        debug!("Removed {removed} provider entries of {}", module.name());
        removed
    }

    pub fn providers(&self) -> Vec<ProviderEntry> {
        self.providers.lock().clone()
    }

    pub fn has_provider(&self, handle: ModuleHandle) -> bool {
        self.providers.lock().iter().any(|p| p.handle == handle)
    }

    pub fn identifier(&self, name: &str) -> Option<String> {
        self.identifiers.lock().get(&identifier_key(name)).cloned()
    }

    pub fn has_context_entry(&self, name: &str, version: &str) -> bool {
        self.provider_context
            .lock()
            .contains_key(&format!("{name}@{version}"))
    }

    pub fn cached_executors(&self) -> usize {
        self.executor_cache.lock().len()
    }

    pub fn dispatcher(&self) -> &CommandMap {
        &self.dispatcher
    }
}
