//! Bookkeeping shared by the host and the module-facing API.
//!
//! Every structure has its own lock. Module callbacks run while the host is
//! in the middle of enabling or disabling them and may call back in.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use modman_kernel::{
    LoadContextId, Module, ModuleHandle, ModuleList, ModuleLogger, NameLookup,
};
use modman_reload::GentleUnloadRegistry;
use parking_lot::Mutex;

use super::command::CommandMap;
use super::context::LoadContext;
use super::entry::EntryResolver;
use super::listener::ListenerRegistry;
use super::module::EmbeddedModule;
use super::package::PackageReader;
use super::provider::ProviderStorage;

/// Loaded modules in load order.
#[derive(Default)]
pub struct ModuleBook {
    modules: Mutex<Vec<Arc<EmbeddedModule>>>,
}

impl ModuleBook {
    pub fn push(&self, module: Arc<EmbeddedModule>) {
        self.modules.lock().push(module);
    }

    pub fn all(&self) -> Vec<Arc<EmbeddedModule>> {
        self.modules.lock().clone()
    }

    /// Case-insensitive lookup.
    pub fn find(&self, name: &str) -> Option<Arc<EmbeddedModule>> {
        self.modules
            .lock()
            .iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn contains_handle(&self, handle: ModuleHandle) -> bool {
        self.modules.lock().iter().any(|m| m.handle() == handle)
    }

    pub fn len(&self) -> usize {
        self.modules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ModuleList for ModuleBook {
    fn retain_names(&self, keep: &mut dyn FnMut(&str) -> bool) -> usize {
        let mut modules = self.modules.lock();
        let before = modules.len();
        modules.retain(|m| keep(m.name()));
        before - modules.len()
    }
}

/// Lookup key to module. Modules are filed under their name and under the
/// lower-cased name with spaces replaced by `_`.
#[derive(Default)]
pub struct LookupNames {
    names: Mutex<HashMap<String, Arc<EmbeddedModule>>>,
}

impl LookupNames {
    pub fn insert(&self, key: impl Into<String>, module: Arc<EmbeddedModule>) {
        self.names.lock().insert(key.into(), module);
    }

    pub fn get(&self, key: &str) -> Option<Arc<EmbeddedModule>> {
        self.names.lock().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.names.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.names.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NameLookup for LookupNames {
    fn remove_key(&self, key: &str) -> bool {
        self.names.lock().remove(key).is_some()
    }
}

pub struct HostState {
    pub(crate) package_dir: PathBuf,
    pub(crate) reader: PackageReader,
    pub(crate) resolver: Arc<dyn EntryResolver>,
    pub(crate) logger: Arc<dyn ModuleLogger>,
    pub(crate) gentle: Arc<GentleUnloadRegistry>,
    pub(crate) modules: ModuleBook,
    pub(crate) lookup: LookupNames,
    /// Modules whose context is still open, by handle. Entries leave only
    /// when the context is closed.
    pub(crate) live: Mutex<HashMap<ModuleHandle, Arc<EmbeddedModule>>>,
    pub(crate) listeners: Option<ListenerRegistry>,
    pub(crate) commands: CommandMap,
    pub(crate) providers: Option<ProviderStorage>,
    /// Closed contexts, kept weakly to report ones that are still pinned.
    pub(crate) retired: Mutex<Vec<Weak<LoadContext>>>,
    next_handle: AtomicU64,
    next_context: AtomicU64,
    pub(crate) command_generation: AtomicU64,
}

impl HostState {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        package_dir: PathBuf,
        resolver: Arc<dyn EntryResolver>,
        logger: Arc<dyn ModuleLogger>,
        gentle: Arc<GentleUnloadRegistry>,
        listeners: Option<ListenerRegistry>,
        commands: CommandMap,
        providers: Option<ProviderStorage>,
    ) -> Self {
        Self {
            package_dir,
            reader: PackageReader,
            resolver,
            logger,
            gentle,
            modules: ModuleBook::default(),
            lookup: LookupNames::default(),
            live: Mutex::new(HashMap::new()),
            listeners,
            commands,
            providers,
            retired: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(1),
            next_context: AtomicU64::new(1),
            command_generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn allocate_ids(&self) -> (ModuleHandle, LoadContextId) {
        (
            ModuleHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst)),
            LoadContextId::new(self.next_context.fetch_add(1, Ordering::SeqCst)),
        )
    }

    pub(crate) fn live_module(&self, handle: ModuleHandle) -> Option<Arc<EmbeddedModule>> {
        self.live.lock().get(&handle).cloned()
    }
}
