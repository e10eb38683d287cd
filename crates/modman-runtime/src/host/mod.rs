//! Embedded reference host.
//!
//! [`EmbeddedHost`] loads `*.modpkg` packages into the current process and
//! keeps the bookkeeping a long-running host keeps: a module list, a
//! lookup-name map, a listener table, a command table and, for the
//! provider flavour, provider storage. It implements [`HostPlatform`] so the
//! reload engine can take modules back out again.

mod api;
mod command;
mod context;
mod entry;
mod flavor;
mod listener;
mod module;
mod package;
mod provider;
mod state;

pub use api::ModuleContext;
pub use command::{CommandExecutor, CommandInvocation, CommandMap, HostCommand, NativeCommands};
pub use context::LoadContext;
pub use entry::{
    ChainedEntries, EntryResolver, MODULE_API_VERSION, NativeEntries, StaticEntries, entry_key,
};
pub use flavor::{ClassicFlavor, ProviderFlavor, TeardownFlavor};
pub use listener::{Event, EventHandler, ListenerRegistry};
pub use module::{EmbeddedModule, ModuleEntry, ModuleError};
pub use package::{DESCRIPTOR_ENTRY, PACKAGE_EXTENSION, PackageReader};
pub use provider::{ProviderEntry, ProviderStorage};
pub use state::{HostState, LookupNames, ModuleBook};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use error_stack::Report;
use modman_kernel::{
    CommandTable, DescriptorReader, HostError, HostPlatform, HostResult, IntoHostReport,
    ListenerTable, Module, ModuleCommand, ModuleList, ModuleLogger, NameLookup, UnloadSnapshot,
};
use modman_reload::GentleUnloadRegistry;
use modman_reload::coordinator::lookup_keys;
use tracing::{debug, info, warn};

use crate::logging::TracingLogger;

/// Builds an [`EmbeddedHost`].
pub struct HostBuilder {
    name: String,
    package_dir: PathBuf,
    resolver: Option<Arc<dyn EntryResolver>>,
    logger: Option<Arc<dyn ModuleLogger>>,
    gentle: Option<Arc<GentleUnloadRegistry>>,
    listeners: bool,
    provider_storage: Option<bool>,
}

impl HostBuilder {
    pub fn new(package_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: "embedded".to_string(),
            package_dir: package_dir.into(),
            resolver: None,
            logger: None,
            gentle: None,
            listeners: true,
            provider_storage: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Entry resolver. Defaults to [`NativeEntries`].
    pub fn resolver(mut self, resolver: Arc<dyn EntryResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn ModuleLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Share a gentle-unload registry with the coordinator.
    pub fn gentle(mut self, gentle: Arc<GentleUnloadRegistry>) -> Self {
        self.gentle = Some(gentle);
        self
    }

    pub fn without_listeners(mut self) -> Self {
        self.listeners = false;
        self
    }

    pub fn with_provider_storage(mut self) -> Self {
        self.provider_storage = Some(true);
        self
    }

    pub fn without_provider_storage(mut self) -> Self {
        self.provider_storage = Some(false);
        self
    }

    pub fn build<F: TeardownFlavor>(self, flavor: F) -> EmbeddedHost<F> {
        let providers = self
            .provider_storage
            .unwrap_or_else(|| flavor.provider_storage())
            .then(ProviderStorage::new);
        let state = HostState::new(
            self.package_dir,
            self.resolver
                .unwrap_or_else(|| Arc::new(NativeEntries::new())),
            self.logger
                .unwrap_or_else(|| Arc::new(TracingLogger::new("host"))),
            self.gentle.unwrap_or_default(),
            self.listeners.then(ListenerRegistry::new),
            command::command_map("known-commands"),
            providers,
        );
        info!(
            "Embedded host '{}' ready ({} flavour) over {:?}",
            self.name,
            flavor.label(),
            state.package_dir
        );
        EmbeddedHost {
            state: Arc::new(state),
            flavor,
            name: self.name,
        }
    }
}

pub struct EmbeddedHost<F: TeardownFlavor = ClassicFlavor> {
    state: Arc<HostState>,
    flavor: F,
    name: String,
}

impl<F: TeardownFlavor> EmbeddedHost<F> {
    pub fn state(&self) -> &Arc<HostState> {
        &self.state
    }

    pub fn flavor(&self) -> &F {
        &self.flavor
    }

    pub fn gentle(&self) -> &Arc<GentleUnloadRegistry> {
        &self.state.gentle
    }

    pub fn embedded_module(&self, name: &str) -> Option<Arc<EmbeddedModule>> {
        self.state.modules.find(name)
    }

    /// Run a command line against the registered commands.
    pub fn dispatch(&self, line: &str) -> Result<String, HostError> {
        let invocation = CommandInvocation::parse(line)
            .ok_or_else(|| HostError::UnknownCommand(String::new()))?;
        let command = self
            .state
            .commands
            .get_native(&invocation.label)
            .or_else(|| {
                self.state
                    .providers
                    .as_ref()
                    .and_then(|p| p.dispatcher().get_native(&invocation.label))
            })
            .ok_or_else(|| HostError::UnknownCommand(invocation.label.clone()))?;
        command.execute(&invocation)
    }

    /// Fire `event` to every listener. Returns how many ran.
    pub fn fire(&self, event: &Event) -> usize {
        self.state
            .listeners
            .as_ref()
            .map_or(0, |listeners| listeners.fire(event))
    }

    /// Keys of the main command table, sorted.
    pub fn command_keys(&self) -> Vec<String> {
        self.state.commands.keys()
    }

    pub fn listener_count(&self) -> usize {
        self.state.listeners.as_ref().map_or(0, ListenerRegistry::len)
    }

    pub fn providers(&self) -> Option<&ProviderStorage> {
        self.state.providers.as_ref()
    }

    /// How many times the command set was pushed out.
    pub fn command_generation(&self) -> u64 {
        self.state.command_generation.load(Ordering::SeqCst)
    }

    /// Contexts closed by unload that something still holds on to.
    pub fn pinned_contexts(&self) -> usize {
        self.state
            .retired
            .lock()
            .iter()
            .filter(|ctx| ctx.strong_count() > 0)
            .count()
    }

    fn live(&self, module: &dyn Module) -> HostResult<Arc<EmbeddedModule>> {
        self.state
            .live_module(module.handle())
            .ok_or_else(|| Report::new(HostError::ModuleNotFound(module.name().to_string())))
    }

    fn module_context(&self, module: &EmbeddedModule) -> ModuleContext {
        ModuleContext::new(
            &self.state,
            module.name(),
            module.handle(),
            module.context().clone(),
        )
    }

    fn callback(
        module: &EmbeddedModule,
        phase: &'static str,
        outcome: Option<Result<(), ModuleError>>,
    ) -> Result<(), HostError> {
        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(HostError::Callback {
                module: module.name().to_string(),
                phase,
                message: e.to_string(),
            }),
            None => Err(HostError::Callback {
                module: module.name().to_string(),
                phase,
                message: "module code is unavailable".to_string(),
            }),
        }
    }

    fn unregister_listeners(&self, module: &EmbeddedModule) {
        if let Some(listeners) = self.state.listeners.as_ref() {
            listeners.unregister_owner(module.handle());
        }
    }
}

/// References gathered for one unload.
pub struct HostSnapshot<'a> {
    listeners: Option<&'a ListenerRegistry>,
    commands: Vec<&'a dyn CommandTable>,
    modules: &'a ModuleBook,
    lookup: &'a LookupNames,
}

impl UnloadSnapshot for HostSnapshot<'_> {
    fn listeners(&self) -> Option<&dyn ListenerTable> {
        self.listeners.map(|l| l as &dyn ListenerTable)
    }

    fn command_tables(&self) -> Vec<&dyn CommandTable> {
        self.commands.clone()
    }

    fn module_lists(&self) -> Vec<&dyn ModuleList> {
        vec![self.modules as &dyn ModuleList]
    }

    fn lookup_maps(&self) -> Vec<&dyn NameLookup> {
        vec![self.lookup as &dyn NameLookup]
    }
}

impl<F: TeardownFlavor> HostPlatform for EmbeddedHost<F> {
    type Snapshot<'a>
        = HostSnapshot<'a>
    where
        Self: 'a;

    fn name(&self) -> &str {
        &self.name
    }

    fn modules(&self) -> Vec<Arc<dyn Module>> {
        self.state
            .modules
            .all()
            .into_iter()
            .map(|m| m as Arc<dyn Module>)
            .collect()
    }

    fn descriptor_reader(&self) -> &dyn DescriptorReader {
        &self.state.reader
    }

    fn package_dir(&self) -> &Path {
        &self.state.package_dir
    }

    fn enable_module(&self, module: &dyn Module) -> HostResult<()> {
        let module = self.live(module)?;
        if module.is_enabled() {
            return Err(Report::new(HostError::AlreadyEnabled(
                module.name().to_string(),
            )));
        }
        let ctx = self.module_context(&module);
        let outcome = module.with_entry(|entry| entry.on_enable(&ctx));
        if let Err(e) = Self::callback(&module, "enable", outcome) {
            self.unregister_listeners(&module);
            return Err(Report::new(e));
        }
        module.set_enabled(true);
        debug!("Enabled {}", module.full_name());
        Ok(())
    }

    fn disable_module(&self, module: &dyn Module) -> HostResult<()> {
        let module = self.live(module)?;
        if !module.is_enabled() {
            return Err(Report::new(HostError::NotEnabled(module.name().to_string())));
        }
        module.set_enabled(false);
        let ctx = self.module_context(&module);
        let outcome = module.with_entry(|entry| entry.on_disable(&ctx));
        self.unregister_listeners(&module);
        if let Err(e) = Self::callback(&module, "disable", outcome) {
            self.state
                .logger
                .severe_with_cause(&format!("Error while disabling {}", module.name()), &e);
        }
        debug!("Disabled {}", module.full_name());
        Ok(())
    }

    fn instantiate(&self, package: &Path) -> HostResult<Arc<dyn Module>> {
        let descriptor = self
            .state
            .reader
            .read_descriptor(package)
            .map_err(|e| HostError::InvalidDescriptor(e.to_string()))
            .into_report()?;
        let name = descriptor.name.clone();

        if self.state.modules.find(&name).is_some() {
            return Err(Report::new(HostError::AlreadyLoaded(name)));
        }
        if let Some(missing) = descriptor
            .depend
            .iter()
            .find(|dep| self.state.modules.find(dep).is_none())
        {
            return Err(Report::new(HostError::MissingDependency {
                module: name,
                dependency: missing.clone(),
            }));
        }

        let (handle, context_id) = self.state.allocate_ids();
        let context = Arc::new(LoadContext::new(context_id, &name));
        let entry = match self.state.resolver.resolve(&descriptor, package, &context) {
            Ok(entry) => entry,
            Err(report) => {
                if let Err(e) = context.close() {
                    warn!("Could not close {context_id} after a failed load: {e}");
                }
                return Err(report);
            }
        };

        let module = Arc::new(EmbeddedModule::new(
            descriptor,
            package.to_path_buf(),
            handle,
            context.clone(),
            entry,
        ));
        let ctx = self.module_context(&module);
        let outcome = module.with_entry(|entry| entry.on_load(&ctx));
        if let Err(e) = Self::callback(&module, "load", outcome) {
            module.release_entry();
            if let Err(close) = context.close() {
                warn!("Could not close {context_id} after a failed load: {close}");
            }
            return Err(Report::new(e));
        }

        self.state.modules.push(module.clone());
        for key in lookup_keys(&name) {
            self.state.lookup.insert(key, module.clone());
        }
        self.state.live.lock().insert(handle, module.clone());
        if let Some(providers) = self.state.providers.as_ref() {
            providers.register_module(module.as_ref());
        }
        debug!("Instantiated {} as {handle} in {context_id}", module.full_name());
        Ok(module)
    }

    fn command_entries(&self) -> Vec<(String, Arc<dyn ModuleCommand>)> {
        let mut entries = self.state.commands.entries();
        if let Some(providers) = self.state.providers.as_ref() {
            entries.extend(providers.dispatcher().entries());
        }
        entries
    }

    fn sync_commands(&self) {
        self.state.commands.resync();
        if let Some(providers) = self.state.providers.as_ref() {
            providers.dispatcher().resync();
        }
        let generation = self.state.command_generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Command set synced (generation {generation})");
    }

    fn gather_snapshot<'a>(&'a self, module: &dyn Module) -> HostResult<HostSnapshot<'a>> {
        self.live(module)?;
        let commands = self.flavor.command_tables(&self.state)?;
        Ok(HostSnapshot {
            listeners: self.state.listeners.as_ref(),
            commands,
            modules: &self.state.modules,
            lookup: &self.state.lookup,
        })
    }

    fn extra_cleanup(&self, module: &dyn Module, _snapshot: &HostSnapshot<'_>) -> HostResult<()> {
        self.flavor.extra_cleanup(&self.state, module)
    }

    fn close_context(&self, module: &dyn Module) -> HostResult<()> {
        let module = self
            .state
            .live
            .lock()
            .remove(&module.handle())
            .ok_or_else(|| Report::new(HostError::ModuleNotFound(module.name().to_string())))?;
        module.release_entry();
        let context = module.context().clone();
        self.state.retired.lock().push(Arc::downgrade(&context));
        context.close().into_report()
    }

    fn request_gc(&self) {
        let mut retired = self.state.retired.lock();
        retired.retain(|ctx| ctx.strong_count() > 0);
        if !retired.is_empty() {
            debug!("{} closed context(s) still referenced", retired.len());
        }
    }
}
