//! Unload / reload coordinator.
//!
//! [`ModuleCoordinator`] is the single [`ModuleManager`] implementation. It
//! runs the same teardown for every host; hosts differ only in the snapshot
//! they gather and the extra cleanup they run (see [`HostPlatform`]).
//!
//! Unload sequence:
//!
//! 1. gentle-unload negotiation
//! 2. snapshot of the host structures (drift aborts here, nothing touched)
//! 3. host-level disable, "not enabled" tolerated
//! 4. listener removal by owner handle
//! 5. command removal by ownership, plus broken commands
//! 6. removal from module lists and lookup maps, then flavour cleanup
//! 7. closing the code-loading context
//! 8. a best-effort collection hint

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;

use error_stack::Report;
use modman_kernel::config::ConfigManager;
use modman_kernel::{
    CommandOwner, CommandTable, HostError, HostPlatform, ListenerTable, Module, ModuleCommand,
    ModuleList, ModuleLogger, ModuleManager, NameLookup, OpResult, RegistryError,
    ServiceRegistry, UnloadSnapshot, keys,
};
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, info};

use crate::gentle::GentleUnloadRegistry;
use crate::ownership::{CommandOwnership, classify_command, command_label};
use crate::tracker::FileTracker;

/// Keys a module is filed under in host lookup maps.
pub fn lookup_keys(name: &str) -> Vec<String> {
    let lowered = name.to_lowercase().replace(' ', "_");
    if lowered == name {
        vec![name.to_string()]
    } else {
        vec![name.to_string(), lowered]
    }
}

pub struct ModuleCoordinator<H: HostPlatform> {
    platform: Arc<H>,
    gentle: Arc<GentleUnloadRegistry>,
    config: Arc<ConfigManager>,
    logger: Arc<dyn ModuleLogger>,
    tracker: Option<Arc<FileTracker>>,
    /// Unloads run one at a time. Reentrant so a module's disable callback
    /// may ask for another unload on the same thread.
    unload_lock: ReentrantMutex<()>,
    resync_lock: Mutex<()>,
}

impl<H: HostPlatform> ModuleCoordinator<H> {
    pub fn new(
        platform: Arc<H>,
        gentle: Arc<GentleUnloadRegistry>,
        config: Arc<ConfigManager>,
        logger: Arc<dyn ModuleLogger>,
    ) -> Self {
        Self {
            platform,
            gentle,
            config,
            logger,
            tracker: None,
            unload_lock: ReentrantMutex::new(()),
            resync_lock: Mutex::new(()),
        }
    }

    /// Record the owner of freshly loaded packages in `tracker`.
    pub fn with_tracker(mut self, tracker: Arc<FileTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Build from the services registered at start-up. The file tracker is
    /// optional.
    pub fn from_registry(registry: &ServiceRegistry) -> Result<Self, RegistryError> {
        let coordinator = Self::new(
            registry.get::<H>()?,
            registry.get::<GentleUnloadRegistry>()?,
            registry.get::<ConfigManager>()?,
            registry.get::<dyn ModuleLogger>()?,
        );
        Ok(match registry.get_optional::<FileTracker>() {
            Some(tracker) => coordinator.with_tracker(tracker),
            None => coordinator,
        })
    }

    pub fn platform(&self) -> &Arc<H> {
        &self.platform
    }

    pub fn gentle(&self) -> &Arc<GentleUnloadRegistry> {
        &self.gentle
    }

    /// Run `op`, turning a panic from host or module code into
    /// `error.unexpected`.
    fn guarded(&self, operation: &str, subject: &str, op: impl FnOnce() -> OpResult) -> OpResult {
        match catch_unwind(AssertUnwindSafe(op)) {
            Ok(result) => result,
            Err(payload) => {
                self.logger.severe(&format!(
                    "Unexpected failure during {operation} of {subject}: {}",
                    panic_message(payload.as_ref())
                ));
                OpResult::fail(keys::ERROR_UNEXPECTED).with_arg(subject)
            }
        }
    }

    fn log_report(&self, message: &str, report: &Report<HostError>) {
        debug!("{message}: {report:?}");
        self.logger
            .severe_with_cause(message, report.current_context());
    }

    /// Serialised command resync.
    fn sync_commands(&self) {
        let _guard = self.resync_lock.lock();
        self.platform.sync_commands();
    }

    fn enable_inner(&self, module: &dyn Module) -> OpResult {
        if module.is_enabled() {
            return OpResult::fail(keys::ENABLE_ALREADY_ENABLED).with_arg(module.name());
        }
        match self.platform.enable_module(module) {
            Ok(()) => {
                self.sync_commands();
                OpResult::ok(keys::ENABLE_ENABLED).with_arg(module.name())
            }
            Err(report) => {
                self.log_report(&format!("Could not enable {}", module.name()), &report);
                OpResult::fail(keys::ENABLE_FAILED).with_arg(module.name())
            }
        }
    }

    fn disable_inner(&self, module: &dyn Module) -> OpResult {
        if !module.is_enabled() {
            return OpResult::fail(keys::DISABLE_ALREADY_DISABLED).with_arg(module.name());
        }
        match self.platform.disable_module(module) {
            Ok(()) => {
                self.sync_commands();
                OpResult::ok(keys::DISABLE_DISABLED).with_arg(module.name())
            }
            Err(report) => {
                self.log_report(&format!("Could not disable {}", module.name()), &report);
                OpResult::fail(keys::DISABLE_FAILED).with_arg(module.name())
            }
        }
    }

    /// Exact `<name>.<ext>` first, then the first package whose descriptor
    /// names `name` case-insensitively.
    fn find_package(&self, name: &str) -> Option<PathBuf> {
        let reader = self.platform.descriptor_reader();
        let dir = self.platform.package_dir();

        let exact = dir.join(format!("{name}.{}", reader.package_extension()));
        if reader.is_package(&exact) {
            return Some(exact);
        }

        for package in reader.package_files(dir) {
            match reader.read_descriptor(&package) {
                Ok(descriptor) if descriptor.name.eq_ignore_ascii_case(name) => {
                    return Some(package);
                }
                Ok(_) => {}
                Err(e) => self.logger.warning_with_cause(
                    &format!("Could not read the descriptor of {}", package.display()),
                    &e,
                ),
            }
        }
        None
    }

    fn load_inner(&self, name: &str) -> OpResult {
        let Some(package) = self.find_package(name) else {
            return OpResult::fail(keys::LOAD_CANNOT_FIND).with_arg(name);
        };

        let descriptor = match self.platform.descriptor_reader().read_descriptor(&package) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                self.logger.severe_with_cause(
                    &format!("Invalid descriptor in {}", package.display()),
                    &e,
                );
                return OpResult::fail(keys::LOAD_INVALID_MODULE).with_arg(name);
            }
        };
        if self.module_by_name(&descriptor.name).is_some() {
            return OpResult::fail(keys::LOAD_ALREADY_LOADED).with_arg(&descriptor.name);
        }

        let module = match self.platform.instantiate(&package) {
            Ok(module) => module,
            Err(report) => {
                self.log_report(&format!("Could not load {}", descriptor.name), &report);
                return OpResult::fail(keys::LOAD_FAILED).with_arg(&descriptor.name);
            }
        };

        if let (Some(tracker), Some(file_name)) = (&self.tracker, package.file_name()) {
            tracker.record_owner(&file_name.to_string_lossy(), module.name());
        }

        if let Err(report) = self.platform.enable_module(module.as_ref()) {
            self.log_report(&format!("Could not enable {}", module.name()), &report);
            return OpResult::fail(keys::LOAD_FAILED).with_arg(module.name());
        }

        // The embedded hosts register commands synchronously during enable,
        // so the resync runs right away instead of after a fixed delay.
        self.sync_commands();
        info!("Loaded {} from {}", module.full_name(), package.display());
        OpResult::ok(keys::LOAD_LOADED).with_arg(module.name())
    }

    fn unload_inner(&self, module: &dyn Module) -> OpResult {
        let _guard = self.unload_lock.lock();
        let name = module.name().to_string();

        if !self.gentle.negotiate(module) {
            info!("{name} refused to be unloaded");
            return OpResult::fail(keys::UNLOAD_GENTLE_FAILED).with_arg(&name);
        }

        let snapshot = match self.platform.gather_snapshot(module) {
            Ok(snapshot) => snapshot,
            Err(report) => {
                self.log_report(
                    &format!(
                        "Could not gather {} state to unload {name}",
                        self.platform.name()
                    ),
                    &report,
                );
                return OpResult::fail(keys::UNLOAD_FAILED).with_arg(&name);
            }
        };

        if let Err(report) = self.platform.disable_module(module) {
            match report.current_context() {
                HostError::NotEnabled(_) => debug!("{name} was not enabled"),
                _ => self.log_report(&format!("Could not disable {name}"), &report),
            }
        }

        if let Some(listeners) = snapshot.listeners() {
            let handle = module.handle();
            let removed = listeners.retain_owners(&mut |owner| owner != handle);
            debug!("Removed {removed} listener(s) of {name}");
        }

        self.cleanup_commands(module, &snapshot);
        self.sync_commands();

        for list in snapshot.module_lists() {
            list.retain_names(&mut |listed| !listed.eq_ignore_ascii_case(&name));
        }
        let lookup_keys = lookup_keys(&name);
        for map in snapshot.lookup_maps() {
            for key in &lookup_keys {
                map.remove_key(key);
            }
        }

        // Past this point the module is gone from the host's lists; failures
        // leave it unreachable but possibly not released.
        let cleaned = self.platform.extra_cleanup(module, &snapshot);
        drop(snapshot);
        self.gentle.forget(module.handle());
        if let Err(report) = cleaned {
            self.log_report(&format!("Could not finish unloading {name}"), &report);
            return OpResult::fail(keys::UNLOAD_INCOMPLETE).with_arg(&name);
        }

        if let Err(report) = self.platform.close_context(module) {
            self.log_report(
                &format!("Could not release the code of {name}, a restart may be needed"),
                &report,
            );
            return OpResult::fail(keys::UNLOAD_INCOMPLETE).with_arg(&name);
        }

        self.platform.request_gc();
        info!("Unloaded {name}");
        OpResult::ok(keys::UNLOAD_UNLOADED).with_arg(&name)
    }

    fn cleanup_commands(&self, module: &dyn Module, snapshot: &H::Snapshot<'_>) {
        let notify = self.config.notify_on_broken_command_removal();
        for table in snapshot.command_tables() {
            let mut removed = 0usize;
            for (key, command) in table.entries() {
                match classify_command(command.as_ref(), module) {
                    CommandOwnership::Owned => {
                        table.remove(&key);
                        removed += 1;
                    }
                    CommandOwnership::Broken => {
                        table.remove(&key);
                        removed += 1;
                        if notify {
                            self.logger
                                .info(&format!("Removing broken command '{key}'!"));
                        }
                    }
                    CommandOwnership::Foreign => {}
                }
            }
            debug!("Removed {removed} command(s) from {}", table.label());
        }
    }

    /// Resolve which loaded module a command belongs to.
    fn owner_name(
        &self,
        command: &dyn ModuleCommand,
        modules: &[Arc<dyn Module>],
    ) -> Option<String> {
        let owner = match command.owner() {
            CommandOwner::Direct(handle) => modules.iter().find(|m| m.handle() == handle),
            CommandOwner::Unattributed => {
                let context = command.defining_context().ok().flatten()?;
                modules
                    .iter()
                    .find(|m| m.load_context() == Some(context))
            }
        };
        owner.map(|m| m.name().to_string())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<H: HostPlatform> ModuleManager for ModuleCoordinator<H> {
    fn enable(&self, module: &dyn Module) -> OpResult {
        self.guarded("enable", module.name(), || self.enable_inner(module))
    }

    fn enable_all(&self) -> OpResult {
        self.guarded("enable", "all modules", || {
            let mut failed = Vec::new();
            for module in self.modules() {
                if module.is_enabled() || self.is_ignored(module.as_ref()) {
                    continue;
                }
                if self.enable_inner(module.as_ref()).is_failure() {
                    failed.push(module.name().to_string());
                }
            }
            if failed.is_empty() {
                OpResult::ok(keys::ENABLE_ALL)
            } else {
                OpResult::fail(keys::ENABLE_ALL_FAILED).with_arg(failed.join(", "))
            }
        })
    }

    fn disable(&self, module: &dyn Module) -> OpResult {
        self.guarded("disable", module.name(), || self.disable_inner(module))
    }

    fn disable_all(&self) -> OpResult {
        self.guarded("disable", "all modules", || {
            let mut failed = Vec::new();
            for module in self.modules() {
                if !module.is_enabled() || self.is_ignored(module.as_ref()) {
                    continue;
                }
                if self.disable_inner(module.as_ref()).is_failure() {
                    failed.push(module.name().to_string());
                }
            }
            if failed.is_empty() {
                OpResult::ok(keys::DISABLE_ALL)
            } else {
                OpResult::fail(keys::DISABLE_ALL_FAILED).with_arg(failed.join(", "))
            }
        })
    }

    fn modules(&self) -> Vec<Arc<dyn Module>> {
        self.platform.modules()
    }

    fn module_by_name(&self, name: &str) -> Option<Arc<dyn Module>> {
        let name = name.trim();
        self.platform
            .modules()
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
    }

    fn usages(&self, module: &dyn Module) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for (key, command) in self.platform.command_entries() {
            if classify_command(command.as_ref(), module) != CommandOwnership::Owned {
                continue;
            }
            let label = command_label(&key);
            if !labels.iter().any(|l| l.eq_ignore_ascii_case(label)) {
                labels.push(label.to_string());
            }
        }
        labels.sort();
        labels
    }

    fn find_by_command(&self, command: &str) -> Vec<String> {
        let modules = self.platform.modules();
        let mut owners: Vec<String> = Vec::new();
        for (key, registered) in self.platform.command_entries() {
            if !command_label(&key).eq_ignore_ascii_case(command) {
                continue;
            }
            if let Some(owner) = self.owner_name(registered.as_ref(), &modules) {
                if !owners.contains(&owner) {
                    owners.push(owner);
                }
            }
        }
        owners.sort();
        owners
    }

    fn is_ignored_name(&self, name: &str) -> bool {
        self.config.is_ignored(name)
    }

    fn load(&self, name: &str) -> OpResult {
        self.guarded("load", name, || self.load_inner(name))
    }

    fn unload(&self, module: &dyn Module) -> OpResult {
        self.guarded("unload", module.name(), || self.unload_inner(module))
    }

    fn reload(&self, name: &str) -> OpResult {
        self.guarded("reload", name, || {
            let Some(module) = self.module_by_name(name) else {
                return OpResult::fail(keys::ERROR_INVALID_MODULE).with_arg(name);
            };
            let module_name = module.name().to_string();

            let unloaded = self.unload_inner(module.as_ref());
            if unloaded.is_failure() {
                return unloaded;
            }
            drop(module);

            let loaded = self.load_inner(&module_name);
            if loaded.is_failure() {
                return loaded;
            }
            OpResult::ok(keys::RELOAD_RELOADED).with_arg(module_name)
        })
    }
}
