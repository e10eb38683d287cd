//! Resolving a descriptor's entry point to module code.
//!
//! Two resolvers ship with the host. [`StaticEntries`] maps entry names to
//! factories compiled into the host binary. [`NativeEntries`] extracts the
//! shared library named by the descriptor into the module's load context
//! and calls its exported constructor. [`ChainedEntries`] tries several in
//! order.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use error_stack::{Report, ResultExt};
use libloading::{Library, Symbol};
use modman_kernel::{HostError, HostResult, ModuleDescriptor};
use parking_lot::RwLock;
use tracing::{debug, info};

use super::context::LoadContext;
use super::module::ModuleEntry;
use super::package::PackageReader;

/// Version of the native module ABI this host understands.
pub const MODULE_API_VERSION: u32 = 1;

/// Turns a descriptor into module code.
pub trait EntryResolver: Send + Sync {
    /// Resolve the entry point of `descriptor`, loaded from `package`.
    ///
    /// Anything that outlives the call, such as a loaded library, must be
    /// attached to `context`.
    fn resolve(
        &self,
        descriptor: &ModuleDescriptor,
        package: &Path,
        context: &LoadContext,
    ) -> HostResult<Box<dyn ModuleEntry>>;
}

/// The key a descriptor's entry point is resolved under.
pub fn entry_key(descriptor: &ModuleDescriptor) -> &str {
    descriptor.main.as_deref().unwrap_or(&descriptor.name)
}

type EntryFactory = Arc<dyn Fn(&ModuleDescriptor) -> Box<dyn ModuleEntry> + Send + Sync>;

/// Entry points compiled into the host, keyed by `main` (or the module name
/// when a descriptor has no `main`).
#[derive(Default, Clone)]
pub struct StaticEntries {
    factories: Arc<RwLock<HashMap<String, EntryFactory>>>,
}

impl StaticEntries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `main`, replacing any previous one.
    pub fn register(
        &self,
        main: impl Into<String>,
        factory: impl Fn(&ModuleDescriptor) -> Box<dyn ModuleEntry> + Send + Sync + 'static,
    ) {
        self.factories.write().insert(main.into(), Arc::new(factory));
    }

    /// Builder form of [`StaticEntries::register`].
    pub fn with(
        self,
        main: impl Into<String>,
        factory: impl Fn(&ModuleDescriptor) -> Box<dyn ModuleEntry> + Send + Sync + 'static,
    ) -> Self {
        self.register(main, factory);
        self
    }

    pub fn contains(&self, main: &str) -> bool {
        self.factories.read().contains_key(main)
    }
}

impl EntryResolver for StaticEntries {
    fn resolve(
        &self,
        descriptor: &ModuleDescriptor,
        _package: &Path,
        _context: &LoadContext,
    ) -> HostResult<Box<dyn ModuleEntry>> {
        let key = entry_key(descriptor);
        let factory = self.factories.read().get(key).cloned();
        match factory {
            Some(factory) => Ok(factory(descriptor)),
            None => Err(Report::new(HostError::EntryNotFound {
                module: descriptor.name.clone(),
                reason: format!("no built-in entry registered as '{key}'"),
            })),
        }
    }
}

/// Entry points exported by a shared library inside the package.
///
/// The library must export `_modman_module_create`, normally through
/// [`declare_module!`](crate::declare_module).
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeEntries {
    reader: PackageReader,
}

impl NativeEntries {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntryResolver for NativeEntries {
    fn resolve(
        &self,
        descriptor: &ModuleDescriptor,
        package: &Path,
        context: &LoadContext,
    ) -> HostResult<Box<dyn ModuleEntry>> {
        let Some(library_entry) = descriptor.library.as_deref() else {
            return Err(Report::new(HostError::EntryNotFound {
                module: descriptor.name.clone(),
                reason: "descriptor names no library".to_string(),
            }));
        };

        let scratch = context.scratch_dir().map_err(Report::new)?;
        let path = self
            .reader
            .extract(package, library_entry, &scratch)
            .map_err(|e| Report::new(HostError::InvalidDescriptor(e.to_string())))?;
        info!("Loading native module library: {:?}", path);

        let library = unsafe { Library::new(&path) }
            .map_err(|e| HostError::EntryNotFound {
                module: descriptor.name.clone(),
                reason: e.to_string(),
            })
            .map_err(Report::new)
            .attach(format!("library: {}", path.display()))?;

        let api_version = unsafe {
            let version_fn: Result<Symbol<unsafe extern "C" fn() -> u32>, _> =
                library.get(b"_modman_api_version");
            match version_fn {
                Ok(func) => func(),
                Err(_) => MODULE_API_VERSION,
            }
        };
        if api_version != MODULE_API_VERSION {
            return Err(Report::new(HostError::EntryNotFound {
                module: descriptor.name.clone(),
                reason: format!(
                    "module API version {api_version}, host expects {MODULE_API_VERSION}"
                ),
            }));
        }

        let entry = unsafe {
            let create_fn: Symbol<unsafe extern "C" fn() -> *mut dyn ModuleEntry> = library
                .get(b"_modman_module_create")
                .map_err(|e| {
                    Report::new(HostError::EntryNotFound {
                        module: descriptor.name.clone(),
                        reason: format!("_modman_module_create: {e}"),
                    })
                })?;
            let raw = create_fn();
            if raw.is_null() {
                return Err(Report::new(HostError::EntryNotFound {
                    module: descriptor.name.clone(),
                    reason: "module constructor returned null".to_string(),
                }));
            }
            Box::from_raw(raw)
        };

        context.attach_library(library);
        debug!("{} bound to {}", descriptor.name, context.id());
        Ok(entry)
    }
}

/// Tries each resolver in turn. `EntryNotFound` falls through to the next
/// one; any other error stops the search.
#[derive(Default)]
pub struct ChainedEntries {
    resolvers: Vec<Arc<dyn EntryResolver>>,
}

impl ChainedEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, resolver: impl EntryResolver + 'static) -> Self {
        self.resolvers.push(Arc::new(resolver));
        self
    }
}

impl EntryResolver for ChainedEntries {
    fn resolve(
        &self,
        descriptor: &ModuleDescriptor,
        package: &Path,
        context: &LoadContext,
    ) -> HostResult<Box<dyn ModuleEntry>> {
        let mut reasons = Vec::new();
        for resolver in &self.resolvers {
            match resolver.resolve(descriptor, package, context) {
                Ok(entry) => return Ok(entry),
                Err(report) => match report.current_context() {
                    HostError::EntryNotFound { reason, .. } => reasons.push(reason.clone()),
                    _ => return Err(report),
                },
            }
        }
        Err(Report::new(HostError::EntryNotFound {
            module: descriptor.name.clone(),
            reason: if reasons.is_empty() {
                "no resolvers configured".to_string()
            } else {
                reasons.join("; ")
            },
        }))
    }
}

/// Export a module entry point from a `cdylib`.
///
/// ```rust,ignore
/// struct Greeter;
///
/// impl ModuleEntry for Greeter {
///     fn on_enable(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
///         ctx.register_command("hello", |_| Ok("hi".to_string()));
///         Ok(())
///     }
/// }
///
/// modman_runtime::declare_module!(Greeter, Greeter);
/// ```
#[macro_export]
macro_rules! declare_module {
    ($entry_type:ty, $create_fn:expr) => {
        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn _modman_module_create() -> *mut dyn $crate::host::ModuleEntry {
            let entry: Box<dyn $crate::host::ModuleEntry> = Box::new::<$entry_type>($create_fn);
            Box::into_raw(entry)
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _modman_api_version() -> u32 {
            $crate::host::MODULE_API_VERSION
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ModuleContext;
    use crate::host::module::ModuleError;
    use modman_kernel::LoadContextId;

    struct Noop;

    impl ModuleEntry for Noop {
        fn on_enable(&mut self, _ctx: &ModuleContext) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    fn context() -> LoadContext {
        LoadContext::new(LoadContextId::new(1), "Alpha")
    }

    #[test]
    fn test_static_entries_resolve_by_main_then_name() {
        let entries = StaticEntries::new()
            .with("alpha.Main", |_| Box::new(Noop))
            .with("Beta", |_| Box::new(Noop));

        let mut alpha = ModuleDescriptor::new("Alpha", "1.0");
        alpha.main = Some("alpha.Main".to_string());
        assert!(entries.resolve(&alpha, Path::new("a"), &context()).is_ok());

        let beta = ModuleDescriptor::new("Beta", "1.0");
        assert!(entries.resolve(&beta, Path::new("b"), &context()).is_ok());

        let gamma = ModuleDescriptor::new("Gamma", "1.0");
        let err = entries
            .resolve(&gamma, Path::new("c"), &context())
            .err()
            .unwrap();
        assert!(matches!(
            err.current_context(),
            HostError::EntryNotFound { .. }
        ));
    }

    #[test]
    fn test_native_entries_need_a_library() {
        let descriptor = ModuleDescriptor::new("Alpha", "1.0");
        let err = NativeEntries::new()
            .resolve(&descriptor, Path::new("alpha.modpkg"), &context())
            .err()
            .unwrap();
        assert!(matches!(
            err.current_context(),
            HostError::EntryNotFound { .. }
        ));
    }

    #[test]
    fn test_chain_falls_through_missing_entries() {
        let chain = ChainedEntries::new()
            .then(NativeEntries::new())
            .then(StaticEntries::new().with("Alpha", |_| Box::new(Noop)));

        let alpha = ModuleDescriptor::new("Alpha", "1.0");
        assert!(chain.resolve(&alpha, Path::new("a"), &context()).is_ok());

        let beta = ModuleDescriptor::new("Beta", "1.0");
        let err = chain
            .resolve(&beta, Path::new("b"), &context())
            .err()
            .unwrap();
        match err.current_context() {
            HostError::EntryNotFound { reason, .. } => {
                assert!(reason.contains("descriptor names no library"));
                assert!(reason.contains("'Beta'"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
