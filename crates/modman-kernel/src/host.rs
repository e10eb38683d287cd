//! Host platform primitives the reload engine is generic over.
//!
//! A host exposes just enough of its internal bookkeeping for the unload
//! sequence to scrub every reference to a module: its listener table, its
//! command tables, its module lists and its name-lookup maps. The engine
//! never sees concrete host types.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{DescriptorError, HostResult};
use crate::module::{Module, ModuleCommand, ModuleDescriptor, ModuleHandle};

/// Reads descriptors out of package files.
pub trait DescriptorReader: Send + Sync {
    /// File extension of module packages, without the dot.
    fn package_extension(&self) -> &str;

    fn read_descriptor(&self, package: &Path) -> Result<ModuleDescriptor, DescriptorError>;

    /// Whether `path` is a regular file with the package extension.
    fn is_package(&self, path: &Path) -> bool {
        path.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(self.package_extension()))
    }

    /// Regular package files directly inside `dir`, sorted by path.
    fn package_files(&self, dir: &Path) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| self.is_package(path))
            .collect();
        files.sort();
        files
    }
}

/// Host table of event listeners.
pub trait ListenerTable: Send + Sync {
    /// Keep only listeners whose owner satisfies `keep`. Returns how many
    /// were removed.
    fn retain_owners(&self, keep: &mut dyn FnMut(ModuleHandle) -> bool) -> usize;
}

/// Host table mapping command keys to commands.
pub trait CommandTable: Send + Sync {
    /// Short label used in logs, e.g. `known-commands`.
    fn label(&self) -> &str;

    /// Copy of every `(key, command)` pair.
    fn entries(&self) -> Vec<(String, Arc<dyn ModuleCommand>)>;

    fn remove(&self, key: &str) -> Option<Arc<dyn ModuleCommand>>;
}

/// Host list of loaded modules.
pub trait ModuleList: Send + Sync {
    /// Keep only modules whose name satisfies `keep`. Returns how many were
    /// removed.
    fn retain_names(&self, keep: &mut dyn FnMut(&str) -> bool) -> usize;
}

/// Host map from lookup key to module.
pub trait NameLookup: Send + Sync {
    fn remove_key(&self, key: &str) -> bool;
}

/// References to the host structures gathered before teardown starts.
///
/// Gathering happens up front so that a host whose internals drifted
/// aborts the unload before anything was mutated.
pub trait UnloadSnapshot {
    /// Listener table, if the host has one.
    fn listeners(&self) -> Option<&dyn ListenerTable>;

    /// Every command table the flavour walks.
    fn command_tables(&self) -> Vec<&dyn CommandTable>;

    fn module_lists(&self) -> Vec<&dyn ModuleList>;

    fn lookup_maps(&self) -> Vec<&dyn NameLookup>;
}

/// Primitives a host offers to the reload engine.
pub trait HostPlatform: Send + Sync + 'static {
    type Snapshot<'a>: UnloadSnapshot
    where
        Self: 'a;

    /// Human-readable host name for logs.
    fn name(&self) -> &str;

    fn modules(&self) -> Vec<Arc<dyn Module>>;

    fn descriptor_reader(&self) -> &dyn DescriptorReader;

    /// Directory holding module packages.
    fn package_dir(&self) -> &Path;

    fn enable_module(&self, module: &dyn Module) -> HostResult<()>;

    /// Disable `module`. Fails with `HostError::NotEnabled` if it was not
    /// enabled.
    fn disable_module(&self, module: &dyn Module) -> HostResult<()>;

    /// Instantiate the module in `package` without enabling it.
    fn instantiate(&self, package: &Path) -> HostResult<Arc<dyn Module>>;

    /// Copy of every registered command, keyed as in the primary table.
    fn command_entries(&self) -> Vec<(String, Arc<dyn ModuleCommand>)>;

    /// Push the current command set to whatever caches it. Callers serialise.
    fn sync_commands(&self) {}

    /// Gather references to every structure the unload touches.
    ///
    /// Fails with `HostError::StructureUnavailable` when a required structure
    /// cannot be obtained.
    fn gather_snapshot<'a>(&'a self, module: &dyn Module) -> HostResult<Self::Snapshot<'a>>;

    /// Flavour-specific cleanup run after the module left every list.
    fn extra_cleanup(&self, module: &dyn Module, snapshot: &Self::Snapshot<'_>) -> HostResult<()> {
        let _ = (module, snapshot);
        Ok(())
    }

    /// Release the module's code-loading context.
    fn close_context(&self, module: &dyn Module) -> HostResult<()>;

    /// Best-effort hint to release anything still pinning closed contexts.
    fn request_gc(&self) {}
}
