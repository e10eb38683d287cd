//! The manager contract operators drive.

use std::sync::Arc;

use crate::module::Module;
use crate::result::OpResult;

/// Enable, disable, load, unload and reload modules at runtime.
///
/// Every operation returns an [`OpResult`]; failures are reported, never
/// raised. Mutating operations must be called on the synchronous context.
pub trait ModuleManager: Send + Sync {
    fn enable(&self, module: &dyn Module) -> OpResult;

    /// Enable every module that is neither ignored nor already enabled.
    fn enable_all(&self) -> OpResult;

    fn disable(&self, module: &dyn Module) -> OpResult;

    /// Disable every module that is neither ignored nor already disabled.
    fn disable_all(&self) -> OpResult;

    fn modules(&self) -> Vec<Arc<dyn Module>>;

    /// Case-insensitive lookup of a loaded module.
    fn module_by_name(&self, name: &str) -> Option<Arc<dyn Module>>;

    /// Join `args[start..]` with spaces and look the result up, so module
    /// names containing spaces survive command-line splitting.
    fn module_by_args(&self, args: &[String], start: usize) -> Option<Arc<dyn Module>> {
        if start >= args.len() {
            return None;
        }
        self.module_by_name(&args[start..].join(" "))
    }

    /// Names of all loaded modules, sorted case-insensitively.
    fn module_names(&self, full: bool) -> Vec<String> {
        names_of(self.modules().iter().map(|m| m.as_ref()), full)
    }

    fn enabled_module_names(&self, full: bool) -> Vec<String> {
        let modules = self.modules();
        names_of(
            modules.iter().map(|m| m.as_ref()).filter(|m| m.is_enabled()),
            full,
        )
    }

    fn disabled_module_names(&self, full: bool) -> Vec<String> {
        let modules = self.modules();
        names_of(
            modules.iter().map(|m| m.as_ref()).filter(|m| !m.is_enabled()),
            full,
        )
    }

    fn module_version(&self, name: &str) -> Option<String> {
        self.module_by_name(name).map(|m| m.version().to_string())
    }

    /// Name with a `&a`/`&c` enabled colour code and optional version.
    fn formatted_name(&self, module: &dyn Module, include_version: bool) -> String {
        let colour = if module.is_enabled() { "&a" } else { "&c" };
        if include_version {
            format!("{colour}{}", module.full_name())
        } else {
            format!("{colour}{}", module.name())
        }
    }

    /// Distinct command labels owned by `module`, without namespace prefixes.
    fn usages(&self, module: &dyn Module) -> Vec<String>;

    /// Names of the modules that register `command`.
    fn find_by_command(&self, command: &str) -> Vec<String>;

    fn is_ignored(&self, module: &dyn Module) -> bool {
        self.is_ignored_name(module.name())
    }

    /// Case-insensitive check against the configured ignore list.
    fn is_ignored_name(&self, name: &str) -> bool;

    /// Locate the package for `name`, instantiate and enable it.
    fn load(&self, name: &str) -> OpResult;

    /// Disable and tear down `module`, scrubbing every host reference to it.
    fn unload(&self, module: &dyn Module) -> OpResult;

    /// Unload the named module then load it again from its package.
    fn reload(&self, name: &str) -> OpResult;
}

fn names_of<'a>(modules: impl Iterator<Item = &'a dyn Module>, full: bool) -> Vec<String> {
    let mut names: Vec<String> = modules
        .map(|m| {
            if full {
                m.full_name()
            } else {
                m.name().to_string()
            }
        })
        .collect();
    names.sort_by_key(|n| n.to_lowercase());
    names
}
