//! Deciding which module a registered command belongs to.

use modman_kernel::{CommandOwner, Module, ModuleCommand};

/// How a command relates to a module being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOwnership {
    /// The command belongs to the module.
    Owned,
    /// The command's backing context is closed; it fails on every call.
    Broken,
    /// Someone else's command.
    Foreign,
}

/// Classify `command` relative to `module`.
///
/// A direct owner reference wins. Otherwise the command is attributed by
/// the identity of the code-loading context its executor was defined in.
/// That fallback can misattribute a command whose executor was defined in
/// one module and registered by another.
pub fn classify_command(command: &dyn ModuleCommand, module: &dyn Module) -> CommandOwnership {
    if let CommandOwner::Direct(owner) = command.owner() {
        if owner == module.handle() {
            return CommandOwnership::Owned;
        }
    }

    match command.defining_context() {
        Err(_) => CommandOwnership::Broken,
        Ok(Some(context))
            if command.owner() == CommandOwner::Unattributed
                && module.load_context() == Some(context) =>
        {
            CommandOwnership::Owned
        }
        Ok(_) => CommandOwnership::Foreign,
    }
}

/// Label a command key answers to, without a `namespace:` prefix.
pub fn command_label(key: &str) -> &str {
    key.rsplit_once(':').map_or(key, |(_, label)| label)
}
