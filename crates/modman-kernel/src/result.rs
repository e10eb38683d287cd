//! Outcome of a single management operation.

use std::borrow::Cow;
use std::fmt;

/// Message keys returned by management operations.
///
/// Keys are looked up in the message catalog; arguments fill `{0}`, `{1}`...
pub mod keys {
    pub const ENABLE_ENABLED: &str = "enable.enabled";
    pub const ENABLE_ALREADY_ENABLED: &str = "enable.already-enabled";
    pub const ENABLE_FAILED: &str = "enable.failed";
    pub const ENABLE_ALL: &str = "enable.all";
    pub const ENABLE_ALL_FAILED: &str = "enable.all-failed";

    pub const DISABLE_DISABLED: &str = "disable.disabled";
    pub const DISABLE_ALREADY_DISABLED: &str = "disable.already-disabled";
    pub const DISABLE_FAILED: &str = "disable.failed";
    pub const DISABLE_ALL: &str = "disable.all";
    pub const DISABLE_ALL_FAILED: &str = "disable.all-failed";

    pub const LOAD_LOADED: &str = "load.loaded";
    pub const LOAD_CANNOT_FIND: &str = "load.cannot-find";
    pub const LOAD_INVALID_MODULE: &str = "load.invalid-plugin";
    pub const LOAD_ALREADY_LOADED: &str = "load.already-loaded";
    pub const LOAD_FAILED: &str = "load.failed";

    pub const UNLOAD_UNLOADED: &str = "unload.unloaded";
    pub const UNLOAD_FAILED: &str = "unload.failed";
    pub const UNLOAD_GENTLE_FAILED: &str = "unload.gentle-failed";
    pub const UNLOAD_INCOMPLETE: &str = "unload.incomplete";

    pub const RELOAD_RELOADED: &str = "reload.reloaded";
    pub const RELOAD_ALL: &str = "reload.all";
    pub const RELOAD_ALL_FAILED: &str = "reload.all-failed";

    pub const RESTART_RESTARTED: &str = "restart.restarted";
    pub const RESTART_ALL: &str = "restart.all";

    pub const ERROR_INVALID_MODULE: &str = "error.invalid-module";
    pub const ERROR_SPECIFY_MODULE: &str = "error.specify-module";
    pub const ERROR_SPECIFY_COMMAND: &str = "error.specify-command";
    pub const ERROR_IGNORED: &str = "error.ignored";
    pub const ERROR_NO_PERMISSION: &str = "error.no-permission";
    pub const ERROR_UNKNOWN_COMMAND: &str = "error.unknown-command";
    pub const ERROR_UNEXPECTED: &str = "error.unexpected";
    pub const ERROR_USAGE_COMMAND: &str = "error.usage.command";
    pub const ERROR_USAGE_DESCRIPTION: &str = "error.usage.description";
    pub const ERROR_USAGE_USAGE: &str = "error.usage.usage";

    pub const LIST_LIST: &str = "list.list";
    pub const INFO_HEADER: &str = "info.header";
    pub const INFO_VERSION: &str = "info.version";
    pub const INFO_AUTHORS: &str = "info.authors";
    pub const INFO_STATUS: &str = "info.status";
    pub const INFO_DEPENDS: &str = "info.depends";
    pub const INFO_SOFT_DEPENDS: &str = "info.softdepends";
    pub const USAGE_USAGE: &str = "usage.usage";
    pub const USAGE_NO_COMMANDS: &str = "usage.no-commands";
    pub const LOOKUP_FOUND: &str = "lookup.found";
    pub const LOOKUP_NOT_FOUND: &str = "lookup.not-found";
    pub const DUMP_DUMPED: &str = "dump.dumped";
    pub const DUMP_ERROR: &str = "dump.error";
    pub const HELP_HEADER: &str = "help.header";
    pub const HELP_FORMAT: &str = "help.format";
}

/// Success flag plus a message key for one operation.
///
/// Operations never panic or bubble errors to operators; whatever happened
/// is folded into one of these.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpResult {
    success: bool,
    message_key: Cow<'static, str>,
    args: Vec<String>,
}

impl OpResult {
    pub fn ok(message_key: impl Into<Cow<'static, str>>) -> Self {
        Self {
            success: true,
            message_key: message_key.into(),
            args: Vec::new(),
        }
    }

    pub fn fail(message_key: impl Into<Cow<'static, str>>) -> Self {
        Self {
            success: false,
            message_key: message_key.into(),
            args: Vec::new(),
        }
    }

    /// Append a positional argument for the message template.
    pub fn with_arg(mut self, arg: impl fmt::Display) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn is_failure(&self) -> bool {
        !self.success
    }

    pub fn message_key(&self) -> &str {
        &self.message_key
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for OpResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "ok" } else { "failed" };
        write!(f, "{status}: {}", self.message_key)?;
        if !self.args.is_empty() {
            write!(f, " [{}]", self.args.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_and_fail() {
        let ok = OpResult::ok(keys::ENABLE_ENABLED).with_arg("Alpha");
        assert!(ok.is_success());
        assert_eq!(ok.message_key(), "enable.enabled");
        assert_eq!(ok.args(), ["Alpha".to_string()]);

        let failed = OpResult::fail(keys::UNLOAD_GENTLE_FAILED);
        assert!(failed.is_failure());
        assert!(failed.args().is_empty());
    }

    #[test]
    fn test_display() {
        let result = OpResult::fail("load.cannot-find").with_arg("Ghost");
        assert_eq!(result.to_string(), "failed: load.cannot-find [Ghost]");
    }
}
