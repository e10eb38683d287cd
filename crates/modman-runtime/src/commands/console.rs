use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use modman_kernel::{
    Module, ModuleLogger, ModuleManager, OpResult, RegistryError, ServiceRegistry, keys,
};
use tracing::debug;

use super::sender::CommandSender;

/// File `dump` writes into the data folder.
pub const VERSIONS_FILE: &str = "versions.txt";

/// Metadata of one operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorCommand {
    pub name: &'static str,
    pub description: &'static str,
    pub usage: &'static str,
    /// Whether `all` / `*` is accepted in place of a module.
    pub accepts_all: bool,
}

impl OperatorCommand {
    pub fn permission(&self) -> String {
        format!("modman.{}", self.name)
    }

    pub fn all_permission(&self) -> String {
        format!("modman.{}.all", self.name)
    }
}

const fn command(
    name: &'static str,
    description: &'static str,
    usage: &'static str,
    accepts_all: bool,
) -> OperatorCommand {
    OperatorCommand {
        name,
        description,
        usage,
        accepts_all,
    }
}

pub const COMMANDS: [OperatorCommand; 12] = [
    command("help", "Displays help information.", "help", false),
    command("list", "List all modules.", "list [-v]", false),
    command("info", "View information on a module.", "info <module>", false),
    command("dump", "Dump modules and versions to file.", "dump", false),
    command("usage", "List commands a module has registered.", "usage <module>", false),
    command("lookup", "Find the module a command is registered to.", "lookup <command>", false),
    command("enable", "Enable a module.", "enable <module|all>", true),
    command("disable", "Disable a module.", "disable <module|all>", true),
    command("restart", "Restart (disable/enable) a module.", "restart <module|all>", true),
    command("load", "Load a module.", "load <module>", false),
    command("unload", "Unload a module.", "unload <module>", false),
    command("reload", "Reload (unload/load) a module.", "reload <module|all>", true),
];

fn find_command(label: &str) -> Option<&'static OperatorCommand> {
    COMMANDS.iter().find(|c| c.name.eq_ignore_ascii_case(label))
}

fn is_all(arg: &str) -> bool {
    arg.eq_ignore_ascii_case("all") || arg == "*"
}

/// Any `-x` style argument containing `flag`.
fn has_flag(args: &[String], flag: char) -> bool {
    args.iter()
        .any(|a| a.len() > 1 && a.starts_with('-') && a[1..].contains(flag))
}

fn send_result(sender: &dyn CommandSender, result: &OpResult) {
    sender.send(result.message_key(), result.args());
}

/// Parses operator command lines and runs them against the manager.
///
/// Commands mutate host state: run [`OperatorConsole::execute`] on the
/// synchronous context.
pub struct OperatorConsole {
    manager: Arc<dyn ModuleManager>,
    logger: Arc<dyn ModuleLogger>,
    data_folder: PathBuf,
}

impl OperatorConsole {
    pub fn new(
        manager: Arc<dyn ModuleManager>,
        logger: Arc<dyn ModuleLogger>,
        data_folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            manager,
            logger,
            data_folder: data_folder.into(),
        }
    }

    pub fn from_registry(
        registry: &ServiceRegistry,
        data_folder: impl Into<PathBuf>,
    ) -> Result<Self, RegistryError> {
        Ok(Self::new(
            registry.get::<dyn ModuleManager>()?,
            registry.get::<dyn ModuleLogger>()?,
            data_folder,
        ))
    }

    pub fn data_folder(&self) -> &Path {
        &self.data_folder
    }

    /// Run one command line. A blank line shows the help. Returns `false`
    /// if the command is unknown.
    pub fn execute(&self, sender: &dyn CommandSender, line: &str) -> bool {
        let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        let Some(label) = args.first() else {
            self.help(sender);
            return true;
        };
        let Some(command) = find_command(label) else {
            sender.send(keys::ERROR_UNKNOWN_COMMAND, std::slice::from_ref(label));
            return false;
        };
        if !self.has_permission(sender, &command.permission()) {
            sender.send(keys::ERROR_NO_PERMISSION, &[]);
            return true;
        }
        debug!("Operator command: {line}");

        match command.name {
            "help" => self.help(sender),
            "list" => self.list(sender, &args),
            "info" => self.info(sender, command, &args),
            "dump" => self.dump(sender),
            "usage" => self.usage(sender, command, &args),
            "lookup" => self.lookup(sender, command, &args),
            "enable" => self.enable(sender, command, &args),
            "disable" => self.disable(sender, command, &args),
            "restart" => self.restart(sender, command, &args),
            "load" => self.load(sender, command, &args),
            "unload" => self.unload(sender, command, &args),
            "reload" => self.reload(sender, command, &args),
            _ => {}
        }
        true
    }

    fn has_permission(&self, sender: &dyn CommandSender, permission: &str) -> bool {
        sender.is_console() || sender.has_permission(permission)
    }

    fn send_usage(&self, sender: &dyn CommandSender, command: &OperatorCommand) {
        sender.send_message(false, keys::ERROR_USAGE_COMMAND, &[command.name.to_string()]);
        sender.send_message(
            false,
            keys::ERROR_USAGE_DESCRIPTION,
            &[command.description.to_string()],
        );
        sender.send_message(false, keys::ERROR_USAGE_USAGE, &[command.usage.to_string()]);
    }

    fn validate_arguments(
        &self,
        sender: &dyn CommandSender,
        command: &OperatorCommand,
        args: &[String],
        min: usize,
    ) -> bool {
        if args.len() < min {
            sender.send(keys::ERROR_SPECIFY_MODULE, &[]);
            self.send_usage(sender, command);
            return false;
        }
        true
    }

    /// Resolve the module named by `args[1..]`, reporting unknown and
    /// ignored modules.
    fn target(
        &self,
        sender: &dyn CommandSender,
        command: &OperatorCommand,
        args: &[String],
    ) -> Option<Arc<dyn Module>> {
        let Some(module) = self.manager.module_by_args(args, 1) else {
            sender.send(keys::ERROR_INVALID_MODULE, &[]);
            self.send_usage(sender, command);
            return None;
        };
        if self.manager.is_ignored(module.as_ref()) {
            sender.send(keys::ERROR_IGNORED, &[]);
            return None;
        }
        Some(module)
    }

    /// Handles `all` / `*`. Returns `None` when `args[1]` names a module.
    fn all_requested(
        &self,
        sender: &dyn CommandSender,
        command: &OperatorCommand,
        args: &[String],
    ) -> Option<bool> {
        if !command.accepts_all || !args.get(1).is_some_and(|a| is_all(a)) {
            return None;
        }
        if !self.has_permission(sender, &command.all_permission()) {
            sender.send(keys::ERROR_NO_PERMISSION, &[]);
            return Some(false);
        }
        Some(true)
    }

    fn help(&self, sender: &dyn CommandSender) {
        sender.send_message(false, keys::HELP_HEADER, &[]);
        for command in &COMMANDS {
            if !self.has_permission(sender, &command.permission()) {
                continue;
            }
            sender.send_message(
                false,
                keys::HELP_FORMAT,
                &[command.usage.to_string(), command.description.to_string()],
            );
        }
    }

    fn list(&self, sender: &dyn CommandSender, args: &[String]) {
        let include_versions = has_flag(args, 'v');
        let mut names: Vec<String> = self
            .manager
            .modules()
            .iter()
            .map(|m| self.manager.formatted_name(m.as_ref(), include_versions))
            .collect();
        names.sort_by_key(|n| n.to_lowercase());
        sender.send(keys::LIST_LIST, &[names.len().to_string(), names.join("&7, ")]);
    }

    fn info(&self, sender: &dyn CommandSender, command: &OperatorCommand, args: &[String]) {
        if !self.validate_arguments(sender, command, args, 2) {
            return;
        }
        let Some(module) = self.manager.module_by_args(args, 1) else {
            sender.send(keys::ERROR_INVALID_MODULE, &[]);
            self.send_usage(sender, command);
            return;
        };
        let status = if module.is_enabled() {
            "Enabled"
        } else {
            "Disabled"
        };
        sender.send(keys::INFO_HEADER, &[module.name().to_string()]);
        sender.send_message(false, keys::INFO_VERSION, &[module.version().to_string()]);
        sender.send_message(false, keys::INFO_AUTHORS, &[module.authors().join(", ")]);
        sender.send_message(false, keys::INFO_STATUS, &[status.to_string()]);
        if !module.depend().is_empty() {
            sender.send_message(false, keys::INFO_DEPENDS, &[module.depend().join(", ")]);
        }
        if !module.soft_depend().is_empty() {
            sender.send_message(
                false,
                keys::INFO_SOFT_DEPENDS,
                &[module.soft_depend().join(", ")],
            );
        }
    }

    /// One `name vversion - Enabled|Disabled` line per module.
    pub fn dump_lines(&self) -> Vec<String> {
        let mut modules = self.manager.modules();
        modules.sort_by_key(|m| m.name().to_lowercase());
        modules
            .iter()
            .map(|m| {
                let state = if m.is_enabled() { "Enabled" } else { "Disabled" };
                format!("{} - {state}", m.full_name())
            })
            .collect()
    }

    fn write_dump(&self, path: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_folder)?;
        let mut writer = BufWriter::new(File::create(path)?);
        for line in self.dump_lines() {
            writeln!(writer, "{line}")?;
        }
        writer.flush()
    }

    fn dump(&self, sender: &dyn CommandSender) {
        let path = self.data_folder.join(VERSIONS_FILE);
        match self.write_dump(&path) {
            Ok(()) => sender.send(keys::DUMP_DUMPED, &[VERSIONS_FILE.to_string()]),
            Err(e) => {
                sender.send(keys::DUMP_ERROR, &[]);
                self.logger.severe_with_cause(
                    &format!("Failed to write dump file: {}", path.display()),
                    &e,
                );
            }
        }
    }

    fn usage(&self, sender: &dyn CommandSender, command: &OperatorCommand, args: &[String]) {
        if !self.validate_arguments(sender, command, args, 2) {
            return;
        }
        let Some(module) = self.manager.module_by_args(args, 1) else {
            sender.send(keys::ERROR_INVALID_MODULE, &[]);
            self.send_usage(sender, command);
            return;
        };
        let usages = self.manager.usages(module.as_ref());
        if usages.is_empty() {
            sender.send(keys::USAGE_NO_COMMANDS, &[module.name().to_string()]);
        } else {
            sender.send(
                keys::USAGE_USAGE,
                &[module.name().to_string(), usages.join(", ")],
            );
        }
    }

    fn lookup(&self, sender: &dyn CommandSender, command: &OperatorCommand, args: &[String]) {
        let Some(label) = args.get(1) else {
            sender.send(keys::ERROR_SPECIFY_COMMAND, &[]);
            self.send_usage(sender, command);
            return;
        };
        let owners = self.manager.find_by_command(label);
        if owners.is_empty() {
            sender.send(keys::LOOKUP_NOT_FOUND, std::slice::from_ref(label));
        } else {
            sender.send(keys::LOOKUP_FOUND, &[label.clone(), owners.join(", ")]);
        }
    }

    fn enable(&self, sender: &dyn CommandSender, command: &OperatorCommand, args: &[String]) {
        if !self.validate_arguments(sender, command, args, 2) {
            return;
        }
        match self.all_requested(sender, command, args) {
            Some(true) => return send_result(sender, &self.manager.enable_all()),
            Some(false) => return,
            None => {}
        }
        if let Some(module) = self.target(sender, command, args) {
            send_result(sender, &self.manager.enable(module.as_ref()));
        }
    }

    fn disable(&self, sender: &dyn CommandSender, command: &OperatorCommand, args: &[String]) {
        if !self.validate_arguments(sender, command, args, 2) {
            return;
        }
        match self.all_requested(sender, command, args) {
            Some(true) => return send_result(sender, &self.manager.disable_all()),
            Some(false) => return,
            None => {}
        }
        if let Some(module) = self.target(sender, command, args) {
            send_result(sender, &self.manager.disable(module.as_ref()));
        }
    }

    fn restart(&self, sender: &dyn CommandSender, command: &OperatorCommand, args: &[String]) {
        if !self.validate_arguments(sender, command, args, 2) {
            return;
        }
        match self.all_requested(sender, command, args) {
            Some(true) => {
                let _ = self.manager.disable_all();
                let _ = self.manager.enable_all();
                return sender.send(keys::RESTART_ALL, &[]);
            }
            Some(false) => return,
            None => {}
        }
        let Some(module) = self.target(sender, command, args) else {
            return;
        };
        let result = self.manager.disable(module.as_ref());
        if result.is_failure() {
            return send_result(sender, &result);
        }
        let result = self.manager.enable(module.as_ref());
        if result.is_failure() {
            return send_result(sender, &result);
        }
        sender.send(keys::RESTART_RESTARTED, &[module.name().to_string()]);
    }

    fn load(&self, sender: &dyn CommandSender, command: &OperatorCommand, args: &[String]) {
        if !self.validate_arguments(sender, command, args, 2) {
            return;
        }
        let name = args[1..].join(" ");
        if self.manager.is_ignored_name(&name) {
            sender.send(keys::ERROR_IGNORED, &[]);
            return;
        }
        send_result(sender, &self.manager.load(&name));
    }

    fn unload(&self, sender: &dyn CommandSender, command: &OperatorCommand, args: &[String]) {
        if !self.validate_arguments(sender, command, args, 2) {
            return;
        }
        if let Some(module) = self.target(sender, command, args) {
            send_result(sender, &self.manager.unload(module.as_ref()));
        }
    }

    fn reload(&self, sender: &dyn CommandSender, command: &OperatorCommand, args: &[String]) {
        if !self.validate_arguments(sender, command, args, 2) {
            return;
        }
        match self.all_requested(sender, command, args) {
            Some(true) => return self.reload_all(sender),
            Some(false) => return,
            None => {}
        }
        if let Some(module) = self.target(sender, command, args) {
            send_result(sender, &self.manager.reload(module.name()));
        }
    }

    fn reload_all(&self, sender: &dyn CommandSender) {
        let mut failed = Vec::new();
        for module in self.manager.modules() {
            if self.manager.is_ignored(module.as_ref()) {
                continue;
            }
            let result = self.manager.reload(module.name());
            send_result(sender, &result);
            if result.is_failure() {
                failed.push(module.name().to_string());
            }
        }
        if failed.is_empty() {
            sender.send(keys::RELOAD_ALL, &[]);
        } else {
            sender.send(keys::RELOAD_ALL_FAILED, &[failed.join(", ")]);
        }
    }
}

impl std::fmt::Debug for OperatorConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorConsole")
            .field("data_folder", &self.data_folder)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let args = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(has_flag(&args(&["list", "-v"]), 'v'));
        assert!(has_flag(&args(&["list", "-xv"]), 'v'));
        assert!(!has_flag(&args(&["list", "v"]), 'v'));
        assert!(!has_flag(&args(&["list", "-"]), 'v'));
    }

    #[test]
    fn test_command_table() {
        assert_eq!(find_command("RELOAD").map(|c| c.name), Some("reload"));
        assert!(find_command("check").is_none());
        assert!(is_all("All") && is_all("*") && !is_all("alpha"));
        let reload = find_command("reload").unwrap();
        assert_eq!(reload.permission(), "modman.reload");
        assert_eq!(reload.all_permission(), "modman.reload.all");
    }
}
