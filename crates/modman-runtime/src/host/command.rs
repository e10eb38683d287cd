//! Commands registered by modules.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use modman_kernel::{CommandOwner, ContextClosed, HostError, LoadContextId, ModuleCommand};
use modman_reload::CommandTableBridge;

use super::context::LoadContext;
use super::module::ModuleError;

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub label: String,
    pub args: Vec<String>,
}

impl CommandInvocation {
    /// Split `line` on whitespace. Returns `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let label = parts.next()?.to_string();
        Some(Self {
            label,
            args: parts.map(str::to_string).collect(),
        })
    }
}

/// Function run when a command is invoked.
pub type CommandExecutor =
    Arc<dyn Fn(&CommandInvocation) -> Result<String, ModuleError> + Send + Sync>;

/// A command as the host stores it.
///
/// The command keeps only a weak reference to the context its executor was
/// defined in. Once that context is closed the command is broken: every
/// invocation fails.
pub struct HostCommand {
    label: String,
    namespace: String,
    owner: CommandOwner,
    context: Weak<LoadContext>,
    context_id: LoadContextId,
    executor: CommandExecutor,
}

impl HostCommand {
    pub fn new(
        label: impl Into<String>,
        namespace: impl Into<String>,
        owner: CommandOwner,
        context: &Arc<LoadContext>,
        executor: CommandExecutor,
    ) -> Self {
        Self {
            label: label.into(),
            namespace: namespace.into(),
            owner,
            context: Arc::downgrade(context),
            context_id: context.id(),
            executor,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `namespace:label`.
    pub fn qualified_label(&self) -> String {
        format!("{}:{}", self.namespace, self.label)
    }

    pub fn context_id(&self) -> LoadContextId {
        self.context_id
    }

    pub fn is_broken(&self) -> bool {
        self.live_context().is_none()
    }

    fn live_context(&self) -> Option<Arc<LoadContext>> {
        self.context.upgrade().filter(|ctx| !ctx.is_closed())
    }

    pub fn execute(&self, invocation: &CommandInvocation) -> Result<String, HostError> {
        if self.live_context().is_none() {
            return Err(HostError::ContextClosed(format!(
                "{} ({})",
                self.qualified_label(),
                self.context_id
            )));
        }
        (self.executor)(invocation).map_err(|e| HostError::Callback {
            module: self.namespace.clone(),
            phase: "command",
            message: e.to_string(),
        })
    }
}

impl ModuleCommand for HostCommand {
    fn name(&self) -> &str {
        &self.label
    }

    fn owner(&self) -> CommandOwner {
        self.owner
    }

    fn defining_context(&self) -> Result<Option<LoadContextId>, ContextClosed> {
        match self.live_context() {
            Some(ctx) => Ok(Some(ctx.id())),
            None => Err(ContextClosed(self.context_id)),
        }
    }
}

impl fmt::Debug for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCommand")
            .field("label", &self.qualified_label())
            .field("owner", &self.owner)
            .field("context", &self.context_id)
            .finish()
    }
}

/// Host-native command storage.
pub type NativeCommands = HashMap<String, Arc<HostCommand>>;

/// Native storage and engine view kept in step.
pub type CommandMap = CommandTableBridge<NativeCommands>;

/// An empty command map labelled `label`.
pub fn command_map(label: &str) -> CommandMap {
    CommandTableBridge::wrap(label, NativeCommands::new(), |cmd: &Arc<HostCommand>| {
        cmd.clone() as Arc<dyn ModuleCommand>
    })
}
