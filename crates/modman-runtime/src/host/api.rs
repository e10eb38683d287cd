//! What module code sees of the host.

use std::sync::{Arc, Weak};

use modman_kernel::{CommandOwner, HostError, ModuleHandle, ModuleLogger};

use super::command::{CommandExecutor, CommandInvocation, HostCommand};
use super::context::LoadContext;
use super::listener::{Event, EventHandler};
use super::module::ModuleError;
use super::state::HostState;

/// Handed to every [`ModuleEntry`](super::ModuleEntry) callback.
///
/// The context holds the host weakly. Registrations made after the host
/// was dropped are ignored.
#[derive(Clone)]
pub struct ModuleContext {
    host: Weak<HostState>,
    module: String,
    handle: ModuleHandle,
    context: Arc<LoadContext>,
    logger: Arc<dyn ModuleLogger>,
}

impl ModuleContext {
    pub(crate) fn new(
        host: &Arc<HostState>,
        module: impl Into<String>,
        handle: ModuleHandle,
        context: Arc<LoadContext>,
    ) -> Self {
        Self {
            host: Arc::downgrade(host),
            module: module.into(),
            handle,
            context,
            logger: host.logger.clone(),
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module
    }

    pub fn handle(&self) -> ModuleHandle {
        self.handle
    }

    pub fn logger(&self) -> &Arc<dyn ModuleLogger> {
        &self.logger
    }

    /// Namespace commands are registered under: the lower-cased module name
    /// with spaces replaced by `_`.
    pub fn namespace(&self) -> String {
        self.module.to_lowercase().replace(' ', "_")
    }

    fn command(&self, label: &str, owner: CommandOwner, executor: CommandExecutor) -> HostCommand {
        HostCommand::new(label, self.namespace(), owner, &self.context, executor)
    }

    /// Register `label` owned by this module.
    ///
    /// The command is filed under `namespace:label` and, unless another
    /// module already holds it, under the bare `label`. Returns whether the
    /// bare label was free.
    pub fn register_command(
        &self,
        label: &str,
        executor: impl Fn(&CommandInvocation) -> Result<String, ModuleError> + Send + Sync + 'static,
    ) -> bool {
        self.register_with_owner(label, CommandOwner::Direct(self.handle), Arc::new(executor))
    }

    /// Register `label` without naming its owner, the way commands added
    /// through a shared registration helper arrive. Unload attributes such
    /// commands through their defining context.
    pub fn register_unattributed_command(
        &self,
        label: &str,
        executor: impl Fn(&CommandInvocation) -> Result<String, ModuleError> + Send + Sync + 'static,
    ) -> bool {
        self.register_with_owner(label, CommandOwner::Unattributed, Arc::new(executor))
    }

    fn register_with_owner(
        &self,
        label: &str,
        owner: CommandOwner,
        executor: CommandExecutor,
    ) -> bool {
        let Some(host) = self.host.upgrade() else {
            return false;
        };
        let command = Arc::new(self.command(label, owner, executor));
        host.commands.put(command.qualified_label(), command.clone());
        host.commands.put_if_absent(label, command)
    }

    /// Register `label` in the provider dispatcher table.
    ///
    /// Fails with [`HostError::StructureUnavailable`] on hosts without
    /// provider storage.
    pub fn register_dispatcher_command(
        &self,
        label: &str,
        executor: impl Fn(&CommandInvocation) -> Result<String, ModuleError> + Send + Sync + 'static,
    ) -> Result<(), HostError> {
        let host = self
            .host
            .upgrade()
            .ok_or_else(|| HostError::StructureUnavailable("host".to_string()))?;
        let providers = host
            .providers
            .as_ref()
            .ok_or_else(|| HostError::StructureUnavailable("provider storage".to_string()))?;
        let command = Arc::new(self.command(
            label,
            CommandOwner::Direct(self.handle),
            Arc::new(executor),
        ));
        providers
            .dispatcher()
            .put(command.qualified_label(), command.clone());
        providers.dispatcher().put_if_absent(label, command);
        Ok(())
    }

    /// Listen for `event`. Lower priorities run first.
    ///
    /// Fails with [`HostError::StructureUnavailable`] on hosts without a
    /// listener table.
    pub fn register_listener(
        &self,
        event: &str,
        priority: i32,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<(), HostError> {
        let host = self
            .host
            .upgrade()
            .ok_or_else(|| HostError::StructureUnavailable("host".to_string()))?;
        let listeners = host
            .listeners
            .as_ref()
            .ok_or_else(|| HostError::StructureUnavailable("listener table".to_string()))?;
        let handler: EventHandler = Arc::new(handler);
        listeners.register(event, self.handle, priority, handler);
        if let Some(providers) = host.providers.as_ref() {
            providers.cache_executor(format!("{event}#{}", self.handle.get()), self.context.id());
        }
        Ok(())
    }

    /// Ask to be consulted before this module is unloaded. Returning
    /// `false` from `predicate` vetoes the unload. Only the first
    /// registration counts.
    pub fn request_gentle_unload(
        &self,
        predicate: impl Fn() -> bool + Send + Sync + 'static,
    ) -> bool {
        match self.host.upgrade() {
            Some(host) => host
                .gentle
                .register_handle(self.handle, &self.module, predicate),
            None => false,
        }
    }

    /// Refuse every unload request.
    pub fn refuse_unload(&self) -> bool {
        self.request_gentle_unload(|| false)
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", &self.module)
            .field("handle", &self.handle)
            .field("context", &self.context.id())
            .finish()
    }
}
