//! Teardown flavours.
//!
//! Both flavours share the unload sequence. They differ in the command
//! tables walked when scrubbing commands and in the cleanup run after the
//! module left every list.

use error_stack::Report;
use modman_kernel::{CommandTable, HostError, HostResult, Module};

use super::state::HostState;

pub trait TeardownFlavor: Send + Sync + 'static {
    fn label(&self) -> &'static str;

    /// Whether hosts built with this flavour get provider storage unless
    /// the builder says otherwise.
    fn provider_storage(&self) -> bool {
        false
    }

    /// Command tables scrubbed for the unloaded module.
    fn command_tables<'a>(&self, state: &'a HostState) -> HostResult<Vec<&'a dyn CommandTable>>;

    fn extra_cleanup(&self, state: &HostState, module: &dyn Module) -> HostResult<()> {
        let _ = (state, module);
        Ok(())
    }
}

/// Hosts with only the classic command table.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassicFlavor;

impl TeardownFlavor for ClassicFlavor {
    fn label(&self) -> &'static str {
        "classic"
    }

    fn command_tables<'a>(&self, state: &'a HostState) -> HostResult<Vec<&'a dyn CommandTable>> {
        Ok(vec![&state.commands as &dyn CommandTable])
    }
}

/// Hosts running the provider subsystem next to the classic table.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderFlavor;

impl ProviderFlavor {
    fn storage(state: &HostState) -> HostResult<&super::provider::ProviderStorage> {
        state.providers.as_ref().ok_or_else(|| {
            Report::new(HostError::StructureUnavailable(
                "provider storage".to_string(),
            ))
        })
    }
}

impl TeardownFlavor for ProviderFlavor {
    fn label(&self) -> &'static str {
        "provider"
    }

    fn provider_storage(&self) -> bool {
        true
    }

    fn command_tables<'a>(&self, state: &'a HostState) -> HostResult<Vec<&'a dyn CommandTable>> {
        let storage = Self::storage(state)?;
        Ok(vec![
            &state.commands as &dyn CommandTable,
            storage.dispatcher() as &dyn CommandTable,
        ])
    }

    fn extra_cleanup(&self, state: &HostState, module: &dyn Module) -> HostResult<()> {
        Self::storage(state)?.remove_module(module);
        Ok(())
    }
}
