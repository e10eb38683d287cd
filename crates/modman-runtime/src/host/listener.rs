//! Event listeners registered by modules.

use std::collections::HashMap;
use std::sync::Arc;

use modman_kernel::{ListenerTable, ModuleHandle};
use parking_lot::RwLock;

/// An event fired through the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub payload: String,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
struct Registration {
    owner: ModuleHandle,
    priority: i32,
    handler: EventHandler,
}

/// Event name to registered handlers.
#[derive(Default)]
pub struct ListenerRegistry {
    handlers: RwLock<HashMap<String, Vec<Registration>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`. Lower priorities run first.
    pub fn register(
        &self,
        event: impl Into<String>,
        owner: ModuleHandle,
        priority: i32,
        handler: EventHandler,
    ) {
        let mut handlers = self.handlers.write();
        let list = handlers.entry(event.into()).or_default();
        list.push(Registration {
            owner,
            priority,
            handler,
        });
        list.sort_by_key(|r| r.priority);
    }

    /// Run every handler for `event`. Returns how many ran.
    pub fn fire(&self, event: &Event) -> usize {
        let registrations: Vec<Registration> = self
            .handlers
            .read()
            .get(&event.name)
            .cloned()
            .unwrap_or_default();
        for registration in &registrations {
            (registration.handler)(event);
        }
        registrations.len()
    }

    /// Drop every handler `owner` registered.
    pub fn unregister_owner(&self, owner: ModuleHandle) -> usize {
        self.retain_owners(&mut |handle| handle != owner)
    }

    pub fn count_for(&self, owner: ModuleHandle) -> usize {
        self.handlers
            .read()
            .values()
            .flatten()
            .filter(|r| r.owner == owner)
            .count()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ListenerTable for ListenerRegistry {
    fn retain_owners(&self, keep: &mut dyn FnMut(ModuleHandle) -> bool) -> usize {
        let mut handlers = self.handlers.write();
        let mut removed = 0;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|r| keep(r.owner));
            removed += before - list.len();
        }
        handlers.retain(|_, list| !list.is_empty());
        removed
    }
}
