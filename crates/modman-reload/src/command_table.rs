//! A command map that stays in step with a host-native map.
//!
//! Hosts keep commands in their own native representation. The reload engine
//! works on [`ModuleCommand`] views. [`CommandTableBridge`] keeps both under
//! one lock so every `put` or `remove` lands in both maps together.

use std::collections::HashMap;
use std::sync::Arc;

use modman_kernel::{CommandTable, ModuleCommand};
use parking_lot::Mutex;

/// A host's own command storage.
pub trait NativeCommandMap: Send {
    type Native: Clone + Send;

    fn native_entries(&self) -> Vec<(String, Self::Native)>;

    fn insert_native(&mut self, key: String, native: Self::Native) -> Option<Self::Native>;

    fn remove_native(&mut self, key: &str) -> Option<Self::Native>;

    fn get_native(&self, key: &str) -> Option<Self::Native>;

    fn contains_native(&self, key: &str) -> bool {
        self.get_native(key).is_some()
    }
}

impl<V: Clone + Send> NativeCommandMap for HashMap<String, V> {
    type Native = V;

    fn native_entries(&self) -> Vec<(String, V)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn insert_native(&mut self, key: String, native: V) -> Option<V> {
        self.insert(key, native)
    }

    fn remove_native(&mut self, key: &str) -> Option<V> {
        self.remove(key)
    }

    fn get_native(&self, key: &str) -> Option<V> {
        self.get(key).cloned()
    }

    fn contains_native(&self, key: &str) -> bool {
        self.contains_key(key)
    }
}

type Adapter<N> = Box<dyn Fn(&N) -> Arc<dyn ModuleCommand> + Send + Sync>;

struct Tables<M: NativeCommandMap> {
    view: HashMap<String, Arc<dyn ModuleCommand>>,
    native: M,
}

pub struct CommandTableBridge<M: NativeCommandMap> {
    label: String,
    adapt: Adapter<M::Native>,
    tables: Mutex<Tables<M>>,
}

impl<M: NativeCommandMap> CommandTableBridge<M> {
    /// Wrap `native`, building the view with `adapt`.
    pub fn wrap(
        label: impl Into<String>,
        native: M,
        adapt: impl Fn(&M::Native) -> Arc<dyn ModuleCommand> + Send + Sync + 'static,
    ) -> Self {
        let view = native
            .native_entries()
            .iter()
            .map(|(key, cmd)| (key.clone(), adapt(cmd)))
            .collect();
        Self {
            label: label.into(),
            adapt: Box::new(adapt),
            tables: Mutex::new(Tables { view, native }),
        }
    }

    pub fn put(&self, key: impl Into<String>, native: M::Native) -> Option<Arc<dyn ModuleCommand>> {
        let key = key.into();
        let view = (self.adapt)(&native);
        let mut tables = self.tables.lock();
        tables.native.insert_native(key.clone(), native);
        tables.view.insert(key, view)
    }

    /// Insert only if `key` is free. Returns whether it was inserted.
    pub fn put_if_absent(&self, key: impl Into<String>, native: M::Native) -> bool {
        let key = key.into();
        let mut tables = self.tables.lock();
        if tables.native.contains_native(&key) {
            return false;
        }
        let view = (self.adapt)(&native);
        tables.native.insert_native(key.clone(), native);
        tables.view.insert(key, view);
        true
    }

    pub fn remove(&self, key: &str) -> Option<Arc<dyn ModuleCommand>> {
        let mut tables = self.tables.lock();
        tables.native.remove_native(key);
        tables.view.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn ModuleCommand>> {
        self.tables.lock().view.get(key).cloned()
    }

    pub fn get_native(&self, key: &str) -> Option<M::Native> {
        self.tables.lock().native.get_native(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.tables.lock().view.contains_key(key)
    }

    /// Sorted keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.tables.lock().view.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.tables.lock().view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.lock().view.is_empty()
    }

    /// Rebuild the view from the native map.
    pub fn resync(&self) {
        let mut tables = self.tables.lock();
        let view = tables
            .native
            .native_entries()
            .iter()
            .map(|(key, cmd)| (key.clone(), (self.adapt)(cmd)))
            .collect();
        tables.view = view;
    }

    /// Read access to the native map.
    pub fn with_native<R>(&self, read: impl FnOnce(&M) -> R) -> R {
        read(&self.tables.lock().native)
    }
}

impl<M> CommandTable for CommandTableBridge<M>
where
    M: NativeCommandMap,
{
    fn label(&self) -> &str {
        &self.label
    }

    fn entries(&self) -> Vec<(String, Arc<dyn ModuleCommand>)> {
        let mut entries: Vec<(String, Arc<dyn ModuleCommand>)> = self
            .tables
            .lock()
            .view
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn remove(&self, key: &str) -> Option<Arc<dyn ModuleCommand>> {
        CommandTableBridge::remove(self, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeCommand;
    use modman_kernel::{LoadContextId, ModuleHandle};

    type Native = Arc<FakeCommand>;

    fn bridge(initial: HashMap<String, Native>) -> CommandTableBridge<HashMap<String, Native>> {
        CommandTableBridge::wrap("known-commands", initial, |cmd: &Native| {
            cmd.clone() as Arc<dyn ModuleCommand>
        })
    }

    fn command(name: &str) -> Native {
        Arc::new(FakeCommand::direct(
            name,
            ModuleHandle::new(1),
            Some(LoadContextId::new(1)),
        ))
    }

    #[test]
    fn test_wrap_builds_view() {
        let mut initial = HashMap::new();
        initial.insert("alpha:hello".to_string(), command("hello"));
        initial.insert("hello".to_string(), command("hello"));

        let bridge = bridge(initial);
        assert_eq!(bridge.len(), 2);
        assert_eq!(bridge.keys(), vec!["alpha:hello".to_string(), "hello".to_string()]);
        assert_eq!(bridge.get("hello").unwrap().name(), "hello");
    }

    #[test]
    fn test_put_and_remove_touch_both_maps() {
        let bridge = bridge(HashMap::new());
        assert!(bridge.put("hello", command("hello")).is_none());
        assert!(bridge.contains_key("hello"));
        assert!(bridge.with_native(|native| native.contains_key("hello")));

        assert!(CommandTableBridge::remove(&bridge, "hello").is_some());
        assert!(!bridge.contains_key("hello"));
        assert!(bridge.with_native(|native| native.is_empty()));
    }

    #[test]
    fn test_put_if_absent() {
        let bridge = bridge(HashMap::new());
        assert!(bridge.put_if_absent("hello", command("hello")));
        assert!(!bridge.put_if_absent("hello", command("other")));
        assert_eq!(bridge.get_native("hello").unwrap().name(), "hello");
    }

    #[test]
    fn test_command_table_entries_sorted() {
        let bridge = bridge(HashMap::new());
        bridge.put("zeta", command("zeta"));
        bridge.put("alpha", command("alpha"));

        let table: &dyn CommandTable = &bridge;
        let keys: Vec<String> = table.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["alpha".to_string(), "zeta".to_string()]);
        assert_eq!(table.label(), "known-commands");
        assert!(table.remove("alpha").is_some());
        assert_eq!(bridge.len(), 1);
    }
}
