//! Type-keyed service registry.
//!
//! Built once during start-up: the bootstrap registers every capability and
//! each component pulls what it needs at construction time.

use std::any::{Any, TypeId, type_name};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::RegistryError;

/// Thread-safe map from service type to a shared instance.
///
/// Services are stored as `Arc<T>`, so trait objects register under their
/// `dyn` type: `registry.register::<dyn ModuleLogger>(logger)`.
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `instance` as the `T` service. Returns `true` if a previous
    /// instance was replaced.
    pub fn register<T>(&self, instance: Arc<T>) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services
            .insert(TypeId::of::<T>(), Box::new(instance))
            .is_some()
    }

    /// Look up a required service.
    ///
    /// A missing service is a wiring mistake, so this returns an error the
    /// caller is expected to propagate rather than recover from.
    pub fn get<T>(&self) -> Result<Arc<T>, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get_optional::<T>()
            .ok_or(RegistryError::NotRegistered(type_name::<T>()))
    }

    pub fn get_optional<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().downcast_ref::<Arc<T>>().cloned())
    }

    pub fn is_registered<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services.contains_key(&TypeId::of::<T>())
    }

    /// Remove the `T` service. Returns `true` if one was registered.
    pub fn unregister<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn clear(&self) {
        self.services.clear();
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.services.len())
            .finish()
    }
}
