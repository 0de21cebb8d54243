//! Runtime context shared by one invocation.
//!
//! A [`RuntimeContext`] is built at program entry and passed by reference to
//! everything that needs a collaborator. It owns a [`ServiceRegistry`], a
//! typed map where each service type has at most one instance. Default
//! collaborators are constructed lazily on first use.

use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::launcher::{BrowserLauncher, SystemBrowser};
use crate::paths::AppPaths;
use crate::prompt::{NonInteractive, Prompter};
use crate::store::{create_store, SecretStore, StoreBackend};
use crate::transport::{HttpTransport, ReqwestTransport, DEFAULT_TIMEOUT};

/// Typed map of shared services.
///
/// Lookups clone the stored value, so services are normally registered as
/// `Arc<dyn Trait>`. A single lock guards the map; [`get_or_init`] holds it
/// across construction so concurrent callers build a service at most once.
///
/// [`get_or_init`]: ServiceRegistry::get_or_init
#[derive(Default)]
pub struct ServiceRegistry {
    services: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registered instance of `T`, if any.
    pub fn get<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.services
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|service| service.downcast_ref::<T>())
            .cloned()
    }

    /// Register `value`, replacing any previous instance of `T`.
    pub fn set<T>(&self, value: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.services.lock().insert(TypeId::of::<T>(), Box::new(value));
    }

    /// The registered instance of `T`, constructing it with `init` if absent.
    ///
    /// `init` must not touch this registry.
    pub fn get_or_init<T, F>(&self, init: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let mut services = self.services.lock();
        if let Some(existing) = services
            .get(&TypeId::of::<T>())
            .and_then(|service| service.downcast_ref::<T>())
        {
            return existing.clone();
        }

        let value = init();
        services.insert(TypeId::of::<T>(), Box::new(value.clone()));
        value
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.services.lock().contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.services.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.lock().is_empty()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.len())
            .finish()
    }
}

/// Settings the default collaborators are built from.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub store_backend: StoreBackend,
    pub http_timeout: Duration,
    pub paths: AppPaths,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::default(),
            http_timeout: DEFAULT_TIMEOUT,
            paths: AppPaths::discover(),
        }
    }
}

/// Per-invocation context holding shared collaborators.
///
/// # Example
///
/// ```
/// use credforge_core::context::{ContextOptions, RuntimeContext};
/// use credforge_core::store::{MemoryStore, SecretStore, StoreBackend};
/// use std::sync::Arc;
///
/// let ctx = RuntimeContext::new(ContextOptions {
///     store_backend: StoreBackend::Memory,
///     ..ContextOptions::default()
/// });
/// let store: Arc<dyn SecretStore> = Arc::new(MemoryStore::new());
/// ctx.set_store(store.clone());
/// assert!(Arc::ptr_eq(&ctx.store(), &store));
/// ```
#[derive(Debug, Default)]
pub struct RuntimeContext {
    options: ContextOptions,
    services: ServiceRegistry,
}

impl RuntimeContext {
    pub fn new(options: ContextOptions) -> Self {
        Self {
            options,
            services: ServiceRegistry::new(),
        }
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn paths(&self) -> &AppPaths {
        &self.options.paths
    }

    /// The shared secret store, selected from [`ContextOptions::store_backend`].
    pub fn store(&self) -> Arc<dyn SecretStore> {
        self.services
            .get_or_init(|| create_store(self.options.store_backend, &self.options.paths))
    }

    pub fn set_store(&self, store: Arc<dyn SecretStore>) {
        self.services.set(store);
    }

    /// The shared HTTP transport.
    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        self.services.get_or_init(|| {
            Arc::new(ReqwestTransport::new(self.options.http_timeout)) as Arc<dyn HttpTransport>
        })
    }

    pub fn set_transport(&self, transport: Arc<dyn HttpTransport>) {
        self.services.set(transport);
    }

    /// The prompt collaborator. Without a registered prompter, prompts are
    /// answered as cancelled.
    pub fn prompter(&self) -> Arc<dyn Prompter> {
        self.services
            .get_or_init(|| Arc::new(NonInteractive) as Arc<dyn Prompter>)
    }

    pub fn set_prompter(&self, prompter: Arc<dyn Prompter>) {
        self.services.set(prompter);
    }

    /// The browser launcher.
    pub fn launcher(&self) -> Arc<dyn BrowserLauncher> {
        self.services
            .get_or_init(|| Arc::new(SystemBrowser) as Arc<dyn BrowserLauncher>)
    }

    pub fn set_launcher(&self, launcher: Arc<dyn BrowserLauncher>) {
        self.services.set(launcher);
    }

    /// Look up an arbitrary service by type.
    pub fn get_service<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.services.get()
    }

    /// Register an arbitrary service, replacing any previous instance.
    pub fn set_service<T>(&self, value: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.services.set(value);
    }
}
