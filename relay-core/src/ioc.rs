//! Explicit service location.
//!
//! Services are registered on a [`ServiceCollection`], frozen into a
//! [`ServiceProvider`] and resolved by type. [`Ioc`] is an injectable context
//! holding a provider that can be configured exactly once; it is meant to be
//! created by the host and passed to whoever needs it.

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::IocError;

type AnyService = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&ServiceProvider) -> AnyService + Send + Sync>;

// Lazy singletons this thread is currently building, keyed by provider.
thread_local! {
    static BUILDING: RefCell<Vec<(usize, TypeId)>> = const { RefCell::new(Vec::new()) };
}

/// Marks a lazy singleton as under construction on this thread.
struct Building {
    key: (usize, TypeId),
}

impl Building {
    /// `None` when the same singleton is already being built further up the
    /// stack.
    fn enter(key: (usize, TypeId)) -> Option<Self> {
        BUILDING.with(|building| {
            let mut building = building.borrow_mut();
            if building.contains(&key) {
                return None;
            }
            building.push(key);
            Some(Self { key })
        })
    }
}

impl Drop for Building {
    fn drop(&mut self) {
        BUILDING.with(|building| building.borrow_mut().retain(|key| *key != self.key));
    }
}

enum Registration {
    Singleton(AnyService),
    /// Built on first resolution, then shared.
    Lazy {
        factory: Factory,
        instance: OnceLock<AnyService>,
    },
    Transient(Factory),
}

struct Entry {
    name: &'static str,
    registration: Registration,
}

/// Mutable set of registrations.
#[derive(Default)]
pub struct ServiceCollection {
    entries: HashMap<TypeId, Entry>,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing instance. A later registration of the same type
    /// replaces an earlier one.
    pub fn add_singleton<T: Any + Send + Sync>(self, service: T) -> Self {
        self.insert::<T>(Registration::Singleton(Arc::new(service)))
    }

    /// Register a factory invoked once, on first resolution.
    pub fn add_lazy_singleton<T, F>(self, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&ServiceProvider) -> T + Send + Sync + 'static,
    {
        self.insert::<T>(Registration::Lazy {
            factory: Arc::new(move |provider: &ServiceProvider| -> AnyService {
                Arc::new(factory(provider))
            }),
            instance: OnceLock::new(),
        })
    }

    /// Register a factory invoked on every resolution.
    pub fn add_transient<T, F>(self, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&ServiceProvider) -> T + Send + Sync + 'static,
    {
        self.insert::<T>(Registration::Transient(Arc::new(
            move |provider: &ServiceProvider| -> AnyService { Arc::new(factory(provider)) },
        )))
    }

    fn insert<T: Any>(mut self, registration: Registration) -> Self {
        self.entries.insert(
            TypeId::of::<T>(),
            Entry {
                name: type_name::<T>(),
                registration,
            },
        );
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(self) -> ServiceProvider {
        ServiceProvider {
            entries: Arc::new(self.entries),
        }
    }
}

/// Immutable, cheaply cloneable registry resolving services by type.
///
/// A lazy singleton factory that resolves its own type gets
/// [`IocError::RecursiveResolution`] instead of blocking forever.
#[derive(Clone)]
pub struct ServiceProvider {
    entries: Arc<HashMap<TypeId, Entry>>,
}

impl ServiceProvider {
    pub fn get_service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.resolve::<T>().ok()
    }

    pub fn get_required_service<T: Any + Send + Sync>(&self) -> Result<Arc<T>, IocError> {
        self.resolve::<T>()
    }

    fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>, IocError> {
        let id = TypeId::of::<T>();
        let entry = self
            .entries
            .get(&id)
            .ok_or(IocError::ServiceNotRegistered(type_name::<T>()))?;
        let service = match &entry.registration {
            Registration::Singleton(service) => Arc::clone(service),
            Registration::Lazy { factory, instance } => match instance.get() {
                Some(service) => Arc::clone(service),
                None => {
                    let key = (Arc::as_ptr(&self.entries) as usize, id);
                    let Some(_building) = Building::enter(key) else {
                        tracing::warn!(target: "relay-core::Ioc", "{} resolved while it is being built", entry.name);
                        return Err(IocError::RecursiveResolution(entry.name));
                    };
                    Arc::clone(instance.get_or_init(|| factory(self)))
                }
            },
            Registration::Transient(factory) => factory(self),
        };
        service
            .downcast::<T>()
            .map_err(|_| IocError::ServiceNotRegistered(entry.name))
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.entries.values().map(|entry| entry.name))
            .finish()
    }
}

/// One-time configurable holder of a [`ServiceProvider`].
#[derive(Default)]
pub struct Ioc {
    provider: OnceLock<ServiceProvider>,
}

impl Ioc {
    pub const fn new() -> Self {
        Self {
            provider: OnceLock::new(),
        }
    }

    /// Install the provider. Fails if one was already installed.
    pub fn configure_services(&self, provider: ServiceProvider) -> Result<(), IocError> {
        self.provider
            .set(provider)
            .map_err(|_| IocError::AlreadyConfigured)?;
        tracing::debug!(target: "relay-core::Ioc", "service provider configured");
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.provider.get().is_some()
    }

    pub fn provider(&self) -> Result<&ServiceProvider, IocError> {
        self.provider.get().ok_or(IocError::NotConfigured)
    }

    pub fn get_service<T: Any + Send + Sync>(&self) -> Result<Option<Arc<T>>, IocError> {
        Ok(self.provider()?.get_service::<T>())
    }

    pub fn get_required_service<T: Any + Send + Sync>(&self) -> Result<Arc<T>, IocError> {
        self.provider()?.get_required_service::<T>()
    }
}
