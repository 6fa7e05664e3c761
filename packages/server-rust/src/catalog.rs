//! Registration of component factories.
//!
//! Discovery manifests only name components; the catalog maps those names to
//! factories supplied by the embedding application. A manifest naming an
//! unregistered factory is rejected before anything is instantiated.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use rapidfire_core::ServiceDescriptor;
use serde_json::Value;

use crate::context::CoreContext;
use crate::loader::{ServiceLoader, StaticLoader, DEFAULT_LOADER, STATIC_LOADER};
use crate::traits::{Loader, Middleware, Service};

/// Builds a loader from its manifest options.
pub type LoaderFactory = Arc<dyn Fn(&Value) -> anyhow::Result<Box<dyn Loader>> + Send + Sync>;

/// Builds a service from its descriptor. Used by the default loader.
pub type ServiceFactory =
    Arc<dyn Fn(&ServiceDescriptor, &CoreContext) -> anyhow::Result<Box<dyn Service>> + Send + Sync>;

/// Builds a middleware from its manifest options.
pub type MiddlewareFactory =
    Arc<dyn Fn(&Value) -> anyhow::Result<Box<dyn Middleware>> + Send + Sync>;

/// Name -> factory tables for loaders, services, and middlewares.
pub struct ComponentCatalog {
    loaders: DashMap<String, LoaderFactory>,
    services: DashMap<String, ServiceFactory>,
    middlewares: DashMap<String, MiddlewareFactory>,
}

impl ComponentCatalog {
    /// A catalog with the built-in loaders (`default` and `static`) registered.
    #[must_use]
    pub fn new() -> Self {
        let catalog = Self::empty();
        catalog.register_loader(DEFAULT_LOADER, |_| Ok(Box::new(ServiceLoader::new())));
        catalog.register_loader(STATIC_LOADER, |_| Ok(Box::new(StaticLoader::new())));
        catalog
    }

    /// A catalog with nothing registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            loaders: DashMap::new(),
            services: DashMap::new(),
            middlewares: DashMap::new(),
        }
    }

    /// Registers (or replaces) a loader factory.
    pub fn register_loader<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> anyhow::Result<Box<dyn Loader>> + Send + Sync + 'static,
    {
        self.loaders.insert(name.into(), Arc::new(factory));
    }

    /// Registers (or replaces) a service definition.
    pub fn register_service<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ServiceDescriptor, &CoreContext) -> anyhow::Result<Box<dyn Service>>
            + Send
            + Sync
            + 'static,
    {
        self.services.insert(name.into(), Arc::new(factory));
    }

    /// Registers (or replaces) a middleware factory.
    pub fn register_middleware<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> anyhow::Result<Box<dyn Middleware>> + Send + Sync + 'static,
    {
        self.middlewares.insert(name.into(), Arc::new(factory));
    }

    #[must_use]
    pub fn loader(&self, name: &str) -> Option<LoaderFactory> {
        self.loaders.get(name).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn service(&self, name: &str) -> Option<ServiceFactory> {
        self.services.get(name).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn middleware(&self, name: &str) -> Option<MiddlewareFactory> {
        self.middlewares.get(name).map(|entry| Arc::clone(entry.value()))
    }
}

impl Default for ComponentCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ComponentCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |keys: Vec<String>| {
            let mut keys = keys;
            keys.sort();
            keys
        };
        f.debug_struct("ComponentCatalog")
            .field("loaders", &names(self.loaders.iter().map(|e| e.key().clone()).collect()))
            .field("services", &names(self.services.iter().map(|e| e.key().clone()).collect()))
            .field(
                "middlewares",
                &names(self.middlewares.iter().map(|e| e.key().clone()).collect()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;

    use super::*;
    use crate::traits::RoutedService;

    struct Noop;

    impl Middleware for Noop {
        fn name(&self) -> &str {
            "noop"
        }
    }

    #[test]
    fn builtin_loaders_are_registered() {
        let catalog = ComponentCatalog::new();
        let default = catalog.loader("default").unwrap()(&Value::Null).unwrap();
        assert_eq!(default.key(), "default");
        let fixed = catalog.loader("static").unwrap()(&Value::Null).unwrap();
        assert_eq!(fixed.key(), "static");
        assert!(ComponentCatalog::empty().loader("default").is_none());
    }

    #[test]
    fn registered_factories_are_found_by_name() {
        let catalog = ComponentCatalog::empty();
        catalog.register_service("users", |descriptor, _ctx| {
            Ok(Box::new(RoutedService::new(descriptor.name.clone(), Router::new())))
        });
        catalog.register_middleware("noop", |_| Ok(Box::new(Noop)));

        assert!(catalog.service("users").is_some());
        assert!(catalog.service("orders").is_none());
        let middleware = catalog.middleware("noop").unwrap()(&Value::Null).unwrap();
        assert_eq!(middleware.name(), "noop");
        assert!(format!("{catalog:?}").contains("\"users\""));
    }
}
