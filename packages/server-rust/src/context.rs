//! Shared state injected into every component.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rapidfire_core::{CoreConfig, Environment};

use crate::discovery::InstalledMiddleware;
use crate::network::{LifecycleController, LifecycleState};
use crate::traits::{DataStore, Loader, Service};

// ---------------------------------------------------------------------------
// CoreContext
// ---------------------------------------------------------------------------

/// Back-reference to the orchestrator handed to loaders and middlewares.
///
/// Holds the component registry weakly: components never keep the
/// orchestrator alive.
#[derive(Clone)]
pub struct CoreContext {
    config: Arc<CoreConfig>,
    environment: Arc<Environment>,
    stores: Arc<[Arc<dyn DataStore>]>,
    components: Weak<Components>,
    lifecycle: Arc<LifecycleController>,
}

impl CoreContext {
    pub(crate) fn new(
        config: Arc<CoreConfig>,
        environment: Arc<Environment>,
        stores: Arc<[Arc<dyn DataStore>]>,
        components: &Arc<Components>,
        lifecycle: Arc<LifecycleController>,
    ) -> Self {
        Self {
            config,
            environment,
            stores,
            components: Arc::downgrade(components),
            lifecycle,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Data stores owned by the orchestrator.
    #[must_use]
    pub fn stores(&self) -> &[Arc<dyn DataStore>] {
        &self.stores
    }

    /// Looks up an owned data store by name.
    #[must_use]
    pub fn store(&self, name: &str) -> Option<Arc<dyn DataStore>> {
        self.stores.iter().find(|s| s.name() == name).cloned()
    }

    /// The live component registry, `None` once the orchestrator is dropped.
    #[must_use]
    pub fn components(&self) -> Option<Arc<Components>> {
        self.components.upgrade()
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }
}

impl fmt::Debug for CoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreContext")
            .field("config", &self.config)
            .field("environment", &self.environment)
            .field("stores", &self.stores.len())
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// Loaders, services, and middlewares installed by the last ignition.
///
/// Written only while igniting; read-only while serving.
#[derive(Default)]
pub struct Components {
    loaders: RwLock<Vec<Arc<dyn Loader>>>,
    services: RwLock<Vec<Arc<dyn Service>>>,
    middlewares: RwLock<Vec<InstalledMiddleware>>,
}

impl Components {
    #[must_use]
    pub fn loaders(&self) -> Vec<Arc<dyn Loader>> {
        self.loaders.read().clone()
    }

    pub(crate) fn replace_loaders(&self, loaders: Vec<Arc<dyn Loader>>) {
        *self.loaders.write() = loaders;
    }

    #[must_use]
    pub fn services(&self) -> Vec<Arc<dyn Service>> {
        self.services.read().clone()
    }

    pub(crate) fn replace_services(&self, services: Vec<Arc<dyn Service>>) {
        *self.services.write() = services;
    }

    /// Middlewares in sorted order.
    #[must_use]
    pub fn middlewares(&self) -> Vec<InstalledMiddleware> {
        self.middlewares.read().clone()
    }

    pub(crate) fn replace_middlewares(&self, middlewares: Vec<InstalledMiddleware>) {
        *self.middlewares.write() = middlewares;
    }

    /// Copies the current lists so a failed ignition can put them back.
    pub(crate) fn snapshot(&self) -> ComponentsSnapshot {
        ComponentsSnapshot {
            loaders: self.loaders(),
            services: self.services(),
            middlewares: self.middlewares(),
        }
    }

    pub(crate) fn restore(&self, snapshot: ComponentsSnapshot) {
        self.replace_loaders(snapshot.loaders);
        self.replace_services(snapshot.services);
        self.replace_middlewares(snapshot.middlewares);
    }

    #[must_use]
    pub fn loader_keys(&self) -> Vec<String> {
        self.loaders.read().iter().map(|l| l.key().to_owned()).collect()
    }

    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        self.services.read().iter().map(|s| s.name().to_owned()).collect()
    }

    #[must_use]
    pub fn middleware_names(&self) -> Vec<String> {
        self.middlewares.read().iter().map(|m| m.name.clone()).collect()
    }
}

/// Lists captured by [`Components::snapshot`].
pub(crate) struct ComponentsSnapshot {
    loaders: Vec<Arc<dyn Loader>>,
    services: Vec<Arc<dyn Service>>,
    middlewares: Vec<InstalledMiddleware>,
}

impl fmt::Debug for Components {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Components")
            .field("loaders", &self.loader_keys())
            .field("services", &self.service_names())
            .field("middlewares", &self.middleware_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;

    use super::*;
    use crate::loader::{ServiceLoader, StaticLoader};
    use crate::traits::RoutedService;

    struct Named(&'static str);

    #[async_trait::async_trait]
    impl DataStore for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn context(components: &Arc<Components>) -> CoreContext {
        let stores: Vec<Arc<dyn DataStore>> = vec![Arc::new(Named("db")), Arc::new(Named("cache"))];
        CoreContext::new(
            Arc::new(CoreConfig::default()),
            Arc::new(Environment::capture()),
            stores.into(),
            components,
            Arc::new(LifecycleController::new()),
        )
    }

    #[test]
    fn stores_are_reachable_by_name() {
        let components = Arc::new(Components::default());
        let ctx = context(&components);
        assert_eq!(ctx.stores().len(), 2);
        assert!(ctx.store("cache").is_some());
        assert!(ctx.store("queue").is_none());
        assert_eq!(ctx.state(), LifecycleState::Constructed);
    }

    #[test]
    fn back_reference_does_not_own_components() {
        let components = Arc::new(Components::default());
        let ctx = context(&components);
        assert!(ctx.components().is_some());
        drop(components);
        assert!(ctx.components().is_none());
    }

    #[test]
    fn restore_puts_back_the_snapshot() {
        let components = Components::default();
        let default: Arc<dyn Loader> = Arc::new(ServiceLoader::new());
        components.replace_loaders(vec![Arc::clone(&default)]);
        let before = components.snapshot();

        let static_loader: Arc<dyn Loader> = Arc::new(StaticLoader::new());
        let users: Arc<dyn Service> = Arc::new(RoutedService::new("users", Router::new()));
        components.replace_loaders(vec![static_loader]);
        components.replace_services(vec![users]);
        assert_eq!(components.loader_keys(), ["static"]);
        assert_eq!(components.service_names(), ["users"]);

        components.restore(before);
        assert_eq!(components.loader_keys(), ["default"]);
        assert!(Arc::ptr_eq(&components.loaders()[0], &default));
        assert!(components.service_names().is_empty());
        assert!(components.middleware_names().is_empty());
    }
}
