//! The root orchestrator: owns configuration, components, data stores, and
//! the listening socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rapidfire_core::{ConfigError, ConfigSource, CoreConfig, Environment};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::catalog::ComponentCatalog;
use crate::context::{Components, CoreContext};
use crate::discovery::{
    default_loader, discover_loaders, discover_middlewares, discover_services, install_middlewares,
};
use crate::error::IgnitionError;
use crate::network::server::{mark_closed, spawn_server, AddressSlot};
use crate::network::{bind, build_app, LifecycleController, LifecycleEvent, LifecycleState};
use crate::pipeline::{JsonBodyParser, PipelineBuilder, QueryNormalizer};
use crate::traits::DataStore;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects construction inputs for [`RapidFire`].
pub struct RapidFireBuilder {
    source: ConfigSource,
    stores: Vec<Arc<dyn DataStore>>,
    catalog: Option<Arc<ComponentCatalog>>,
}

impl RapidFireBuilder {
    /// Adds an owned data store, closed on `extinguish`.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.stores.push(store);
        self
    }

    #[must_use]
    pub fn stores(mut self, stores: impl IntoIterator<Item = Arc<dyn DataStore>>) -> Self {
        self.stores.extend(stores);
        self
    }

    /// Uses `catalog` instead of one holding only the built-in loaders.
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<ComponentCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Resolves the configuration and constructs the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or is invalid.
    pub fn build(self) -> Result<RapidFire, ConfigError> {
        let config = Arc::new(CoreConfig::resolve(self.source)?);
        let environment = Arc::new(Environment::capture());
        let components = Arc::new(Components::default());
        let lifecycle = Arc::new(LifecycleController::new());

        let core = RapidFire {
            config,
            environment,
            stores: self.stores.into(),
            catalog: self
                .catalog
                .unwrap_or_else(|| Arc::new(ComponentCatalog::new())),
            components,
            lifecycle,
            address: Arc::new(Mutex::new(None)),
            server: Mutex::new(None),
        };
        core.components
            .replace_loaders(vec![default_loader(&core.context())]);

        debug!(
            is_dev = core.config.is_dev,
            root = %core.environment.root.display(),
            stores = core.stores.len(),
            "orchestrator constructed"
        );
        Ok(core)
    }
}

// ---------------------------------------------------------------------------
// RapidFire
// ---------------------------------------------------------------------------

/// Assembles an HTTP server from discovered loaders, services, and
/// middlewares, and manages its lifecycle.
///
/// ```no_run
/// # async fn run() -> anyhow::Result<()> {
/// use rapidfire_server::RapidFire;
///
/// let core = RapidFire::new(std::path::Path::new("rapidfire.yaml"))?;
/// let handle = core.ignition().await?;
/// println!("listening on {:?}", handle.local_addr());
/// core.extinguish().await;
/// # Ok(())
/// # }
/// ```
pub struct RapidFire {
    config: Arc<CoreConfig>,
    environment: Arc<Environment>,
    stores: Arc<[Arc<dyn DataStore>]>,
    catalog: Arc<ComponentCatalog>,
    components: Arc<Components>,
    lifecycle: Arc<LifecycleController>,
    address: AddressSlot,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl RapidFire {
    #[must_use]
    pub fn builder(source: impl Into<ConfigSource>) -> RapidFireBuilder {
        RapidFireBuilder {
            source: source.into(),
            stores: Vec::new(),
            catalog: None,
        }
    }

    /// Constructs an orchestrator without data stores, using the default catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or is invalid.
    pub fn new(source: impl Into<ConfigSource>) -> Result<Self, ConfigError> {
        Self::builder(source).build()
    }

    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    #[must_use]
    pub fn catalog(&self) -> &ComponentCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn components(&self) -> &Components {
        &self.components
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// The bound address while listening, `None` otherwise.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.address.lock()
    }

    /// Subscribes to `open`/`close` events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Waits until the lifecycle reaches `state`, up to `timeout`.
    pub async fn wait_for(&self, state: LifecycleState, timeout: Duration) -> bool {
        self.lifecycle.wait_for(state, timeout).await
    }

    /// Introspection handle.
    #[must_use]
    pub fn handle(&self) -> CoreHandle {
        CoreHandle {
            config: Arc::clone(&self.config),
            environment: Arc::clone(&self.environment),
            components: Arc::clone(&self.components),
            lifecycle: Arc::clone(&self.lifecycle),
            address: Arc::clone(&self.address),
        }
    }

    fn context(&self) -> CoreContext {
        CoreContext::new(
            Arc::clone(&self.config),
            Arc::clone(&self.environment),
            Arc::clone(&self.stores),
            &self.components,
            Arc::clone(&self.lifecycle),
        )
    }

    /// Runs every discovery phase, assembles the pipeline, and starts
    /// listening.
    ///
    /// Re-running after `extinguish` repeats all discovery.
    ///
    /// # Errors
    ///
    /// Any discovery or bind failure aborts ignition before the socket is
    /// opened; the lifecycle and the installed components return to what
    /// they were before the call. Fails with
    /// [`IgnitionError::AlreadyListening`] while the server is running.
    pub async fn ignition(&self) -> Result<CoreHandle, IgnitionError> {
        let previous = self.lifecycle.state();
        if previous == LifecycleState::Listening {
            if let Some(address) = self.local_addr() {
                return Err(IgnitionError::AlreadyListening(address));
            }
        }

        let installed = self.components.snapshot();
        self.lifecycle.set_state(LifecycleState::Igniting);
        info!("igniting");
        match self.ignite().await {
            Ok(handle) => Ok(handle),
            Err(err) => {
                error!("ignition failed: {err}");
                self.components.restore(installed);
                self.lifecycle.set_state(previous);
                Err(err)
            }
        }
    }

    async fn ignite(&self) -> Result<CoreHandle, IgnitionError> {
        let context = self.context();
        let paths = &self.config.paths;

        let loaders = match paths.loaders() {
            Some(dir) => discover_loaders(dir, &self.catalog, &context)?,
            None => vec![default_loader(&context)],
        };
        self.components.replace_loaders(loaders.clone());

        let mut pipeline = PipelineBuilder::new();
        pipeline.install(QueryNormalizer::new(self.config.querystring_parser.clone()));
        pipeline.install(JsonBodyParser::new(self.config.body_parser.clone()));

        let services = match paths.services() {
            Some(dir) => discover_services(dir, &loaders, &self.catalog, &mut pipeline).await?,
            None => Vec::new(),
        };
        self.components.replace_services(services);

        let middlewares = match paths.middlewares() {
            Some(dir) => discover_middlewares(dir, &self.catalog, &context).await?,
            None => Vec::new(),
        };
        install_middlewares(&middlewares, &mut pipeline);
        self.components.replace_middlewares(middlewares);

        let pipeline = pipeline.build();
        debug!(stages = ?pipeline.stage_names(), "pipeline assembled");
        let app = build_app(
            pipeline,
            Duration::from_secs(self.config.request_timeout_secs),
        );

        let (listener, address) = bind(&self.config.bind_address()).await?;
        self.lifecycle.reset_shutdown();
        *self.address.lock() = Some(address);
        self.lifecycle.set_state(LifecycleState::Listening);
        let task = spawn_server(
            listener,
            app,
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.address),
        );
        *self.server.lock() = Some(task);

        self.lifecycle.emit(LifecycleEvent::Open { address });
        info!("listening on {address}");

        let handle = self.handle();
        if self.config.is_dev {
            debug!(summary = ?handle.summary(), "introspection handle ready");
        }
        Ok(handle)
    }

    /// Closes every owned data store, then the listening socket.
    ///
    /// Store failures are logged and reported, never propagated; the
    /// remaining stores and the socket are still closed. Safe to call when
    /// not listening, in which case only the stores are closed.
    pub async fn extinguish(&self) -> ShutdownReport {
        let listening = self.lifecycle.state() == LifecycleState::Listening;
        if listening {
            self.lifecycle.set_state(LifecycleState::Closing);
            info!("extinguishing");
        }

        let mut report = ShutdownReport::default();
        for store in self.stores.iter() {
            match store.close().await {
                Ok(()) => {
                    debug!(store = store.name(), "data store closed");
                    report.closed.push(store.name().to_owned());
                }
                Err(err) => {
                    error!(store = store.name(), "failed to close data store: {err:#}");
                    report.failures.push(StoreCloseFailure {
                        store: store.name().to_owned(),
                        error: format!("{err:#}"),
                    });
                }
            }
        }

        let task = self.server.lock().take();
        if let Some(task) = task {
            self.lifecycle.trigger_shutdown();
            if let Err(err) = task.await {
                warn!("server task ended abnormally: {err}");
                mark_closed(&self.lifecycle, &self.address);
            }
        }
        report
    }
}

impl std::fmt::Debug for RapidFire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RapidFire")
            .field("state", &self.state())
            .field("address", &self.local_addr())
            .field("components", &self.components)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Shutdown report
// ---------------------------------------------------------------------------

/// A data store whose `close` failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreCloseFailure {
    pub store: String,
    pub error: String,
}

/// Outcome of `extinguish`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Stores closed successfully, in order.
    pub closed: Vec<String>,
    pub failures: Vec<StoreCloseFailure>,
}

impl ShutdownReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// CoreHandle
// ---------------------------------------------------------------------------

/// Cloneable read-only view of a running orchestrator, for diagnostics.
#[derive(Clone)]
pub struct CoreHandle {
    config: Arc<CoreConfig>,
    environment: Arc<Environment>,
    components: Arc<Components>,
    lifecycle: Arc<LifecycleController>,
    address: AddressSlot,
}

/// Serializable snapshot returned by [`CoreHandle::summary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreSummary {
    pub is_dev: bool,
    pub state: LifecycleState,
    pub address: Option<SocketAddr>,
    pub loaders: Vec<String>,
    pub services: Vec<String>,
    pub middlewares: Vec<String>,
}

impl CoreHandle {
    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.address.lock()
    }

    #[must_use]
    pub fn components(&self) -> &Components {
        &self.components
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    #[must_use]
    pub fn summary(&self) -> CoreSummary {
        CoreSummary {
            is_dev: self.config.is_dev,
            state: self.state(),
            address: self.local_addr(),
            loaders: self.components.loader_keys(),
            services: self.components.service_names(),
            middlewares: self.components.middleware_names(),
        }
    }
}

impl std::fmt::Debug for CoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreHandle")
            .field("summary", &self.summary())
            .finish()
    }
}
