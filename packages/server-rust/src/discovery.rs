//! Loader, service, and middleware discovery.
//!
//! Each phase reads the manifests of one directory (in file-name order),
//! checks that every named factory is registered, and only then builds the
//! components one at a time. Any failure aborts ignition.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rapidfire_core::{
    load_manifests, ComponentKind, Discovered, LoaderManifest, MiddlewareManifest, PathPattern,
    ServiceDescriptor,
};
use tracing::{debug, info};

use crate::catalog::ComponentCatalog;
use crate::context::CoreContext;
use crate::error::IgnitionError;
use crate::loader::{LoadRequest, ServiceLoader};
use crate::pipeline::{MiddlewareStage, PipelineBuilder, ServiceStage};
use crate::traits::{Loader, Middleware, Service};

/// Looks up a factory for every manifest before anything is instantiated.
fn resolve_factories<M, F>(
    manifests: &[Discovered<M>],
    kind: ComponentKind,
    name: impl Fn(&M) -> &str,
    lookup: impl Fn(&str) -> Option<F>,
) -> Result<Vec<F>, IgnitionError> {
    manifests
        .iter()
        .map(|discovered| {
            let wanted = name(&discovered.manifest);
            lookup(wanted).ok_or_else(|| IgnitionError::UnknownComponent {
                kind,
                name: wanted.to_owned(),
                path: discovered.path.clone(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

/// The built-in loader, bound to `context`.
#[must_use]
pub fn default_loader(context: &CoreContext) -> Arc<dyn Loader> {
    let mut loader = ServiceLoader::new();
    loader.bind(context.clone());
    Arc::new(loader)
}

/// Instantiates and binds every loader declared in `dir`.
///
/// The result replaces the default loader list. A directory without any
/// manifest yields the default loader alone, so the list is never empty.
///
/// # Errors
///
/// Fails on unreadable or invalid manifests, unregistered loader factories,
/// and factory errors.
pub fn discover_loaders(
    dir: &Path,
    catalog: &ComponentCatalog,
    context: &CoreContext,
) -> Result<Vec<Arc<dyn Loader>>, IgnitionError> {
    let manifests = load_manifests::<LoaderManifest>(dir)?;
    let factories = resolve_factories(
        &manifests,
        ComponentKind::Loader,
        |m| m.loader.as_str(),
        |name| catalog.loader(name),
    )?;

    let mut loaders = Vec::with_capacity(manifests.len());
    for (discovered, factory) in manifests.iter().zip(factories) {
        let manifest = &discovered.manifest;
        let mut loader =
            factory(&manifest.options).map_err(|source| IgnitionError::Instantiate {
                kind: ComponentKind::Loader,
                name: manifest.loader.clone(),
                source,
            })?;
        loader.bind(context.clone());
        info!(loader = loader.key(), manifest = %discovered.path.display(), "loader registered");
        loaders.push(Arc::from(loader));
    }

    if loaders.is_empty() {
        debug!(dir = %dir.display(), "no loader manifests, keeping the default loader");
        loaders.push(default_loader(context));
    }
    Ok(loaders)
}

/// First loader whose key equals `key`.
#[must_use]
pub fn resolve_loader(loaders: &[Arc<dyn Loader>], key: &str) -> Option<Arc<dyn Loader>> {
    loaders.iter().find(|loader| loader.key() == key).cloned()
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Loads every service declared in `dir` and installs its router into the
/// pipeline immediately, in discovery order.
///
/// # Errors
///
/// Fails with [`IgnitionError::LoaderNotFound`] when a descriptor names a
/// loader key nobody registered (checked for all descriptors before any
/// service is loaded), or with [`IgnitionError::ServiceLoad`] when a loader
/// fails.
pub async fn discover_services(
    dir: &Path,
    loaders: &[Arc<dyn Loader>],
    catalog: &ComponentCatalog,
    pipeline: &mut PipelineBuilder,
) -> Result<Vec<Arc<dyn Service>>, IgnitionError> {
    let manifests = load_manifests::<ServiceDescriptor>(dir)?;
    let resolved = manifests
        .iter()
        .map(|discovered| {
            let descriptor = &discovered.manifest;
            resolve_loader(loaders, &descriptor.loader).ok_or_else(|| {
                IgnitionError::LoaderNotFound {
                    service: descriptor.name.clone(),
                    loader: descriptor.loader.clone(),
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut services = Vec::with_capacity(manifests.len());
    for (discovered, loader) in manifests.into_iter().zip(resolved) {
        let descriptor = discovered.manifest;
        let name = descriptor.name.clone();
        let mount = descriptor.mount.clone();
        let definition = catalog.service(descriptor.definition());

        let service: Arc<dyn Service> = loader
            .load(LoadRequest::new(descriptor, definition))
            .await
            .map_err(|source| IgnitionError::ServiceLoad {
                service: name.clone(),
                loader: loader.key().to_owned(),
                source,
            })?
            .into();

        pipeline.install(ServiceStage::new(
            service.name(),
            service.router(),
            mount.as_deref(),
        ));
        info!(
            service = service.name(),
            loader = loader.key(),
            mount = mount.as_deref().unwrap_or("/"),
            "service installed"
        );
        services.push(service);
    }
    Ok(services)
}

// ---------------------------------------------------------------------------
// Middlewares
// ---------------------------------------------------------------------------

/// A discovered middleware with its effective order and pattern.
#[derive(Clone)]
pub struct InstalledMiddleware {
    pub name: String,
    pub order: f64,
    pub pattern: Option<PathPattern>,
    pub middleware: Arc<dyn Middleware>,
}

impl fmt::Debug for InstalledMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstalledMiddleware")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("pattern", &self.pattern.as_ref().map(PathPattern::as_str))
            .field("pipes", &self.middleware.pipes())
            .finish()
    }
}

/// Instantiates, binds, and initializes every middleware declared in `dir`,
/// returning them sorted by order.
///
/// A manifest's `order`/`pattern` take precedence over the middleware's own.
///
/// # Errors
///
/// Fails on invalid manifests, unregistered factories, factory errors, and
/// `init` errors.
pub async fn discover_middlewares(
    dir: &Path,
    catalog: &ComponentCatalog,
    context: &CoreContext,
) -> Result<Vec<InstalledMiddleware>, IgnitionError> {
    let manifests = load_manifests::<MiddlewareManifest>(dir)?;
    let factories = resolve_factories(
        &manifests,
        ComponentKind::Middleware,
        |m| m.middleware.as_str(),
        |name| catalog.middleware(name),
    )?;

    let mut installed = Vec::with_capacity(manifests.len());
    for (discovered, factory) in manifests.into_iter().zip(factories) {
        let manifest = discovered.manifest;
        let mut middleware =
            factory(&manifest.options).map_err(|source| IgnitionError::Instantiate {
                kind: ComponentKind::Middleware,
                name: manifest.middleware.clone(),
                source,
            })?;
        middleware.bind(context.clone());
        middleware
            .init()
            .await
            .map_err(|source| IgnitionError::MiddlewareInit {
                name: manifest.middleware.clone(),
                source,
            })?;

        let order = manifest.order.or_else(|| middleware.order()).unwrap_or(0.0);
        let pattern = manifest.pattern.or_else(|| middleware.pattern());
        debug!(middleware = middleware.name(), order, "middleware initialized");
        installed.push(InstalledMiddleware {
            name: middleware.name().to_owned(),
            order,
            pattern,
            middleware: Arc::from(middleware),
        });
    }

    sort_middlewares(&mut installed);
    Ok(installed)
}

/// Ascending by order; equal orders keep discovery order.
pub fn sort_middlewares(middlewares: &mut [InstalledMiddleware]) {
    middlewares.sort_by(|a, b| a.order.total_cmp(&b.order));
}

/// Installs a stage for every middleware that pipes, in the given order.
pub fn install_middlewares(middlewares: &[InstalledMiddleware], pipeline: &mut PipelineBuilder) {
    for installed in middlewares {
        if installed.middleware.pipes() {
            pipeline.install(MiddlewareStage::new(
                &installed.name,
                installed.pattern.clone(),
                Arc::clone(&installed.middleware),
            ));
            info!(
                middleware = %installed.name,
                order = installed.order,
                pattern = installed.pattern.as_ref().map_or("*", PathPattern::as_str),
                "middleware installed"
            );
        } else {
            debug!(middleware = %installed.name, "middleware has no pipe, nothing installed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::routing::get;
    use axum::Router;
    use rapidfire_core::{CoreConfig, Environment};
    use serde_json::Value;

    use super::*;
    use crate::context::Components;
    use crate::network::LifecycleController;
    use crate::traits::RoutedService;

    fn context(components: &Arc<Components>) -> CoreContext {
        CoreContext::new(
            Arc::new(CoreConfig::default()),
            Arc::new(Environment::capture()),
            Vec::new().into(),
            components,
            Arc::new(LifecycleController::new()),
        )
    }

    fn write(dir: &Path, file: &str, contents: &str) {
        fs::write(dir.join(file), contents).unwrap();
    }

    /// Middleware whose order and piping come from its options.
    struct Configured {
        name: String,
        order: Option<f64>,
        pipes: bool,
        fail_init: bool,
        bound: bool,
    }

    #[async_trait]
    impl Middleware for Configured {
        fn name(&self) -> &str {
            &self.name
        }

        fn order(&self) -> Option<f64> {
            self.order
        }

        fn bind(&mut self, _context: CoreContext) {
            self.bound = true;
        }

        async fn init(&mut self) -> anyhow::Result<()> {
            anyhow::ensure!(self.bound, "init before bind");
            anyhow::ensure!(!self.fail_init, "refusing to start");
            Ok(())
        }

        fn pipes(&self) -> bool {
            self.pipes
        }
    }

    fn middleware_catalog() -> ComponentCatalog {
        let catalog = ComponentCatalog::empty();
        catalog.register_middleware("configured", |options: &Value| {
            Ok(Box::new(Configured {
                name: options["name"].as_str().unwrap_or("anon").to_owned(),
                order: options["order"].as_f64(),
                pipes: options["pipes"].as_bool().unwrap_or(true),
                fail_init: options["failInit"].as_bool().unwrap_or(false),
                bound: false,
            }))
        });
        catalog
    }

    #[test]
    fn loader_manifests_replace_the_default() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "01-static.yaml", "loader: static\n");
        write(dir.path(), "02-default.json", r#"{ "loader": "default" }"#);
        let components = Arc::new(Components::default());

        let loaders =
            discover_loaders(dir.path(), &ComponentCatalog::new(), &context(&components)).unwrap();
        let keys: Vec<&str> = loaders.iter().map(|l| l.key()).collect();
        assert_eq!(keys, ["static", "default"]);
    }

    #[test]
    fn empty_loader_directory_keeps_default() {
        let dir = tempfile::tempdir().unwrap();
        let components = Arc::new(Components::default());
        let loaders =
            discover_loaders(dir.path(), &ComponentCatalog::new(), &context(&components)).unwrap();
        assert_eq!(loaders.len(), 1);
        assert_eq!(loaders[0].key(), "default");
    }

    #[test]
    fn unknown_loader_factory_is_rejected_before_instantiation() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "loader: counted\n");
        write(dir.path(), "b.yaml", "loader: graphql\n");

        let built = Arc::new(AtomicUsize::new(0));
        let catalog = ComponentCatalog::empty();
        let counter = Arc::clone(&built);
        catalog.register_loader("counted", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ServiceLoader::new()))
        });

        let components = Arc::new(Components::default());
        let err = discover_loaders(dir.path(), &catalog, &context(&components)).err().unwrap();
        assert!(matches!(
            err,
            IgnitionError::UnknownComponent { kind: ComponentKind::Loader, ref name, .. } if name == "graphql"
        ));
        assert_eq!(built.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_directory_is_fatal() {
        let components = Arc::new(Components::default());
        let err = discover_loaders(
            Path::new("/definitely/not/here"),
            &ComponentCatalog::new(),
            &context(&components),
        )
        .err()
        .unwrap();
        assert!(matches!(err, IgnitionError::Manifest(_)));
    }

    #[tokio::test]
    async fn services_install_in_discovery_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b-users.yaml", "loader: default\n");
        write(
            dir.path(),
            "a-health.yaml",
            "loader: static\noptions:\n  routes:\n    - path: /health\n      body: ok\n",
        );

        let catalog = ComponentCatalog::new();
        catalog.register_service("b-users", |descriptor, _ctx| {
            let router = Router::new().route("/users", get(|| async { "users" }));
            Ok(Box::new(RoutedService::new(descriptor.name.clone(), router)))
        });
        let components = Arc::new(Components::default());
        let ctx = context(&components);
        let loaders = vec![default_loader(&ctx), Arc::new(crate::loader::StaticLoader::new()) as Arc<dyn Loader>];

        let mut pipeline = PipelineBuilder::new();
        let services = discover_services(dir.path(), &loaders, &catalog, &mut pipeline)
            .await
            .unwrap();

        let names: Vec<&str> = services.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["a-health", "b-users"]);
        assert_eq!(
            pipeline.build().stage_names(),
            ["service:a-health", "service:b-users"]
        );
    }

    #[tokio::test]
    async fn unmatched_loader_key_is_named() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "users.yaml", "loader: graphql\n");
        let components = Arc::new(Components::default());
        let loaders = vec![default_loader(&context(&components))];

        let mut pipeline = PipelineBuilder::new();
        let err = discover_services(dir.path(), &loaders, &ComponentCatalog::new(), &mut pipeline)
            .await
            .err()
            .unwrap();
        match err {
            IgnitionError::LoaderNotFound { service, loader } => {
                assert_eq!(service, "users");
                assert_eq!(loader, "graphql");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(pipeline.is_empty());
    }

    #[tokio::test]
    async fn loader_failure_is_attributed() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "ghost.yaml", "loader: default\n");
        let components = Arc::new(Components::default());
        let loaders = vec![default_loader(&context(&components))];

        let mut pipeline = PipelineBuilder::new();
        let err = discover_services(dir.path(), &loaders, &ComponentCatalog::new(), &mut pipeline)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, IgnitionError::ServiceLoad { ref service, .. } if service == "ghost"));
    }

    #[tokio::test]
    async fn middlewares_sort_by_order_with_stable_ties() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "middleware: configured\norder: 5\noptions: { name: five }\n");
        write(dir.path(), "b.yaml", "middleware: configured\noptions: { name: one, order: 1 }\n");
        write(dir.path(), "c.yaml", "middleware: configured\norder: 3\noptions: { name: three }\n");
        write(dir.path(), "d.yaml", "middleware: configured\noptions: { name: zero-a }\n");
        write(dir.path(), "e.yaml", "middleware: configured\norder: 0\noptions: { name: zero-b }\n");
        write(dir.path(), "f.yaml", "middleware: configured\norder: 1.5\noptions: { name: one-and-a-half }\n");
        write(dir.path(), "g.yaml", "middleware: configured\noptions: { name: minus-half, order: -0.5 }\n");

        let components = Arc::new(Components::default());
        let installed = discover_middlewares(dir.path(), &middleware_catalog(), &context(&components))
            .await
            .unwrap();
        let names: Vec<&str> = installed.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            ["minus-half", "zero-a", "zero-b", "one", "one-and-a-half", "three", "five"]
        );
    }

    #[tokio::test]
    async fn manifest_order_overrides_middleware_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "middleware: configured\norder: 10\noptions: { name: late, order: -1 }\n");
        write(dir.path(), "b.yaml", "middleware: configured\noptions: { name: early, order: 2 }\n");

        let components = Arc::new(Components::default());
        let installed = discover_middlewares(dir.path(), &middleware_catalog(), &context(&components))
            .await
            .unwrap();
        let orders: Vec<(&str, f64)> = installed.iter().map(|m| (m.name.as_str(), m.order)).collect();
        assert_eq!(orders, [("early", 2.0), ("late", 10.0)]);
    }

    #[tokio::test]
    async fn only_piping_middlewares_install_stages() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "middleware: configured\npattern: /admin\noptions: { name: guard }\n");
        write(dir.path(), "b.yaml", "middleware: configured\noptions: { name: hooks, pipes: false }\n");

        let components = Arc::new(Components::default());
        let installed = discover_middlewares(dir.path(), &middleware_catalog(), &context(&components))
            .await
            .unwrap();
        assert_eq!(installed.len(), 2);
        assert_eq!(installed[0].pattern.as_ref().map(PathPattern::as_str), Some("/admin"));

        let mut pipeline = PipelineBuilder::new();
        install_middlewares(&installed, &mut pipeline);
        assert_eq!(pipeline.build().stage_names(), ["middleware:guard"]);
    }

    #[tokio::test]
    async fn init_failure_aborts_discovery() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "middleware: configured\noptions: { name: broken, failInit: true }\n");

        let components = Arc::new(Components::default());
        let err = discover_middlewares(dir.path(), &middleware_catalog(), &context(&components))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, IgnitionError::MiddlewareInit { ref name, .. } if name == "configured"));
    }
}
