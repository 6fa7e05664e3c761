//! Contracts implemented by loaders, services, middlewares, and data stores.

use async_trait::async_trait;
use axum::Router;
use rapidfire_core::PathPattern;

use crate::context::CoreContext;
use crate::loader::LoadRequest;
use crate::pipeline::{HttpRequest, Next, PipeResult};

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Strategy that instantiates one category of service.
///
/// A service descriptor names a loader by key; the first registered loader
/// reporting that key builds the service.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Key matched against `ServiceDescriptor::loader`.
    fn key(&self) -> &str;

    /// Receives the orchestrator back-reference before any `load` call.
    fn bind(&mut self, _context: CoreContext) {}

    /// Builds the service described by `request`.
    async fn load(&self, request: LoadRequest) -> anyhow::Result<Box<dyn Service>>;
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// A unit of request handling exposing a router.
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    /// Routes installed into the pipeline. Called once, at installation.
    fn router(&self) -> Router;
}

/// A service that is nothing more than a named router.
#[derive(Debug, Clone)]
pub struct RoutedService {
    name: String,
    router: Router,
}

impl RoutedService {
    #[must_use]
    pub fn new(name: impl Into<String>, router: Router) -> Self {
        Self {
            name: name.into(),
            router,
        }
    }
}

impl Service for RoutedService {
    fn name(&self) -> &str {
        &self.name
    }

    fn router(&self) -> Router {
        self.router.clone()
    }
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Ordered, optionally path-filtered request processor.
///
/// Middlewares are sorted ascending by [`order`](Middleware::order) (missing
/// counts as 0, ties keep discovery order). Only middlewares whose
/// [`pipes`](Middleware::pipes) returns `true` install a pipeline stage; the
/// others are still initialized and retained.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    fn order(&self) -> Option<f64> {
        None
    }

    /// Path filter; `None` applies to every path.
    fn pattern(&self) -> Option<PathPattern> {
        None
    }

    /// Receives the orchestrator back-reference before `init`.
    fn bind(&mut self, _context: CoreContext) {}

    /// One-time setup, awaited before the pipeline is assembled.
    async fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Whether this middleware handles requests at all.
    fn pipes(&self) -> bool {
        false
    }

    /// Processes a request. Call `next.run(request)` to continue the pipeline.
    async fn pipe(&self, request: HttpRequest, next: Next) -> PipeResult {
        next.run(request).await
    }
}

// ---------------------------------------------------------------------------
// DataStore
// ---------------------------------------------------------------------------

/// A data-store handle owned by the orchestrator and closed on `extinguish`.
#[async_trait]
pub trait DataStore: Send + Sync {
    fn name(&self) -> &str;

    /// Releases the store. Failures are logged by the caller, never propagated.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
