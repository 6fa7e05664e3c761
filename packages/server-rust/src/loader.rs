//! Built-in loaders.
//!
//! - [`ServiceLoader`] (key `default`) builds services from definitions
//!   registered in the catalog. It is always present.
//! - [`StaticLoader`] (key `static`) builds fixed-response routes straight
//!   from the descriptor's options, without any code.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use anyhow::{anyhow, bail, Context as _};
use async_trait::async_trait;
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{on, MethodFilter, MethodRouter};
use axum::Router;
use bytes::Bytes;
use rapidfire_core::ServiceDescriptor;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::catalog::ServiceFactory;
use crate::context::CoreContext;
use crate::traits::{Loader, RoutedService, Service};

/// Key of the always-present loader.
pub const DEFAULT_LOADER: &str = "default";

/// Key of the fixed-response loader.
pub const STATIC_LOADER: &str = "static";

/// What a loader receives for each service.
pub struct LoadRequest {
    pub descriptor: ServiceDescriptor,
    /// The catalog definition named by the descriptor, if one is registered.
    pub definition: Option<ServiceFactory>,
}

impl LoadRequest {
    #[must_use]
    pub fn new(descriptor: ServiceDescriptor, definition: Option<ServiceFactory>) -> Self {
        Self {
            descriptor,
            definition,
        }
    }
}

impl fmt::Debug for LoadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadRequest")
            .field("descriptor", &self.descriptor)
            .field("definition", &self.definition.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ServiceLoader
// ---------------------------------------------------------------------------

/// Builds services from registered definitions.
#[derive(Debug, Default)]
pub struct ServiceLoader {
    context: Option<CoreContext>,
}

impl ServiceLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Loader for ServiceLoader {
    fn key(&self) -> &str {
        DEFAULT_LOADER
    }

    fn bind(&mut self, context: CoreContext) {
        self.context = Some(context);
    }

    async fn load(&self, request: LoadRequest) -> anyhow::Result<Box<dyn Service>> {
        let context = self
            .context
            .as_ref()
            .context("loader used before being bound to the orchestrator")?;
        let definition = request.definition.with_context(|| {
            format!(
                "no service definition named `{}` is registered",
                request.descriptor.definition()
            )
        })?;
        definition(&request.descriptor, context)
    }
}

// ---------------------------------------------------------------------------
// StaticLoader
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticOptions {
    routes: Vec<StaticRoute>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticRoute {
    #[serde(default = "default_method")]
    method: String,
    path: String,
    #[serde(default = "default_status")]
    status: u16,
    #[serde(default)]
    body: Value,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    "GET".to_owned()
}

fn default_status() -> u16 {
    200
}

/// Fixed response for one static route.
#[derive(Debug, Clone)]
struct StaticReply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl IntoResponse for StaticReply {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

impl StaticRoute {
    fn method(&self) -> anyhow::Result<(Method, MethodFilter)> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("invalid method `{}`", self.method))?;
        let filter = MethodFilter::try_from(method.clone())
            .map_err(|_| anyhow!("unsupported method `{method}`"))?;
        Ok((method, filter))
    }

    fn reply(&self) -> anyhow::Result<StaticReply> {
        let status = StatusCode::from_u16(self.status)
            .with_context(|| format!("invalid status {}", self.status))?;

        let mut headers = HeaderMap::new();
        let body = match &self.body {
            Value::Null => Bytes::new(),
            Value::String(text) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
                Bytes::from(text.clone())
            }
            other => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Bytes::from(serde_json::to_vec(other)?)
            }
        };
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name `{name}`"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header `{name}`"))?;
            headers.insert(name, value);
        }

        Ok(StaticReply {
            status,
            headers,
            body,
        })
    }
}

/// Static routes are literal paths. With captures ruled out, two routes can
/// only collide by having the same path, which [`StaticLoader::build`] merges
/// per method, so the router never sees a conflict.
fn check_path(path: &str) -> anyhow::Result<()> {
    if !path.starts_with('/') {
        bail!("route path must start with '/': {path}");
    }
    if path.contains(['{', '}']) {
        bail!("static route paths are literal, captures are not allowed: {path}");
    }
    if path
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        bail!("static route paths are literal, `:param` and `*rest` are not allowed: {path}");
    }
    Ok(())
}

/// Serves fixed responses declared in `options.routes`.
///
/// ```yaml
/// loader: static
/// options:
///   routes:
///     - path: /health
///       body: ok
///     - method: POST
///       path: /echo
///       status: 202
///       body: { accepted: true }
///       headers: { cache-control: no-store }
/// ```
#[derive(Debug, Default)]
pub struct StaticLoader;

impl StaticLoader {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn build(descriptor: &ServiceDescriptor) -> anyhow::Result<Router> {
        let options = StaticOptions::deserialize(&descriptor.options)
            .context("invalid static loader options")?;

        let mut seen = HashSet::new();
        let mut by_path: BTreeMap<&str, MethodRouter> = BTreeMap::new();
        for route in &options.routes {
            check_path(&route.path)?;
            let (method, filter) = route.method()?;
            if !seen.insert((route.path.as_str(), method.clone())) {
                bail!("duplicate static route {method} {}", route.path);
            }
            let reply = route.reply()?;
            let handler = move || {
                let reply = reply.clone();
                async move { reply }
            };
            let entry = by_path.remove(route.path.as_str());
            let method_router = match entry {
                Some(existing) => existing.on(filter, handler),
                None => on(filter, handler),
            };
            by_path.insert(route.path.as_str(), method_router);
        }

        debug!(
            service = %descriptor.name,
            routes = options.routes.len(),
            "static routes built"
        );
        Ok(by_path
            .into_iter()
            .fold(Router::new(), |router, (path, method_router)| {
                router.route(path, method_router)
            }))
    }
}

#[async_trait]
impl Loader for StaticLoader {
    fn key(&self) -> &str {
        STATIC_LOADER
    }

    async fn load(&self, request: LoadRequest) -> anyhow::Result<Box<dyn Service>> {
        let router = Self::build(&request.descriptor)
            .with_context(|| format!("service `{}`", request.descriptor.name))?;
        Ok(Box::new(RoutedService::new(
            request.descriptor.name.clone(),
            router,
        )))
    }
}
