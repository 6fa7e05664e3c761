//! Router stage for an installed service.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use parking_lot::Mutex;
use tower::ServiceExt;

use super::{HttpRequest, Next, PipeResult, Stage};

/// Answers requests matched by a service's router and forwards the rest.
///
/// A path without a route, or a route without the requested method, counts
/// as "not matched": the request continues down the pipeline with its body
/// intact.
pub struct ServiceStage {
    name: String,
    router: Router,
}

/// Marks responses produced by the unmatched fallback.
#[derive(Debug, Clone, Copy)]
struct Unmatched;

/// Hands the body back out of the router when nothing matched.
#[derive(Clone, Default)]
struct BodySlot(Arc<Mutex<Option<Body>>>);

impl ServiceStage {
    /// Wraps `router`, nesting it under `mount` when one is given.
    ///
    /// The router's own fallback is replaced on both sides of the mount, so
    /// a service never answers a request none of its routes matched.
    #[must_use]
    pub fn new(name: impl Into<String>, router: Router, mount: Option<&str>) -> Self {
        let router = router
            .method_not_allowed_fallback(unmatched)
            .fallback(unmatched);
        let router = match mount.map(|m| m.trim_end_matches('/')) {
            Some(prefix) if !prefix.is_empty() => Router::new().nest(prefix, router),
            _ => router,
        };
        Self {
            name: format!("service:{}", name.into()),
            router: router.fallback(unmatched),
        }
    }
}

async fn unmatched(request: Request) -> Response {
    let (parts, body) = request.into_parts();
    if let Some(slot) = parts.extensions.get::<BodySlot>() {
        *slot.0.lock() = Some(body);
    }
    let mut response = StatusCode::NOT_FOUND.into_response();
    response.extensions_mut().insert(Unmatched);
    response
}

#[async_trait]
impl Stage for ServiceStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, request: HttpRequest, next: Next) -> PipeResult {
        let snapshot = request.snapshot();
        let slot = BodySlot::default();
        let mut outgoing = request.into_request();
        outgoing.extensions_mut().insert(slot.clone());

        let response = match self.router.clone().oneshot(outgoing).await {
            Ok(response) => response,
            Err(infallible) => match infallible {},
        };
        if response.extensions().get::<Unmatched>().is_none() {
            return Ok(response);
        }

        let mut restored = snapshot;
        let returned = slot.0.lock().take();
        if let Some(body) = returned {
            restored.set_body(body);
        }
        next.run(restored).await
    }
}
