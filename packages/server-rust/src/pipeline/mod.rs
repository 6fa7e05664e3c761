//! Request pipeline: an ordered list of stages driven by a continuation.
//!
//! Stages are installed once during ignition and never change afterwards.
//! Each request walks the list through [`Next`]; a stage either answers,
//! forwards to the rest of the pipeline, or raises a [`Fault`] that ends up
//! in the terminal error handler.

pub mod body;
pub mod fault;
pub mod middleware;
pub mod query;
pub mod request;
pub mod service;

use std::any::Any;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{error, info_span, Instrument};

pub use body::JsonBodyParser;
pub use fault::{Fault, HttpError, PipeResult};
pub use middleware::MiddlewareStage;
pub use query::QueryNormalizer;
pub use request::{HttpRequest, JsonBody, NormalizedQuery};
pub use service::ServiceStage;

use fault::{handle_fault, plain_response, RaisedError};

/// One step of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Name used in logs and introspection.
    fn name(&self) -> &str;

    /// Handles the request, calling `next.run(request)` to continue.
    async fn handle(&self, request: HttpRequest, next: Next) -> PipeResult;
}

// ---------------------------------------------------------------------------
// Next
// ---------------------------------------------------------------------------

/// Continuation over the remaining stages.
#[derive(Clone)]
pub struct Next {
    stages: Arc<[Arc<dyn Stage>]>,
    index: usize,
}

impl Next {
    /// Runs the remaining stages. Past the last stage the request is
    /// answered with `404 Cannot <METHOD> <path>`.
    pub async fn run(self, request: HttpRequest) -> PipeResult {
        let Some(stage) = self.stages.get(self.index).cloned() else {
            return Ok(plain_response(
                StatusCode::NOT_FOUND,
                format!("Cannot {} {}", request.method(), request.path()),
            ));
        };
        let next = Self {
            stages: Arc::clone(&self.stages),
            index: self.index + 1,
        };

        let outcome = AssertUnwindSafe(stage.handle(request, next))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(mut response)) => match response.extensions_mut().remove::<RaisedError>() {
                Some(RaisedError(error)) => Err(Fault::Error(error)),
                None => Ok(response),
            },
            Ok(Err(fault)) => Err(fault),
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(stage = stage.name(), "stage panicked: {reason}");
                Err(Fault::Error(HttpError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                )))
            }
        }
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.stages.len().saturating_sub(self.index))
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects stages in installation order.
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage after everything installed so far.
    pub fn install(&mut self, stage: impl Stage + 'static) {
        tracing::debug!(stage = stage.name(), position = self.stages.len(), "installing stage");
        self.stages.push(Arc::new(stage));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The assembled pipeline, usable as a tower service.
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[Arc<dyn Stage>]>,
}

impl Pipeline {
    /// Stage names in installation order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|stage| stage.name().to_owned()).collect()
    }

    /// Runs a request through every stage and the terminal error handler.
    pub async fn dispatch(&self, request: Request) -> Response {
        let span = info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            status = tracing::field::Empty,
            elapsed_ms = tracing::field::Empty,
        );
        let next = Next {
            stages: Arc::clone(&self.stages),
            index: 0,
        };

        async move {
            let start = Instant::now();
            let response = match next.run(HttpRequest::new(request)).await {
                Ok(response) => response,
                Err(fault) => handle_fault(fault),
            };
            let span = tracing::Span::current();
            span.record("status", response.status().as_u16());
            span.record(
                "elapsed_ms",
                u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            );
            response
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl tower::Service<Request> for Pipeline {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let pipeline = self.clone();
        Box::pin(async move { Ok(pipeline.dispatch(request).await) })
    }
}
