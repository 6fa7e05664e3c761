use std::sync::Arc;

use async_trait::async_trait;
use rapidfire_core::PathPattern;

use super::{HttpRequest, Next, PipeResult, Stage};
use crate::traits::Middleware;

/// Runs a middleware's `pipe` for requests matching its pattern.
///
/// Without a pattern every request is piped; otherwise non-matching
/// requests skip straight to the next stage.
pub struct MiddlewareStage {
    name: String,
    pattern: Option<PathPattern>,
    middleware: Arc<dyn Middleware>,
}

impl MiddlewareStage {
    #[must_use]
    pub fn new(name: &str, pattern: Option<PathPattern>, middleware: Arc<dyn Middleware>) -> Self {
        Self {
            name: format!("middleware:{name}"),
            pattern,
            middleware,
        }
    }
}

#[async_trait]
impl Stage for MiddlewareStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, request: HttpRequest, next: Next) -> PipeResult {
        let applies = self
            .pattern
            .as_ref()
            .is_none_or(|pattern| pattern.matches(request.path()));
        if applies {
            self.middleware.pipe(request, next).await
        } else {
            next.run(request).await
        }
    }
}
