use async_trait::async_trait;
use rapidfire_core::{parse_query, QueryParserConfig};

use super::{HttpRequest, Next, PipeResult, Stage};

/// Replaces the request's query mapping with the normalized one.
///
/// Requests whose URL has no `?` keep the empty default.
#[derive(Debug, Clone, Default)]
pub struct QueryNormalizer {
    config: QueryParserConfig,
}

impl QueryNormalizer {
    #[must_use]
    pub fn new(config: QueryParserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Stage for QueryNormalizer {
    fn name(&self) -> &str {
        "query-normalizer"
    }

    async fn handle(&self, mut request: HttpRequest, next: Next) -> PipeResult {
        if let Some(raw) = request.raw_query() {
            request.query = parse_query(raw, &self.config);
        }
        next.run(request).await
    }
}
