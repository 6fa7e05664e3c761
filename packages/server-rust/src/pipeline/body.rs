//! JSON body parsing stage.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::HeaderMap;
use bytes::{Bytes, BytesMut};
use futures_util::TryStreamExt;
use rapidfire_core::BodyParserConfig;
use serde_json::Value;

use super::{HttpError, HttpRequest, Next, PipeResult, Stage};

/// Buffers and parses JSON request bodies into [`HttpRequest::json`].
///
/// The raw bytes are put back so handlers may still read the body.
#[derive(Debug, Clone, Default)]
pub struct JsonBodyParser {
    config: BodyParserConfig,
}

impl JsonBodyParser {
    #[must_use]
    pub fn new(config: BodyParserConfig) -> Self {
        Self { config }
    }

    async fn read(&self, request: &mut HttpRequest) -> Result<Bytes, HttpError> {
        if declared_length(request.headers()).is_some_and(|len| len > self.config.limit) {
            return Err(HttpError::payload_too_large());
        }
        // Chunked bodies carry no length up front; count as frames arrive.
        let mut stream = request.take_body().into_data_stream();
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream
            .try_next()
            .await
            .map_err(|err| HttpError::bad_request(format!("request aborted: {err}")))?
        {
            if buffer.len() + chunk.len() > self.config.limit {
                return Err(HttpError::payload_too_large());
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    fn parse(&self, bytes: &[u8]) -> Result<Value, HttpError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| HttpError::bad_request("request body is not valid UTF-8"))?;
        let trimmed = text.trim_start();
        if trimmed.is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        if self.config.strict && !trimmed.starts_with(['{', '[']) {
            return Err(HttpError::bad_request(
                "strict mode: top-level JSON value must be an object or array",
            ));
        }
        serde_json::from_str(text).map_err(|err| HttpError::bad_request(err.to_string()))
    }
}

#[async_trait]
impl Stage for JsonBodyParser {
    fn name(&self) -> &str {
        "json-body-parser"
    }

    async fn handle(&self, mut request: HttpRequest, next: Next) -> PipeResult {
        if !is_json(request.headers()) {
            return next.run(request).await;
        }

        let bytes = self.read(&mut request).await?;
        request.json = Some(self.parse(&bytes)?);
        request.set_body(Body::from(bytes));
        next.run(request).await
    }
}

/// `application/json` or any `application/*+json`.
fn is_json(headers: &HeaderMap) -> bool {
    let Some(value) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let essence = value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    match essence.split_once('/') {
        Some(("application", subtype)) => subtype == "json" || subtype.ends_with("+json"),
        _ => false,
    }
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
