//! The request value threaded through pipeline stages.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, Uri};
use rapidfire_core::QueryMap;
use serde_json::Value;

/// A request in flight through the pipeline.
///
/// `query` starts empty and is filled by the query normalizer when the URL
/// carries a `?`. `json` is set by the body parser for JSON requests.
/// Both are handed to service handlers as request extensions.
#[derive(Debug)]
pub struct HttpRequest {
    parts: Parts,
    body: Body,
    pub query: QueryMap,
    pub json: Option<Value>,
}

impl HttpRequest {
    #[must_use]
    pub fn new(request: Request) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            parts,
            body,
            query: QueryMap::new(),
            json: None,
        }
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    /// The raw query string, present whenever the URL contains `?`.
    #[must_use]
    pub fn raw_query(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }

    #[must_use]
    pub fn extensions(&self) -> &axum::http::Extensions {
        &self.parts.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut axum::http::Extensions {
        &mut self.parts.extensions
    }

    /// Takes the body out, leaving an empty one behind.
    pub fn take_body(&mut self) -> Body {
        std::mem::replace(&mut self.body, Body::empty())
    }

    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    /// A copy of everything except the body.
    pub(crate) fn snapshot(&self) -> Self {
        Self {
            parts: clone_parts(&self.parts),
            body: Body::empty(),
            query: self.query.clone(),
            json: self.json.clone(),
        }
    }

    /// Converts back into a transport request, exposing the normalized query
    /// and parsed body as extensions.
    #[must_use]
    pub fn into_request(self) -> Request {
        let mut request = Request::from_parts(self.parts, self.body);
        request
            .extensions_mut()
            .insert(NormalizedQuery(self.query));
        request.extensions_mut().insert(JsonBody(self.json));
        request
    }
}

fn clone_parts(parts: &Parts) -> Parts {
    let mut request = Request::new(());
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.version_mut() = parts.version;
    *request.headers_mut() = parts.headers.clone();
    *request.extensions_mut() = parts.extensions.clone();
    request.into_parts().0
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// The normalized query mapping, extractable in service handlers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedQuery(pub QueryMap);

impl<S: Send + Sync> FromRequestParts<S> for NormalizedQuery {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Self>().cloned().unwrap_or_default())
    }
}

/// The parsed JSON body, `None` for non-JSON requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonBody(pub Option<Value>);

impl<S: Send + Sync> FromRequestParts<S> for JsonBody {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Self>().cloned().unwrap_or_default())
    }
}
