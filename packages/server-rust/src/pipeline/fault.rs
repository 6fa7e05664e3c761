//! Request-time errors and the terminal error handler.

use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// An error raised while handling a request.
///
/// Carries an optional status; the terminal handler falls back to `500`.
/// Service handlers may return it directly: its response is marked so the
/// pipeline routes it to the terminal handler instead of passing it through.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HttpError {
    status: Option<StatusCode>,
    message: String,
}

impl HttpError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// An error without a declared status.
    #[must_use]
    pub fn without_status(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    #[must_use]
    pub fn payload_too_large() -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "request entity too large")
    }

    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    #[must_use]
    pub fn status_or_default(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for HttpError {
    fn from(err: anyhow::Error) -> Self {
        Self::without_status(format!("{err:#}"))
    }
}

/// Marker attached to responses produced from an [`HttpError`].
#[derive(Debug, Clone)]
pub(crate) struct RaisedError(pub(crate) HttpError);

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = plain_response(self.status_or_default(), self.message.clone());
        response.extensions_mut().insert(RaisedError(self));
        response
    }
}

// ---------------------------------------------------------------------------
// Fault
// ---------------------------------------------------------------------------

/// Why a stage did not produce a normal response.
#[derive(Debug)]
pub enum Fault {
    /// Nothing has been sent yet; the terminal handler answers.
    Error(HttpError),
    /// A response was already committed before the error surfaced.
    Committed { response: Response, error: HttpError },
}

impl Fault {
    #[must_use]
    pub fn error(&self) -> &HttpError {
        match self {
            Self::Error(error) | Self::Committed { error, .. } => error,
        }
    }

    #[must_use]
    pub fn headers_sent(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

impl From<HttpError> for Fault {
    fn from(error: HttpError) -> Self {
        Self::Error(error)
    }
}

impl From<anyhow::Error> for Fault {
    fn from(err: anyhow::Error) -> Self {
        Self::Error(err.into())
    }
}

/// Result of a pipeline stage.
pub type PipeResult = Result<Response, Fault>;

// ---------------------------------------------------------------------------
// Terminal error handler
// ---------------------------------------------------------------------------

/// Terminal error handler: logs the fault, then answers with its status and
/// message, or defers to the transport when headers were already sent.
pub(crate) fn handle_fault(fault: Fault) -> Response {
    let error = fault.error();
    error!(
        status = error.status_or_default().as_u16(),
        headers_sent = fault.headers_sent(),
        "request failed: {error}"
    );

    match fault {
        Fault::Committed { response, .. } => transport_default(response),
        Fault::Error(error) => plain_response(error.status_or_default(), error.message),
    }
}

/// Default handling once headers are out: the committed response stands.
fn transport_default(response: Response) -> Response {
    response
}

pub(crate) fn plain_response(status: StatusCode, body: String) -> Response {
    (status, [(CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}
