//! Startup errors.
//!
//! Everything that can go wrong during `ignition()` is fatal and surfaces as
//! an [`IgnitionError`]. Request-time failures use
//! [`HttpError`](crate::pipeline::HttpError) instead and never abort the server.

use std::net::SocketAddr;
use std::path::PathBuf;

use rapidfire_core::{ComponentKind, ManifestError};
use thiserror::Error;

/// Fatal errors raised while igniting the orchestrator.
#[derive(Debug, Error)]
pub enum IgnitionError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("no {kind} factory named `{name}` is registered (declared in {path})")]
    UnknownComponent {
        kind: ComponentKind,
        name: String,
        path: PathBuf,
    },

    #[error("failed to instantiate {kind} `{name}`: {source:#}")]
    Instantiate {
        kind: ComponentKind,
        name: String,
        source: anyhow::Error,
    },

    #[error("no registered loader has key `{loader}` (required by service `{service}`)")]
    LoaderNotFound { service: String, loader: String },

    #[error("loader `{loader}` failed to load service `{service}`: {source:#}")]
    ServiceLoad {
        service: String,
        loader: String,
        source: anyhow::Error,
    },

    #[error("middleware `{name}` failed to initialize: {source:#}")]
    MiddlewareInit { name: String, source: anyhow::Error },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("server is already listening on {0}")]
    AlreadyListening(SocketAddr),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_not_found_names_both_sides() {
        let err = IgnitionError::LoaderNotFound {
            service: "users".to_owned(),
            loader: "graphql".to_owned(),
        };
        let message = err.to_string();
        assert!(message.contains("`graphql`"));
        assert!(message.contains("`users`"));
    }

    #[test]
    fn instantiate_includes_cause_chain() {
        let err = IgnitionError::Instantiate {
            kind: ComponentKind::Middleware,
            name: "auth".to_owned(),
            source: anyhow::anyhow!("missing secret").context("reading options"),
        };
        let message = err.to_string();
        assert!(message.contains("middleware `auth`"));
        assert!(message.contains("missing secret"));
    }
}
