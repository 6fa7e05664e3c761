//! Listener binding and the serve loop.
//!
//! Binding and serving are separate steps: the orchestrator binds first so
//! a bind failure still aborts ignition, then hands the listener to a
//! background task that serves until the shutdown signal fires.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::layers::build_http_layers;
use super::lifecycle::{shutdown_signal, LifecycleController, LifecycleEvent, LifecycleState};
use crate::error::IgnitionError;
use crate::pipeline::Pipeline;

/// Slot holding the bound address while the server is listening.
pub(crate) type AddressSlot = Arc<Mutex<Option<SocketAddr>>>;

/// Wraps the pipeline in the transport layers.
#[must_use]
pub fn build_app(pipeline: Pipeline, request_timeout: Duration) -> Router {
    Router::new()
        .fallback_service(pipeline)
        .layer(build_http_layers(request_timeout))
}

/// Binds the TCP listener.
///
/// # Errors
///
/// Returns [`IgnitionError::Bind`] if the address cannot be bound (e.g.,
/// port in use).
pub async fn bind(address: &str) -> Result<(TcpListener, SocketAddr), IgnitionError> {
    let bind_error = |source| IgnitionError::Bind {
        address: address.to_owned(),
        source,
    };
    let listener = TcpListener::bind(address).await.map_err(bind_error)?;
    let local = listener.local_addr().map_err(bind_error)?;
    info!("TCP listener bound to {local}");
    Ok((listener, local))
}

/// Serves `app` on `listener` until the lifecycle's shutdown signal fires.
///
/// When serving ends, the address slot is cleared, the state becomes
/// `Closed`, and a `Close` event is emitted.
pub(crate) fn spawn_server(
    listener: TcpListener,
    app: Router,
    lifecycle: Arc<LifecycleController>,
    address: AddressSlot,
) -> JoinHandle<()> {
    let shutdown = shutdown_signal(lifecycle.shutdown_receiver());

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("server stopped with an I/O error: {err}");
        }
        mark_closed(&lifecycle, &address);
    })
}

/// Clears the socket handle and announces the close.
pub(crate) fn mark_closed(lifecycle: &LifecycleController, address: &Mutex<Option<SocketAddr>>) {
    let previous = address.lock().take();
    lifecycle.set_state(LifecycleState::Closed);
    lifecycle.emit(LifecycleEvent::Close);
    if let Some(previous) = previous {
        info!("listener on {previous} closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;

    #[tokio::test]
    async fn bind_reports_os_assigned_port() {
        let (_listener, address) = bind("127.0.0.1:0").await.unwrap();
        assert_ne!(address.port(), 0);
    }

    #[tokio::test]
    async fn bind_conflict_is_an_ignition_error() {
        let (_held, address) = bind("127.0.0.1:0").await.unwrap();
        let err = bind(&address.to_string()).await.unwrap_err();
        assert!(matches!(err, IgnitionError::Bind { .. }));
    }

    #[tokio::test]
    async fn server_task_closes_on_shutdown() {
        let lifecycle = Arc::new(LifecycleController::new());
        let mut events = lifecycle.subscribe();
        let (listener, local) = bind("127.0.0.1:0").await.unwrap();
        let slot: AddressSlot = Arc::new(Mutex::new(Some(local)));
        lifecycle.set_state(LifecycleState::Listening);

        let app = build_app(PipelineBuilder::new().build(), Duration::from_secs(5));
        let task = spawn_server(listener, app, Arc::clone(&lifecycle), Arc::clone(&slot));

        lifecycle.trigger_shutdown();
        task.await.unwrap();

        assert_eq!(lifecycle.state(), LifecycleState::Closed);
        assert!(slot.lock().is_none());
        assert_eq!(events.recv().await.unwrap(), LifecycleEvent::Close);
    }
}
