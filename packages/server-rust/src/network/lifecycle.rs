//! Orchestrator lifecycle: state machine, `open`/`close` events, and the
//! shutdown signal shared with the server task.
//!
//! Uses `ArcSwap` for lock-free state reads and a `watch` channel to tell the
//! serve loop when to stop accepting connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::{broadcast, watch};

/// Lifecycle state of the orchestrator.
///
/// State machine: Constructed -> Igniting -> Listening -> Closing -> Closed.
/// A failed ignition returns to the state it started from; a closed
/// orchestrator may be ignited again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Built, never ignited.
    Constructed,
    /// Discovery and pipeline assembly in progress.
    Igniting,
    /// Socket bound, `open` emitted.
    Listening,
    /// `extinguish` in progress.
    Closing,
    /// Socket closed, `close` emitted.
    Closed,
}

/// Events emitted to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The listening socket is bound.
    Open { address: SocketAddr },
    /// The listening socket is fully closed.
    Close,
}

const EVENT_CAPACITY: usize = 16;

/// Shared lifecycle state for the orchestrator, its handle, and the server task.
#[derive(Debug)]
pub struct LifecycleController {
    state: ArcSwap<LifecycleState>,
    events: broadcast::Sender<LifecycleEvent>,
    shutdown_signal: watch::Sender<bool>,
}

impl LifecycleController {
    /// Creates a controller in the `Constructed` state.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_signal, _) = watch::channel(false);
        Self {
            state: ArcSwap::from_pointee(LifecycleState::Constructed),
            events,
            shutdown_signal,
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    pub(crate) fn set_state(&self, state: LifecycleState) {
        self.state.store(Arc::new(state));
    }

    /// Subscribes to `open`/`close` events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Returns a receiver notified when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Signals the server task to stop accepting connections.
    pub fn trigger_shutdown(&self) {
        self.shutdown_signal.send_replace(true);
    }

    /// Re-arms the shutdown signal before a new ignition.
    pub(crate) fn reset_shutdown(&self) {
        self.shutdown_signal.send_replace(false);
    }

    /// Waits until the state equals `target`, up to `timeout`.
    ///
    /// Returns `true` if the state was reached. A timeout too large to
    /// represent as a deadline waits indefinitely.
    pub async fn wait_for(&self, target: LifecycleState, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now().checked_add(timeout);

        loop {
            if self.state() == target {
                return true;
            }

            if deadline.is_some_and(|deadline| tokio::time::Instant::now() >= deadline) {
                return false;
            }

            // Poll at 10ms intervals to avoid busy-waiting
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the shutdown signal is raised or the controller is gone.
pub(crate) async fn shutdown_signal(mut receiver: watch::Receiver<bool>) {
    while !*receiver.borrow_and_update() {
        if receiver.changed().await.is_err() {
            return;
        }
    }
}
