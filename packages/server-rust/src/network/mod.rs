//! Transport layers, listener management, and lifecycle control.

pub mod layers;
pub mod lifecycle;
pub mod server;

pub use layers::build_http_layers;
pub use lifecycle::{LifecycleController, LifecycleEvent, LifecycleState};
pub use server::{bind, build_app};
