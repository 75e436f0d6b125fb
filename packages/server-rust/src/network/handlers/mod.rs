//! Axum handlers of the HTTP adapter and the state they share.

pub mod health;
pub mod invoke;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use invoke::invoke_handler;

use std::sync::Arc;
use std::time::Instant;

use super::lifecycle::Lifecycle;
use crate::service::Dispatcher;

/// Shared state extracted by every handler. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub lifecycle: Arc<Lifecycle>,
    /// Used for the uptime report.
    pub start_time: Instant,
}
