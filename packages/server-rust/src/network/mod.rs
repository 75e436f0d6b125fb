//! HTTP adapter: configuration, lifecycle, middleware and handlers.

pub mod config;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod module;

pub use config::NetworkConfig;
pub use handlers::AppState;
pub use lifecycle::{HealthState, Lifecycle, RequestGuard};
pub use module::NetworkModule;
