//! Tower middleware layers for the dispatch pipeline.
//!
//! - [`metrics`]: Invocation timing and counting via `tracing` spans and the `metrics` facade
//! - [`scope`]: Identity teardown and panic capture
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod metrics;
pub mod pipeline;
pub mod scope;

pub use metrics::MetricsLayer;
pub use pipeline::{build_dispatch_pipeline, DispatchService};
pub use scope::ScopeLayer;
