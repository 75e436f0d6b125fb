//! Pipeline composition: combines all middleware layers into a single service stack.

use tower::ServiceBuilder;

use super::metrics::{MetricsLayer, MetricsService};
use super::scope::{ScopeLayer, ScopeService};
use crate::service::failure::FailureMapper;
use crate::service::router::MethodRouter;

/// Fully layered dispatch service.
pub type DispatchService = MetricsService<ScopeService<MethodRouter>>;

/// Build the dispatch pipeline by wrapping the `MethodRouter` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- record timing and outcome, including caught panics
/// 2. `ScopeLayer` -- clear the call identity on every exit path and turn
///    panics into opaque failures
#[must_use]
pub fn build_dispatch_pipeline(router: MethodRouter, mapper: FailureMapper) -> DispatchService {
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(ScopeLayer::new(mapper))
        .service(router)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tower::ServiceExt;

    use super::*;
    use crate::service::operation::{Invocation, OperationResponse, ServiceError};
    use crate::service::registry::{MethodRegistry, OperationDescriptor, OperationProvider};
    use crate::service::scope::CallScope;

    struct PanickingProvider;

    fn explode() -> Result<OperationResponse, ServiceError> {
        panic!("handler bug")
    }

    #[async_trait]
    impl OperationProvider for PanickingProvider {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn operations(self: Arc<Self>) -> Vec<OperationDescriptor> {
            vec![
                OperationDescriptor::new("ok", 0, |_, _| Box::pin(async { Ok(OperationResponse::Empty) })),
                OperationDescriptor::new("explode", 0, |_, _| Box::pin(async { explode() })),
            ]
        }
    }

    fn pipeline() -> DispatchService {
        let mut registry = MethodRegistry::new();
        registry.register(Arc::new(PanickingProvider));
        build_dispatch_pipeline(
            MethodRouter::new(Arc::new(registry), false),
            FailureMapper::new("repo-1"),
        )
    }

    fn invocation(operation: &str) -> Invocation {
        Invocation {
            operation: operation.to_string(),
            args: Vec::new(),
            scope: CallScope::new(),
        }
    }

    #[tokio::test]
    async fn pipeline_routes_through_all_layers() {
        let resp = pipeline().oneshot(invocation("ok")).await.unwrap();
        assert_eq!(resp, OperationResponse::Empty);
    }

    #[tokio::test]
    async fn unknown_operation_passes_through_as_not_implemented() {
        let err = pipeline().oneshot(invocation("nope")).await.unwrap_err();
        assert_eq!(err.kind(), "NotImplemented");
    }

    #[tokio::test]
    async fn handler_panic_is_opaque() {
        let err = pipeline().oneshot(invocation("explode")).await.unwrap_err();
        assert!(matches!(err, ServiceError::OpaqueInternal { .. }));
    }
}
