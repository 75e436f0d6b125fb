//! Scope middleware: owns the identity teardown of every invocation.
//!
//! A [`ScopeGuard`](crate::service::scope::ScopeGuard) is taken before the
//! inner service is called and lives inside the returned future, so the
//! call's identity is cleared on success, on failure, on panic and when the
//! caller drops the future mid-flight. Panics are caught here and surface as
//! opaque internal failures.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use tower::{Layer, Service};

use crate::service::failure::FailureMapper;
use crate::service::operation::{Invocation, OperationResponse, ServiceError};
use crate::service::registry::OperationFuture;

// ---------------------------------------------------------------------------
// ScopeLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScopeLayer {
    mapper: FailureMapper,
}

impl ScopeLayer {
    #[must_use]
    pub fn new(mapper: FailureMapper) -> Self {
        Self { mapper }
    }
}

impl<S> Layer<S> for ScopeLayer {
    type Service = ScopeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ScopeService {
            inner,
            mapper: self.mapper.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ScopeService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScopeService<S> {
    inner: S,
    mapper: FailureMapper,
}

impl<S> Service<Invocation> for ScopeService<S>
where
    S: Service<Invocation, Response = OperationResponse, Error = ServiceError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = ServiceError;
    type Future = OperationFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, inv: Invocation) -> Self::Future {
        let guard = inv.scope.guard();
        let mapper = self.mapper.clone();
        let operation = inv.operation.clone();

        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| self.inner.call(inv))) {
            Ok(fut) => fut,
            Err(payload) => {
                drop(guard);
                let err = mapper.opaque(&panic_detail(&operation, payload.as_ref()));
                return Box::pin(async move { Err(err) });
            }
        };

        Box::pin(async move {
            let _guard = guard;
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(mapper.opaque(&panic_detail(&operation, payload.as_ref()))),
            }
        })
    }
}

fn panic_detail(operation: &str, payload: &(dyn Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");
    format!("operation {operation} panicked: {message}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use docvault_core::{Channel, IdentityContext, Principal};
    use tower::ServiceExt;

    use super::*;
    use crate::service::scope::CallScope;

    fn identity() -> IdentityContext {
        IdentityContext {
            principal: Principal {
                id: "alice".to_string(),
                roles: Vec::new(),
            },
            tenant: "acme".to_string(),
            channel: Channel::Rpc,
            api_level: 1,
            application: None,
            physical_identity: None,
            repository: None,
        }
    }

    /// Binds an identity, then behaves according to the operation name.
    struct BindingService;

    impl Service<Invocation> for BindingService {
        type Response = OperationResponse;
        type Error = ServiceError;
        type Future = OperationFuture;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, inv: Invocation) -> Self::Future {
            inv.scope.bind(identity());
            assert!(inv.operation != "panic-sync", "sync blow-up");
            let operation = inv.operation;
            Box::pin(async move {
                match operation.as_str() {
                    "panic-async" => panic!("async blow-up"),
                    "pending" => std::future::pending().await,
                    "fail" => Err(ServiceError::invalid_parameter("bad")),
                    _ => Ok(OperationResponse::Empty),
                }
            })
        }
    }

    fn svc() -> ScopeService<BindingService> {
        ScopeLayer::new(FailureMapper::new("repo-1")).layer(BindingService)
    }

    fn invocation(operation: &str) -> (Invocation, Arc<CallScope>) {
        let scope = CallScope::new();
        let inv = Invocation {
            operation: operation.to_string(),
            args: Vec::new(),
            scope: Arc::clone(&scope),
        };
        (inv, scope)
    }

    #[tokio::test]
    async fn clears_identity_after_success_and_failure() {
        for op in ["ok", "fail"] {
            let (inv, scope) = invocation(op);
            let _ = svc().oneshot(inv).await;
            assert!(!scope.is_bound(), "{op} left identity bound");
        }
    }

    #[tokio::test]
    async fn panics_become_opaque_and_clear_identity() {
        for op in ["panic-sync", "panic-async"] {
            let (inv, scope) = invocation(op);
            let err = svc().oneshot(inv).await.unwrap_err();
            assert!(
                matches!(&err, ServiceError::OpaqueInternal { host, .. } if host == "repo-1"),
                "{op}: {err:?}"
            );
            assert!(!scope.is_bound());
        }
    }

    #[tokio::test]
    async fn dropping_in_flight_call_clears_identity() {
        let (inv, scope) = invocation("pending");
        let fut = svc().oneshot(inv);
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(10), fut).await;
        assert!(timed_out.is_err());
        assert!(!scope.is_bound());
    }

    #[test]
    fn panic_detail_reads_string_payloads() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("static");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert!(panic_detail("x", owned.as_ref()).ends_with("owned"));
        assert!(panic_detail("x", borrowed.as_ref()).ends_with("static"));
        assert!(panic_detail("x", other.as_ref()).ends_with("non-string panic payload"));
    }
}
