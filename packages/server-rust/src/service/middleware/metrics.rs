//! Metrics middleware for operation invocations.
//!
//! Records duration and outcome on a `tracing` span per invocation and feeds
//! the same numbers to the `metrics` facade.

use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::{Invocation, OperationResponse, ServiceError};
use crate::service::registry::OperationFuture;

/// Counter of completed invocations, labelled by operation and outcome.
pub const OPERATIONS_TOTAL: &str = "docvault_operations_total";
/// Histogram of invocation wall time in seconds, labelled by operation.
pub const OPERATION_DURATION_SECONDS: &str = "docvault_operation_duration_seconds";

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments invocations with timing and counting.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Invocation> for MetricsService<S>
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
        let operation = inv.operation.clone();
        let span = info_span!(
            "operation",
            operation = %operation,
            args = inv.args.len(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let start = Instant::now();
        let fut = {
            let _entered = span.enter();
            tracing::debug!("operation start");
            self.inner.call(inv)
        };

        Box::pin(
            async move {
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(err) => err.kind(),
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                tracing::info!(
                    operation = %operation,
                    duration_ms,
                    outcome,
                    "operation complete"
                );

                metrics::counter!(
                    OPERATIONS_TOTAL,
                    "operation" => operation.clone(),
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
                    .record(elapsed.as_secs_f64());

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
