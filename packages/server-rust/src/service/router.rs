//! Operation routing: dispatches an [`Invocation`] to its registered handler
//! by operation name.

use std::sync::Arc;
use std::task::{Context, Poll};

use docvault_core::Value;
use tower::Service;
use tracing::warn;

use super::operation::{Arguments, Invocation, OperationResponse, ServiceError};
use super::registry::{MethodRegistry, OperationFuture};

// ---------------------------------------------------------------------------
// MethodRouter
// ---------------------------------------------------------------------------

/// Routes [`Invocation`] values to the handler registered for their name.
///
/// Unregistered names fail with `ServiceError::NotImplemented` before any
/// handler runs, so no identity is ever established for them. Calls whose
/// argument count differs from the declared arity fail with
/// `InvalidParameter`.
#[derive(Clone)]
pub struct MethodRouter {
    registry: Arc<MethodRegistry>,
    trace_arguments: bool,
}

impl MethodRouter {
    #[must_use]
    pub fn new(registry: Arc<MethodRegistry>, trace_arguments: bool) -> Self {
        Self {
            registry,
            trace_arguments,
        }
    }
}

impl Service<Invocation> for MethodRouter {
    type Response = OperationResponse;
    type Error = ServiceError;
    type Future = OperationFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, inv: Invocation) -> Self::Future {
        let Invocation {
            operation,
            args,
            scope,
        } = inv;

        let Some(entry) = self.registry.lookup(&operation) else {
            return Box::pin(async move { Err(ServiceError::NotImplemented { operation }) });
        };
        let descriptor = &entry.descriptor;

        if args.len() != descriptor.arity {
            let err = ServiceError::invalid_parameter(format!(
                "{operation} takes {} argument(s), got {}",
                descriptor.arity,
                args.len()
            ));
            return Box::pin(async move { Err(err) });
        }

        // Arguments are only retained for the failure trace when it is on.
        let traced = self
            .trace_arguments
            .then(|| (args.clone(), descriptor.sensitive));
        let fut = (descriptor.handler)(scope, Arguments::new(args));

        Box::pin(async move {
            let result = fut.await;
            if let (Err(err), Some((args, sensitive))) = (&result, traced) {
                trace_arguments(&operation, err, &args, sensitive);
            }
            result
        })
    }
}

/// Arguments of a call that may be written to logs, rendered as JSON.
/// Sensitive positions and binary payloads are left out.
fn loggable_arguments(args: &[Value], sensitive: &[usize]) -> Vec<(usize, serde_json::Value)> {
    args.iter()
        .enumerate()
        .filter(|(position, arg)| !sensitive.contains(position) && !arg.is_binary())
        .map(|(position, arg)| (position, arg.to_json()))
        .collect()
}

fn trace_arguments(operation: &str, err: &ServiceError, args: &[Value], sensitive: &[usize]) {
    for (position, argument) in loggable_arguments(args, sensitive) {
        warn!(
            operation,
            position,
            argument = %argument,
            kind = err.kind(),
            "failed call argument"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
