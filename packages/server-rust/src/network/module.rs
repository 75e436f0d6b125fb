//! HTTP server with deferred startup.
//!
//! `new()` wires state, `start()` binds the listener and `serve()` accepts
//! connections until the shutdown future resolves, then drains in-flight
//! invocations.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    health_handler, invoke_handler, liveness_handler, readiness_handler, AppState,
};
use super::lifecycle::Lifecycle;
use super::middleware::{build_http_layers, track_in_flight};
use crate::service::Dispatcher;

pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    state: AppState,
}

impl NetworkModule {
    #[must_use]
    pub fn new(config: NetworkConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            listener: None,
            state: AppState {
                dispatcher,
                lifecycle: Arc::new(Lifecycle::new()),
                start_time: Instant::now(),
            },
        }
    }

    #[must_use]
    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.state.lifecycle)
    }

    /// Routes:
    /// - `GET /health`, `GET /health/live`, `GET /health/ready`
    /// - `POST /invoke/{operation}`, counted as in flight and refused
    ///   unless the server is ready
    pub fn build_router(&self) -> Router {
        let invoke = Router::new()
            .route("/invoke/{operation}", post(invoke_handler))
            .route_layer(from_fn_with_state(self.state.clone(), track_in_flight));

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .merge(invoke)
            .layer(build_http_layers(&self.config))
            .with_state(self.state.clone())
    }

    /// Binds the listener and returns the bound port, which differs from
    /// the configured one when that is 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves. New invocations are refused from
    /// that moment; in-flight ones get `drain_timeout` to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();
        let lifecycle = self.lifecycle();

        lifecycle.set_ready();
        info!("serving invocations");

        let draining = Arc::clone(&lifecycle);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                draining.begin_drain();
                info!("shutdown requested, draining");
            })
            .await?;

        if lifecycle.wait_for_drain(self.config.drain_timeout).await {
            info!("all invocations drained");
        } else {
            warn!(
                in_flight = lifecycle.in_flight(),
                "drain timeout expired with invocations still running"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tower::ServiceExt;

    use super::*;
    use crate::network::handlers::test_support::ready_state;
    use crate::network::lifecycle::HealthState;

    async fn module() -> NetworkModule {
        let (state, _) = ready_state().await;
        NetworkModule::new(
            NetworkConfig {
                host: "127.0.0.1".to_string(),
                ..NetworkConfig::default()
            },
            state.dispatcher,
        )
    }

    async fn http_get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn invocations_are_refused_before_ready() {
        let module = module().await;
        assert_eq!(module.lifecycle().state(), HealthState::Starting);

        let request = Request::builder()
            .method("POST")
            .uri("/invoke/get_node")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"args":[]}"#))
            .unwrap();
        let response = module.build_router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(module.lifecycle().in_flight(), 0);
    }

    #[tokio::test]
    async fn responses_carry_a_request_id() {
        let module = module().await;
        let request = Request::builder()
            .uri("/health/live")
            .body(Body::empty())
            .unwrap();
        let response = module.build_router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let module = module().await;
        let err = module.serve(std::future::pending::<()>()).await.unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    #[tokio::test]
    async fn serves_until_shutdown_then_stops() {
        let mut module = module().await;
        let port = module.start().await.unwrap();
        assert!(port > 0);
        let lifecycle = module.lifecycle();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(module.serve(async move {
            let _ = stop_rx.await;
        }));

        let response = http_get(port, "/health/ready").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(lifecycle.state(), HealthState::Stopped);
    }
}
