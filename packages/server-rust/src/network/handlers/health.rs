//! Health, liveness and readiness probes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::lifecycle::HealthState;

/// Detailed health report. Always 200; the `state` field carries the verdict.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "state": state.lifecycle.state().as_str(),
        "operations": state.dispatcher.registry().len(),
        "in_flight": state.lifecycle.in_flight(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Process is up. Never consults downstream state.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// 200 only while the server is `Ready`.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.lifecycle.state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::handlers::test_support::ready_state;

    #[tokio::test]
    async fn health_reports_state_operations_and_in_flight() {
        let (state, _) = ready_state().await;
        let _guard = state.lifecycle.track_request();

        let json = health_handler(State(state)).await.0;

        assert_eq!(json["state"], "ready");
        assert_eq!(json["operations"], 11);
        assert_eq!(json["in_flight"], 1);
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_reports_draining() {
        let (state, _) = ready_state().await;
        state.lifecycle.begin_drain();
        assert_eq!(health_handler(State(state)).await.0["state"], "draining");
    }

    #[tokio::test]
    async fn liveness_is_unconditional() {
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_follows_lifecycle() {
        let (state, _) = ready_state().await;
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::OK);

        state.lifecycle.begin_drain();
        assert_eq!(
            readiness_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
