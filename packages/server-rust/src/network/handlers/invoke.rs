//! `POST /invoke/{operation}`: the JSON protocol adapter over the dispatcher.
//!
//! Request body: `{"args": [...]}` with the credential bundle as the first
//! argument of every domain operation. Success replies
//! `{"result": {"type": ..., "value": ...}}`; failure replies
//! `{"error": {"kind": ..., "message": ...}}` with a status derived from the
//! failure kind.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use docvault_core::Value;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::service::{OperationResponse, ServiceError};

#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Serialize)]
struct InvokeReply {
    result: OperationResponse,
}

#[derive(Serialize)]
struct ErrorReply {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

pub async fn invoke_handler(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    body: Result<Json<InvokeRequest>, JsonRejection>,
) -> Response {
    let args = match body {
        Ok(Json(request)) => request.args,
        Err(rejection) => {
            return error_response(&ServiceError::invalid_parameter(format!(
                "malformed request body: {}",
                rejection.body_text()
            )));
        }
    };

    match state.dispatcher.invoke(&operation, args).await {
        Ok(result) => (StatusCode::OK, Json(InvokeReply { result })).into_response(),
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &ServiceError) -> Response {
    let reply = ErrorReply {
        error: ErrorBody {
            kind: err.kind(),
            message: err.to_string(),
        },
    };
    (status_for(err), Json(reply)).into_response()
}

/// HTTP status of each failure kind.
#[must_use]
pub fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
        ServiceError::InvalidCredentials(_) => StatusCode::UNAUTHORIZED,
        ServiceError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        ServiceError::NoSuchNode(_) => StatusCode::NOT_FOUND,
        ServiceError::CheckInCheckOut { .. } | ServiceError::Transaction(_) => StatusCode::CONFLICT,
        ServiceError::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
        ServiceError::SearchFailure(_) => StatusCode::BAD_GATEWAY,
        ServiceError::OpaqueInternal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::network::handlers::test_support::ready_state;

    fn router(state: AppState) -> Router {
        Router::new()
            .route("/invoke/{operation}", post(invoke_handler))
            .with_state(state)
    }

    async fn post_json(app: Router, operation: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/invoke/{operation}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1_000_000)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn credentials(password: &str) -> String {
        format!(r#"{{"username":"alice@acme","password":"{password}"}}"#)
    }

    #[tokio::test]
    async fn get_node_returns_tagged_result() {
        let (state, root) = ready_state().await;
        let body = format!(r#"{{"args":[{},"{root}"]}}"#, credentials("s3cret"));

        let (status, json) = post_json(router(state), "get_node", &body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["result"]["type"], "node");
    }

    #[tokio::test]
    async fn bad_credentials_map_to_401() {
        let (state, root) = ready_state().await;
        let body = format!(r#"{{"args":[{},"{root}"]}}"#, credentials("nope"));

        let (status, json) = post_json(router(state), "get_node", &body).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["kind"], "InvalidCredentials");
    }

    #[tokio::test]
    async fn missing_node_maps_to_404() {
        let (state, _) = ready_state().await;
        let body = format!(r#"{{"args":[{},"{}"]}}"#, credentials("s3cret"), Uuid::new_v4());

        let (status, json) = post_json(router(state), "get_node", &body).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["kind"], "NoSuchNode");
    }

    #[tokio::test]
    async fn unknown_operation_maps_to_501() {
        let (state, _) = ready_state().await;
        let (status, json) = post_json(router(state), "defragment", r#"{"args":[]}"#).await;

        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(json["error"]["kind"], "NotImplemented");
    }

    #[tokio::test]
    async fn malformed_body_maps_to_invalid_parameter() {
        let (state, _) = ready_state().await;
        let (status, json) = post_json(router(state), "get_node", "{not json").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["kind"], "InvalidParameter");
    }

    #[tokio::test]
    async fn missing_args_field_is_an_arity_failure() {
        let (state, _) = ready_state().await;
        let (status, json) = post_json(router(state), "get_node", "{}").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("takes 2 argument(s), got 0"));
    }

    #[test]
    fn conflicts_and_internal_failures_have_distinct_statuses() {
        let conflict = ServiceError::check_in_check_out(Uuid::nil(), "stale");
        let opaque = ServiceError::OpaqueInternal {
            correlation_id: Uuid::nil(),
            host: "repo-1".to_string(),
        };
        assert_eq!(status_for(&conflict), StatusCode::CONFLICT);
        assert_eq!(status_for(&ServiceError::Transaction("x".into())), StatusCode::CONFLICT);
        assert_eq!(status_for(&opaque), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            status_for(&ServiceError::SearchFailure("index down".into())),
            StatusCode::BAD_GATEWAY
        );
    }
}
