// HTTP handlers for both API surfaces and the operational endpoints

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, QueryRejection},
        ConnectInfo, Query, State,
    },
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use error_handling::{Error, ErrorKind, ErrorRecoveryCoordinator, RecoveryContext, Severity};
use serde_json::{json, Value};
use shared_types::{Operation, Surface};
use tracing::{debug, warn};

use crate::auth::RequestContext;
use crate::dispatch::{panic_message, DispatchError};
use crate::validation::{desktop_query_payload, parse_body_lenient, parse_request, MAX_PAYLOAD_SIZE};
use crate::{AppState, CapabilityResponse, ErrorResponse};

/// Error log endpoint for failures outside any capability call
pub const UNHANDLED_ENDPOINT: &str = "unhandled_exception";

/// `POST /api/<operation>`
pub async fn session_capability(
    operation: Operation,
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: axum::http::HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return body_rejected(operation, rejection),
    };
    let ctx = RequestContext::from_parts(&headers, None, connect_info.map(|ConnectInfo(addr)| addr));
    let payload = parse_body_lenient(&body);
    run_pipeline(&state, operation, Surface::Session, &ctx, payload).await
}

/// `GET|POST /api/powerbi/<operation>`
pub async fn desktop_capability(
    operation: Operation,
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
    headers: axum::http::HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            debug!(operation = %operation, "Rejected query string: {}", rejection.body_text());
            return (rejection.status(), Json(ErrorResponse::new("Invalid query string"))).into_response();
        }
    };
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return body_rejected(operation, rejection),
    };
    let ctx = RequestContext::from_parts(&headers, Some(&query), connect_info.map(|ConnectInfo(addr)| addr));
    let payload = if method == Method::GET {
        desktop_query_payload(operation, &query)
    } else {
        parse_body_lenient(&body)
    };
    run_pipeline(&state, operation, Surface::Desktop, &ctx, payload).await
}

/// Body extraction failures keep the JSON error envelope
fn body_rejected(operation: Operation, rejection: BytesRejection) -> Response {
    let status = rejection.status();
    warn!(operation = %operation, status = %status, "Rejected request body: {}", rejection.body_text());
    let message = if status == StatusCode::PAYLOAD_TOO_LARGE {
        format!("Request body exceeds {} bytes", MAX_PAYLOAD_SIZE)
    } else {
        "Request body could not be read".to_string()
    };
    (status, Json(ErrorResponse::new(message))).into_response()
}

/// authenticate -> validate -> dispatch -> record | recover
pub async fn run_pipeline(
    state: &AppState,
    operation: Operation,
    surface: Surface,
    ctx: &RequestContext,
    payload: Value,
) -> Response {
    let identity = match state.gate.authenticate(surface, ctx) {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    let request = match parse_request(operation, &payload) {
        Ok(request) => Arc::new(request),
        Err(e) => {
            debug!(operation = %operation, "Rejected request: {}", e);
            return e.into_response();
        }
    };

    let endpoint = operation.endpoint_name(surface);
    match state
        .dispatcher
        .dispatch(&endpoint, Arc::clone(&request), identity.clone())
        .await
    {
        Ok(result) => Json(CapabilityResponse::ok(result)).into_response(),
        Err(DispatchError::Capability(error)) => {
            let fallback = state.recovery.recover(
                &error,
                RecoveryContext {
                    endpoint: &endpoint,
                    request: request.as_ref(),
                    identity: Some(&identity),
                },
            );
            Json(CapabilityResponse::degraded(fallback.into_payload())).into_response()
        }
        Err(e @ DispatchError::UnknownOperation(_)) => {
            warn!(endpoint = %endpoint, "No capability registered");
            (StatusCode::NOT_IMPLEMENTED, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
        Err(e @ DispatchError::UnsupportedPayload { .. }) => {
            (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
    }
}

/// `GET /api/health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.reporter.health())
}

/// `GET /api/system-status`
pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.reporter.system_status())
}

/// `GET /`
pub async fn root() -> Json<Value> {
    let session: Vec<String> = Operation::ALL
        .iter()
        .map(|op| format!("POST /api/{}", op))
        .collect();
    let desktop: Vec<String> = Operation::ALL
        .iter()
        .map(|op| format!("GET|POST /api/powerbi/{}", op))
        .collect();

    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "session": session,
            "desktop": desktop,
            "operational": ["GET /api/health", "GET /api/system-status"],
        },
        "desktop_auth": "x-api-key header or api_key query parameter",
    }))
}

pub async fn not_found(method: Method, uri: Uri) -> Response {
    warn!(method = %method, path = %uri.path(), "No route matched");
    (StatusCode::NOT_FOUND, Json(json!({"error": "Endpoint not found"}))).into_response()
}

pub async fn method_not_allowed(method: Method, uri: Uri) -> Response {
    debug!(method = %method, path = %uri.path(), "Method not allowed");
    (StatusCode::METHOD_NOT_ALLOWED, Json(json!({"error": "Method not allowed"}))).into_response()
}

/// Response for a panic that escaped a handler
pub fn panic_response(recovery: &ErrorRecoveryCoordinator, panic: Box<dyn Any + Send + 'static>) -> Response {
    let error = Error::new(ErrorKind::Panic, format!("Handler panicked: {}", panic_message(panic)))
        .severity(Severity::Critical);
    recovery.record_unhandled(&error, UNHANDLED_ENDPOINT);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "An unexpected error occurred"})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_handling::ErrorLog;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_panic_response_is_logged() {
        let error_log = Arc::new(ErrorLog::new(10));
        let recovery = ErrorRecoveryCoordinator::new(Arc::clone(&error_log));

        let response = panic_response(&recovery, Box::new("state corrupted"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await, json!({"error": "An unexpected error occurred"}));

        let entry = &error_log.recent(1)[0];
        assert_eq!(entry.context["endpoint"], UNHANDLED_ENDPOINT);
        assert!(entry.error_message.contains("state corrupted"));
    }

    #[tokio::test]
    async fn test_pipeline_rejects_before_dispatch() {
        let state = AppState::new(config_rs::GatewayConfig::default());
        let ctx = RequestContext::default();

        let response = run_pipeline(
            &state,
            Operation::GenerateDax,
            Surface::Desktop,
            &ctx,
            json!({"requirement": "total sales"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = run_pipeline(
            &state,
            Operation::GenerateDax,
            Surface::Session,
            &ctx,
            json!({"requirement": "  "}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.telemetry.is_empty());
        assert!(state.error_log.is_empty());
    }

    #[tokio::test]
    async fn test_root_lists_every_operation() {
        let Json(body) = root().await;
        assert_eq!(body["endpoints"]["session"].as_array().unwrap().len(), Operation::ALL.len());
        assert_eq!(body["endpoints"]["desktop"][0], "GET|POST /api/powerbi/generate-dax");
    }
}
