// analytics-gateway-rs/src/lib.rs
// Orchestration shell for the analytics capabilities
//
// Two HTTP surfaces share one pipeline:
//   authenticate -> validate -> dispatch (timed) -> record | recover
// - Session surface (`/api/<operation>`, POST): identity fingerprint only
// - Desktop surface (`/api/powerbi/<operation>`, GET or POST): shared API key
// - Operational endpoints: `/api/health`, `/api/system-status`

pub mod auth;
pub mod dispatch;
pub mod engines;
pub mod handlers;
pub mod health;
pub mod validation;

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
    http::{header, HeaderMap, HeaderName, Method},
    routing::{get, post},
    Router,
};
use config_rs::GatewayConfig;
use error_handling::{ErrorLog, ErrorRecoveryCoordinator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared_types::Operation;
use telemetrist::{TelemetryConfig, TelemetryRecorder};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{self, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{SecurityGate, API_KEY_HEADER};
use crate::dispatch::{CapabilityRegistry, Dispatcher};
use crate::health::HealthStatusReporter;

pub use crate::dispatch::Capability;

/// Envelope for rejected requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self { success: false, error: error.into() }
    }
}

/// Envelope for capability calls that reached dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityResponse {
    pub success: bool,
    pub result: Value,
    /// True when `result` is a fallback synthesized after a failure
    pub degraded: bool,
}

impl CapabilityResponse {
    pub fn ok(result: Value) -> Self {
        Self { success: true, result, degraded: false }
    }

    pub fn degraded(result: Value) -> Self {
        Self { success: true, result, degraded: true }
    }
}

/// Shared state for every handler
#[derive(Debug)]
pub struct AppState {
    pub config: GatewayConfig,
    pub gate: SecurityGate,
    pub dispatcher: Dispatcher,
    pub recovery: ErrorRecoveryCoordinator,
    pub telemetry: Arc<TelemetryRecorder>,
    pub error_log: Arc<ErrorLog>,
    pub reporter: HealthStatusReporter,
}

impl AppState {
    /// State with the built-in engines
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_registry(config, CapabilityRegistry::with_defaults())
    }

    pub fn with_registry(config: GatewayConfig, registry: CapabilityRegistry) -> Self {
        let registry = Arc::new(registry);
        let telemetry = Arc::new(TelemetryRecorder::new(TelemetryConfig {
            window: config.metrics_window,
            ..TelemetryConfig::default()
        }));
        let error_log = Arc::new(ErrorLog::new(config.error_log_capacity));
        let gate = SecurityGate::new(config.api_key.clone());

        Self {
            dispatcher: Dispatcher::new(
                Arc::clone(&registry),
                Arc::clone(&telemetry),
                config.capability_timeout,
            ),
            recovery: ErrorRecoveryCoordinator::new(Arc::clone(&error_log)),
            reporter: HealthStatusReporter::new(
                Arc::clone(&telemetry),
                Arc::clone(&error_log),
                registry,
                gate.is_configured(),
            ),
            gate,
            telemetry,
            error_log,
            config,
        }
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static(API_KEY_HEADER),
        ])
}

/// Builds the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/", get(handlers::root))
        .route("/api/health", get(handlers::health))
        .route("/api/system-status", get(handlers::system_status));

    for operation in Operation::ALL {
        let session = move |state: State<Arc<AppState>>,
                            connect_info: Option<ConnectInfo<SocketAddr>>,
                            headers: HeaderMap,
                            body: Result<Bytes, BytesRejection>| {
            handlers::session_capability(operation, state, connect_info, headers, body)
        };
        let desktop = move |state: State<Arc<AppState>>,
                            connect_info: Option<ConnectInfo<SocketAddr>>,
                            method: Method,
                            query: Result<Query<HashMap<String, String>>, QueryRejection>,
                            headers: HeaderMap,
                            body: Result<Bytes, BytesRejection>| {
            handlers::desktop_capability(operation, state, connect_info, method, query, headers, body)
        };

        router = router
            .route(
                &format!("/api/{}", operation),
                post(session).fallback(handlers::method_not_allowed),
            )
            .route(
                &format!("/api/powerbi/{}", operation),
                get(desktop.clone())
                    .post(desktop)
                    .fallback(handlers::method_not_allowed),
            );
    }

    let recovery = state.recovery.clone();
    router
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(CatchPanicLayer::custom(move |panic: Box<dyn Any + Send + 'static>| {
            handlers::panic_response(&recovery, panic)
        }))
        .layer(validation::payload_limit_config())
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}
