//! # Fallback Strategies
//!
//! When a capability invocation fails, the gateway answers with a degraded
//! but well-formed result instead of an error page. The
//! [`ErrorRecoveryCoordinator`] logs the failure with its context and
//! synthesizes that result from the request alone.
//!
//! Every fallback payload carries the same top-level fields a successful
//! call for that operation would, plus `fallback`, `confidence`,
//! `error_kind`, `notice` and `retryable`.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use shared_types::request::{field_names, numeric_fields, numeric_series};
use shared_types::{CapabilityRequest, Identity, Operation};

use crate::error_log::ErrorLog;
use crate::sanitization::{sanitize_input_echo, sanitize_message};
use crate::types::{Error, ErrorKind};

/// Types of fallback strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackType {
    /// A placeholder result with no analysis behind it
    DefaultValue,
    /// A cheap local approximation of the real result
    SimplifiedBackup,
}

/// A synthesized result for a failed invocation. Never null, always JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackResult {
    pub operation: Operation,
    pub strategy: FallbackType,
    pub error_kind: ErrorKind,
    pub payload: Value,
}

impl FallbackResult {
    pub fn into_payload(self) -> Value {
        self.payload
    }
}

/// Where a failure happened, for logging and fallback synthesis
#[derive(Debug, Clone, Copy)]
pub struct RecoveryContext<'a> {
    /// Telemetry endpoint name, e.g. `forecast` or `powerbi/forecast`
    pub endpoint: &'a str,
    pub request: &'a CapabilityRequest,
    pub identity: Option<&'a Identity>,
}

/// Turns capability failures into logged, degraded responses
#[derive(Debug, Clone)]
pub struct ErrorRecoveryCoordinator {
    error_log: Arc<ErrorLog>,
}

impl ErrorRecoveryCoordinator {
    pub fn new(error_log: Arc<ErrorLog>) -> Self {
        Self { error_log }
    }

    pub fn error_log(&self) -> &Arc<ErrorLog> {
        &self.error_log
    }

    /// Logs `error` and returns a fallback shaped for the failed operation
    pub fn recover(&self, error: &Error, ctx: RecoveryContext<'_>) -> FallbackResult {
        let operation = ctx.request.operation;

        let mut context = Map::new();
        context.insert("endpoint".to_string(), json!(ctx.endpoint));
        context.insert("operation".to_string(), json!(operation));
        if let Some(identity) = ctx.identity {
            context.insert("identity".to_string(), json!(identity));
        }
        context.insert("data".to_string(), sanitize_input_echo(ctx.request));
        self.error_log.record(error, context);

        let strategy = strategy_for(operation);
        let payload = build_payload(error, ctx.request, strategy);

        counter!("capability.recoveries", 1, "operation" => operation.as_str(), "kind" => error.kind.name());
        info!(
            endpoint = %ctx.endpoint,
            error_kind = %error.kind,
            strategy = ?strategy,
            "Recovered from capability failure"
        );

        FallbackResult {
            operation,
            strategy,
            error_kind: error.kind,
            payload,
        }
    }

    /// Logs a failure that happened outside any capability invocation
    pub fn record_unhandled(&self, error: &Error, endpoint: &str) {
        warn!(endpoint = %endpoint, "Unhandled failure: {}", error.message);
        let mut context = Map::new();
        context.insert("endpoint".to_string(), json!(endpoint));
        self.error_log.record(error, context);
    }
}

fn strategy_for(operation: Operation) -> FallbackType {
    match operation {
        Operation::GenerateDax | Operation::GenerateSql | Operation::DetectAnomalies => {
            FallbackType::DefaultValue
        }
        Operation::RecommendChart | Operation::GenerateInsights | Operation::Forecast => {
            FallbackType::SimplifiedBackup
        }
    }
}

fn notice_for(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Timeout => "The analysis took too long; showing a reduced-confidence fallback.",
        ErrorKind::InsufficientData => "Not enough data for a full analysis; showing a reduced-confidence fallback.",
        kind if kind.is_transient() => {
            "The analysis engine is temporarily unavailable; showing a reduced-confidence fallback."
        }
        _ => "The analysis could not be completed; showing a reduced-confidence fallback.",
    }
}

fn build_payload(error: &Error, request: &CapabilityRequest, strategy: FallbackType) -> Value {
    let mut payload = match request.operation {
        Operation::GenerateDax => dax_fallback(request),
        Operation::GenerateSql => sql_fallback(request),
        Operation::RecommendChart => chart_fallback(request),
        Operation::GenerateInsights => insights_fallback(request),
        Operation::DetectAnomalies => anomalies_fallback(request),
        Operation::Forecast => forecast_fallback(request),
    };

    if let Value::Object(fields) = &mut payload {
        fields.insert("fallback".to_string(), json!(true));
        fields.insert("confidence".to_string(), json!(0.0));
        fields.insert("strategy".to_string(), json!(strategy));
        fields.insert("error_kind".to_string(), json!(error.kind.name()));
        fields.insert("notice".to_string(), json!(notice_for(error.kind)));
        fields.insert("retryable".to_string(), json!(error.is_transient()));
    }
    payload
}

fn requirement_echo(request: &CapabilityRequest) -> String {
    sanitize_message(request.requirement().unwrap_or_default().trim())
}

fn dax_fallback(request: &CapabilityRequest) -> Value {
    let requirement = requirement_echo(request);
    json!({
        "requirement": requirement,
        "measure_name": "Fallback Measure",
        "expression": "Fallback Measure = BLANK()",
        "explanation": format!("Placeholder measure for: {}", requirement),
    })
}

fn sql_fallback(request: &CapabilityRequest) -> Value {
    let requirement = requirement_echo(request);
    json!({
        "requirement": requirement,
        "query": "SELECT NULL AS placeholder;",
        "explanation": format!("Placeholder query for: {}", requirement),
    })
}

fn chart_fallback(request: &CapabilityRequest) -> Value {
    let records = request.records().unwrap_or_default();
    let fields = field_names(records);
    let numeric = numeric_fields(records);
    let x_axis = fields.iter().find(|f| !numeric.contains(*f)).or(fields.first());
    json!({
        "chart_type": "table",
        "x_axis": x_axis,
        "y_axis": numeric.first(),
        "alternatives": [],
        "rationale": "A table shows every field without further analysis.",
    })
}

fn insights_fallback(request: &CapabilityRequest) -> Value {
    let records = request.records().unwrap_or_default();
    let fields = field_names(records);
    json!({
        "record_count": records.len(),
        "field_count": fields.len(),
        "insights": [{
            "title": "Dataset received",
            "detail": format!("{} records across {} fields.", records.len(), fields.len()),
        }],
    })
}

fn anomalies_fallback(request: &CapabilityRequest) -> Value {
    let records = request.records().unwrap_or_default();
    json!({
        "record_count": records.len(),
        "anomalies": [],
        "method": "none",
        "threshold": Value::Null,
    })
}

/// Naive forecast: repeat the last observed value of the first numeric field
fn forecast_fallback(request: &CapabilityRequest) -> Value {
    let records = request.records().unwrap_or_default();
    let horizon = request.horizon();
    let field = numeric_fields(records).into_iter().next();
    let last = field
        .as_deref()
        .and_then(|f| numeric_series(records, f).last().copied());

    let predictions: Vec<f64> = match last {
        Some(value) => vec![value; horizon as usize],
        None => Vec::new(),
    };

    json!({
        "field": field,
        "horizon": horizon,
        "predictions": predictions,
        "method": "naive_last_value",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Record, Scalar};

    fn coordinator() -> ErrorRecoveryCoordinator {
        ErrorRecoveryCoordinator::new(Arc::new(ErrorLog::new(100)))
    }

    fn series(values: &[f64]) -> Vec<Record> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let mut r = Record::new();
                r.insert("month".to_string(), Scalar::Text(format!("m{}", i)));
                r.insert("sales".to_string(), Scalar::Number(*v));
                r
            })
            .collect()
    }

    #[test]
    fn test_recover_logs_with_context() {
        let coordinator = coordinator();
        let request = CapabilityRequest::text(Operation::GenerateDax, "total sales by region");
        let identity = Identity::derive("127.0.0.1", "test");
        let error = Error::new(ErrorKind::Unavailable, "model offline");

        let fallback = coordinator.recover(
            &error,
            RecoveryContext {
                endpoint: "generate-dax",
                request: &request,
                identity: Some(&identity),
            },
        );

        let entries = coordinator.error_log().snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].context["endpoint"], "generate-dax");
        assert_eq!(entries[0].context["operation"], "generate-dax");
        assert_eq!(entries[0].context["identity"], identity.as_str());
        assert_eq!(entries[0].context["data"]["requirement"], "total sales by region");

        assert_eq!(fallback.strategy, FallbackType::DefaultValue);
        assert_eq!(fallback.error_kind, ErrorKind::Unavailable);
        let payload = fallback.into_payload();
        assert_eq!(payload["fallback"], true);
        assert_eq!(payload["confidence"], 0.0);
        assert_eq!(payload["error_kind"], "UnavailableError");
        assert_eq!(payload["retryable"], true);
        assert!(payload["notice"].as_str().unwrap().contains("temporarily unavailable"));
        assert!(payload["expression"].as_str().unwrap().contains("BLANK()"));
    }

    #[test]
    fn test_forecast_fallback_repeats_last_value() {
        let coordinator = coordinator();
        let request =
            CapabilityRequest::dataset(Operation::Forecast, series(&[10.0, 12.0, 15.0])).with_horizon(4);
        let error = Error::new(ErrorKind::Timeout, "deadline exceeded");
        let payload = coordinator
            .recover(&error, RecoveryContext { endpoint: "forecast", request: &request, identity: None })
            .into_payload();

        assert_eq!(payload["field"], "sales");
        assert_eq!(payload["horizon"], 4);
        assert_eq!(payload["predictions"], json!([15.0, 15.0, 15.0, 15.0]));
        assert_eq!(payload["strategy"], "simplified_backup");
    }

    #[test]
    fn test_every_operation_has_non_null_payload_on_empty_input() {
        let coordinator = coordinator();
        for operation in Operation::ALL {
            let request = match operation.payload_kind() {
                shared_types::PayloadKind::Text => CapabilityRequest::text(operation, ""),
                shared_types::PayloadKind::Dataset => CapabilityRequest::dataset(operation, Vec::new()),
            };
            let error = Error::new(ErrorKind::Panic, "boom");
            let payload = coordinator
                .recover(&error, RecoveryContext { endpoint: operation.as_str(), request: &request, identity: None })
                .into_payload();
            assert!(payload.is_object(), "{} fallback must be an object", operation);
            assert_eq!(payload["fallback"], true);
            assert_eq!(payload["retryable"], false);
            assert!(serde_json::to_string(&payload).is_ok());
        }
        assert_eq!(coordinator.error_log().len(), Operation::ALL.len());
    }

    #[test]
    fn test_chart_fallback_picks_category_and_measure() {
        let coordinator = coordinator();
        let request = CapabilityRequest::dataset(Operation::RecommendChart, series(&[1.0, 2.0]));
        let payload = coordinator
            .recover(
                &Error::processing("classifier diverged"),
                RecoveryContext { endpoint: "recommend-chart", request: &request, identity: None },
            )
            .into_payload();
        assert_eq!(payload["chart_type"], "table");
        assert_eq!(payload["x_axis"], "month");
        assert_eq!(payload["y_axis"], "sales");
    }

    #[test]
    fn test_record_unhandled() {
        let coordinator = coordinator();
        coordinator.record_unhandled(&Error::new(ErrorKind::Internal, "router fault"), "unhandled_exception");
        let entry = &coordinator.error_log().recent(1)[0];
        assert_eq!(entry.context["endpoint"], "unhandled_exception");
        assert_eq!(entry.error_type, "InternalError");
    }
}
