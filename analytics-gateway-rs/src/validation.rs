//! Request validation
//!
//! Structural checks that run before dispatch. The first failing rule wins
//! and is reported as a 400 with a fixed message; nothing that fails here is
//! ever timed, recorded or logged to the error log.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};
use shared_types::{CapabilityRequest, Dataset, Operation, PayloadKind};

use crate::ErrorResponse;

/// Maximum request payload size (10MB)
pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Largest forecast horizon accepted
pub const MAX_FORECAST_HORIZON: u64 = 3650;

/// Draft 7 schema for a dataset: a sequence of flat records of scalars
static DATASET_SCHEMA: Lazy<Option<JSONSchema>> = Lazy::new(|| {
    let schema = json!({
        "type": "array",
        "items": {
            "type": "object",
            "additionalProperties": {
                "type": ["string", "number", "boolean", "null"]
            }
        }
    });

    match JSONSchema::options().with_draft(Draft::Draft7).compile(&schema) {
        Ok(compiled) => Some(compiled),
        Err(e) => {
            tracing::error!("Dataset schema failed to compile: {}", e);
            None
        }
    }
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiValidationError {
    #[error("No data provided")]
    NoData,

    #[error("Requirement field is required")]
    MissingRequirement,

    #[error("Requirement must be a string")]
    RequirementNotText,

    #[error("Requirement field is empty")]
    EmptyRequirement,

    #[error("Dataset field is required")]
    MissingDataset,

    #[error("Dataset is empty")]
    NullDataset,

    #[error("Dataset must be a sequence of records")]
    MalformedDataset,

    #[error("Horizon must be a positive integer")]
    InvalidHorizon,

    #[error("Horizon must not exceed {0}")]
    HorizonTooLarge(u64),
}

impl ApiValidationError {
    pub fn to_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(self.to_string())))
    }
}

impl IntoResponse for ApiValidationError {
    fn into_response(self) -> Response {
        self.to_response().into_response()
    }
}

/// Checks `payload` against the rules for `operation`
pub fn validate_payload(operation: Operation, payload: &Value) -> Result<(), ApiValidationError> {
    let fields = match payload {
        Value::Object(fields) if !fields.is_empty() => fields,
        _ => return Err(ApiValidationError::NoData),
    };

    match operation.payload_kind() {
        PayloadKind::Text => match fields.get("requirement") {
            None => Err(ApiValidationError::MissingRequirement),
            Some(Value::String(text)) if text.trim().is_empty() => {
                Err(ApiValidationError::EmptyRequirement)
            }
            Some(Value::String(_)) => Ok(()),
            Some(_) => Err(ApiValidationError::RequirementNotText),
        },
        PayloadKind::Dataset => {
            match fields.get("dataset") {
                None => return Err(ApiValidationError::MissingDataset),
                Some(Value::Null) => return Err(ApiValidationError::NullDataset),
                Some(dataset) if !is_record_sequence(dataset) => {
                    return Err(ApiValidationError::MalformedDataset)
                }
                Some(_) => {}
            }
            if operation == Operation::Forecast {
                parse_horizon(fields)?;
            }
            Ok(())
        }
    }
}

/// Validates `payload` and converts it into a typed request
pub fn parse_request(
    operation: Operation,
    payload: &Value,
) -> Result<CapabilityRequest, ApiValidationError> {
    validate_payload(operation, payload)?;
    let fields = payload.as_object().ok_or(ApiValidationError::NoData)?;

    match operation.payload_kind() {
        PayloadKind::Text => {
            let requirement = fields
                .get("requirement")
                .and_then(Value::as_str)
                .ok_or(ApiValidationError::MissingRequirement)?;
            Ok(CapabilityRequest::text(operation, requirement.trim()))
        }
        PayloadKind::Dataset => {
            let raw = fields.get("dataset").cloned().unwrap_or(Value::Null);
            let dataset: Dataset =
                serde_json::from_value(raw).map_err(|_| ApiValidationError::MalformedDataset)?;
            let request = CapabilityRequest::dataset(operation, dataset);
            match parse_horizon(fields)? {
                Some(horizon) if operation == Operation::Forecast => Ok(request.with_horizon(horizon)),
                _ => Ok(request),
            }
        }
    }
}

fn is_record_sequence(value: &Value) -> bool {
    match DATASET_SCHEMA.as_ref() {
        Some(schema) => schema.is_valid(value),
        None => value.as_array().map_or(false, |rows| {
            rows.iter().all(|row| {
                row.as_object().map_or(false, |record| {
                    record.values().all(|v| !v.is_array() && !v.is_object())
                })
            })
        }),
    }
}

/// Horizon accepts a positive integer, an integral float or a numeric string
fn parse_horizon(fields: &Map<String, Value>) -> Result<Option<u32>, ApiValidationError> {
    let raw = match fields.get("horizon") {
        None | Some(Value::Null) => return Ok(None),
        Some(raw) => raw,
    };

    let horizon = match raw {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .filter(|h| *h > 0)
    .ok_or(ApiValidationError::InvalidHorizon)?;

    if horizon > MAX_FORECAST_HORIZON {
        return Err(ApiValidationError::HorizonTooLarge(MAX_FORECAST_HORIZON));
    }
    Ok(Some(horizon as u32))
}

/// Parses a request body; anything that is not JSON counts as no data
pub fn parse_body_lenient(body: &Bytes) -> Value {
    if body.is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        tracing::debug!("Ignoring unparsable request body: {}", e);
        Value::Object(Map::new())
    })
}

/// Builds a payload from desktop GET query parameters
///
/// Missing parameters take the values the desktop client historically relied
/// on: an empty requirement, an empty dataset. An unparsable `dataset`
/// parameter is treated as an empty dataset.
pub fn desktop_query_payload(operation: Operation, query: &HashMap<String, String>) -> Value {
    let mut fields = Map::new();
    match operation.payload_kind() {
        PayloadKind::Text => {
            let requirement = query.get("requirement").cloned().unwrap_or_default();
            fields.insert("requirement".to_string(), Value::String(requirement));
        }
        PayloadKind::Dataset => {
            let dataset = query
                .get("dataset")
                .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
                .unwrap_or_else(|| Value::Array(Vec::new()));
            fields.insert("dataset".to_string(), dataset);
            if operation == Operation::Forecast {
                if let Some(horizon) = query.get("horizon") {
                    fields.insert("horizon".to_string(), Value::String(horizon.clone()));
                }
            }
        }
    }
    Value::Object(fields)
}

/// Body size limit applied to the whole router, enforced by the `Bytes`
/// extractor so oversized bodies are rejected inside the handlers
pub fn payload_limit_config() -> axum::extract::DefaultBodyLimit {
    axum::extract::DefaultBodyLimit::max(MAX_PAYLOAD_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_data() {
        for payload in [Value::Null, json!({}), json!([1, 2]), json!("text")] {
            assert_eq!(
                validate_payload(Operation::GenerateDax, &payload),
                Err(ApiValidationError::NoData)
            );
        }
    }

    #[test]
    fn test_requirement_rules() {
        let op = Operation::GenerateSql;
        assert_eq!(
            validate_payload(op, &json!({"other": 1})),
            Err(ApiValidationError::MissingRequirement)
        );
        assert_eq!(
            validate_payload(op, &json!({"requirement": 42})),
            Err(ApiValidationError::RequirementNotText)
        );
        for blank in ["", "   ", "\t\n"] {
            assert_eq!(
                validate_payload(op, &json!({ "requirement": blank })),
                Err(ApiValidationError::EmptyRequirement)
            );
        }
        let request = parse_request(op, &json!({"requirement": "  count orders  "})).unwrap();
        assert_eq!(request.requirement(), Some("count orders"));
    }

    #[test]
    fn test_dataset_rules() {
        for op in [Operation::RecommendChart, Operation::GenerateInsights, Operation::DetectAnomalies] {
            assert_eq!(
                validate_payload(op, &json!({"requirement": "x"})),
                Err(ApiValidationError::MissingDataset)
            );
            assert_eq!(
                validate_payload(op, &json!({"dataset": null})),
                Err(ApiValidationError::NullDataset)
            );
            assert_eq!(
                validate_payload(op, &json!({"dataset": {"a": 1}})),
                Err(ApiValidationError::MalformedDataset)
            );
            assert_eq!(
                validate_payload(op, &json!({"dataset": [{"a": {"nested": 1}}]})),
                Err(ApiValidationError::MalformedDataset)
            );
            assert!(validate_payload(op, &json!({"dataset": []})).is_ok());
        }
    }

    #[test]
    fn test_dataset_conversion() {
        let request = parse_request(
            Operation::GenerateInsights,
            &json!({"dataset": [{"region": "west", "sales": 10, "active": true, "note": null}]}),
        )
        .unwrap();
        let records = request.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["sales"].as_f64(), Some(10.0));
        assert!(records[0]["note"].is_null());
    }

    #[test]
    fn test_horizon_rules() {
        let op = Operation::Forecast;
        let request = parse_request(op, &json!({"dataset": []})).unwrap();
        assert_eq!(request.horizon(), 30);

        for good in [json!(7), json!(7.0), json!("7")] {
            let request = parse_request(op, &json!({"dataset": [], "horizon": good})).unwrap();
            assert_eq!(request.horizon(), 7);
        }
        for bad in [json!(0), json!(-3), json!(2.5), json!("soon"), json!(true)] {
            assert_eq!(
                validate_payload(op, &json!({"dataset": [], "horizon": bad})),
                Err(ApiValidationError::InvalidHorizon)
            );
        }
        assert_eq!(
            validate_payload(op, &json!({"dataset": [], "horizon": 100000})),
            Err(ApiValidationError::HorizonTooLarge(MAX_FORECAST_HORIZON))
        );
    }

    #[test]
    fn test_desktop_query_payload() {
        let mut query = HashMap::new();
        let payload = desktop_query_payload(Operation::GenerateDax, &query);
        assert_eq!(
            validate_payload(Operation::GenerateDax, &payload),
            Err(ApiValidationError::EmptyRequirement)
        );

        query.insert("dataset".to_string(), "not json".to_string());
        query.insert("horizon".to_string(), "12".to_string());
        let request =
            parse_request(Operation::Forecast, &desktop_query_payload(Operation::Forecast, &query)).unwrap();
        assert_eq!(request.records().map(|r| r.len()), Some(0));
        assert_eq!(request.horizon(), 12);
    }

    #[test]
    fn test_lenient_body() {
        assert_eq!(parse_body_lenient(&Bytes::from_static(b"{not json")), json!({}));
        assert_eq!(parse_body_lenient(&Bytes::new()), json!({}));
        assert_eq!(
            parse_body_lenient(&Bytes::from_static(br#"{"requirement":"x"}"#)),
            json!({"requirement": "x"})
        );
    }

    #[test]
    fn test_error_response_shape() {
        let (status, Json(body)) = ApiValidationError::NullDataset.to_response();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);
        assert_eq!(body.error, "Dataset is empty");
    }
}
