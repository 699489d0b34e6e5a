// shared-types-rs/src/request.rs
// Validated capability requests and the dataset model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::operation::{Operation, PayloadKind};

/// Horizon used by forecast requests that do not specify one
pub const DEFAULT_FORECAST_HORIZON: u32 = 30;

/// A single cell value in a dataset record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Scalar {
    /// Numeric view of the value. Numeric strings count, booleans do not.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) if n.is_finite() => Some(*n),
            Scalar::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }
}

/// One row of a dataset: field name -> scalar.
pub type Record = BTreeMap<String, Scalar>;

/// An ordered sequence of records.
pub type Dataset = Vec<Record>;

/// Operation input, already checked against the operation's expected kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Dataset(Dataset),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Text(_) => PayloadKind::Text,
            Payload::Dataset(_) => PayloadKind::Dataset,
        }
    }
}

/// A request that passed validation and is ready for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    pub operation: Operation,
    pub payload: Payload,
    /// Only set for forecast requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizon: Option<u32>,
}

impl CapabilityRequest {
    pub fn text(operation: Operation, requirement: impl Into<String>) -> Self {
        Self {
            operation,
            payload: Payload::Text(requirement.into()),
            horizon: None,
        }
    }

    pub fn dataset(operation: Operation, dataset: Dataset) -> Self {
        let horizon = match operation {
            Operation::Forecast => Some(DEFAULT_FORECAST_HORIZON),
            _ => None,
        };
        Self {
            operation,
            payload: Payload::Dataset(dataset),
            horizon,
        }
    }

    pub fn with_horizon(mut self, horizon: u32) -> Self {
        self.horizon = Some(horizon);
        self
    }

    pub fn requirement(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text.as_str()),
            Payload::Dataset(_) => None,
        }
    }

    pub fn records(&self) -> Option<&[Record]> {
        match &self.payload {
            Payload::Dataset(records) => Some(records.as_slice()),
            Payload::Text(_) => None,
        }
    }

    /// Effective forecast horizon
    pub fn horizon(&self) -> u32 {
        self.horizon.unwrap_or(DEFAULT_FORECAST_HORIZON)
    }
}

/// Field names across all records, in sorted order.
pub fn field_names(records: &[Record]) -> Vec<String> {
    let mut names: Vec<String> = records
        .iter()
        .flat_map(|r| r.keys().cloned())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Fields whose non-null values are all numeric (and that have at least one value).
pub fn numeric_fields(records: &[Record]) -> Vec<String> {
    field_names(records)
        .into_iter()
        .filter(|field| {
            let mut seen = false;
            for value in records.iter().filter_map(|r| r.get(field)) {
                if value.is_null() {
                    continue;
                }
                if value.as_f64().is_none() {
                    return false;
                }
                seen = true;
            }
            seen
        })
        .collect()
}

/// Numeric values of `field` in record order, skipping nulls and non-numbers.
pub fn numeric_series(records: &[Record], field: &str) -> Vec<f64> {
    records
        .iter()
        .filter_map(|r| r.get(field))
        .filter_map(Scalar::as_f64)
        .collect()
}
