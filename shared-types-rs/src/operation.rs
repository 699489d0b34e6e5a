// shared-types-rs/src/operation.rs
// Operation tags for the six analytical capabilities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The six analytical operations the gateway can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    GenerateDax,
    RecommendChart,
    GenerateInsights,
    DetectAnomalies,
    Forecast,
    GenerateSql,
}

/// The shape of input an operation expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// A free-text `requirement` string
    Text,
    /// A `dataset`: ordered records of field -> scalar
    Dataset,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Text => write!(f, "text"),
            PayloadKind::Dataset => write!(f, "dataset"),
        }
    }
}

/// Which HTTP surface a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    /// Browser-facing endpoints, identity fingerprint only
    Session,
    /// API-key gated endpoints for external tools
    Desktop,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::GenerateDax,
        Operation::RecommendChart,
        Operation::GenerateInsights,
        Operation::DetectAnomalies,
        Operation::Forecast,
        Operation::GenerateSql,
    ];

    /// Route segment and telemetry key, e.g. `generate-dax`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::GenerateDax => "generate-dax",
            Operation::RecommendChart => "recommend-chart",
            Operation::GenerateInsights => "generate-insights",
            Operation::DetectAnomalies => "detect-anomalies",
            Operation::Forecast => "forecast",
            Operation::GenerateSql => "generate-sql",
        }
    }

    pub fn payload_kind(&self) -> PayloadKind {
        match self {
            Operation::GenerateDax | Operation::GenerateSql => PayloadKind::Text,
            Operation::RecommendChart
            | Operation::GenerateInsights
            | Operation::DetectAnomalies
            | Operation::Forecast => PayloadKind::Dataset,
        }
    }

    /// Label used for the engine in status reports.
    pub fn engine_name(&self) -> &'static str {
        match self {
            Operation::GenerateDax => "dax_generator",
            Operation::RecommendChart => "chart_recommender",
            Operation::GenerateInsights => "insight_generator",
            Operation::DetectAnomalies => "anomaly_detector",
            Operation::Forecast => "forecasting_model",
            Operation::GenerateSql => "sql_generator",
        }
    }

    /// Telemetry series name for this operation on the given surface.
    pub fn endpoint_name(&self, surface: Surface) -> String {
        match surface {
            Surface::Session => self.as_str().to_string(),
            Surface::Desktop => format!("powerbi/{}", self.as_str()),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation: {0}")]
pub struct UnknownOperationName(pub String);

impl FromStr for Operation {
    type Err = UnknownOperationName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOperationName(s.to_string()))
    }
}
