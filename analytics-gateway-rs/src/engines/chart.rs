use std::collections::BTreeSet;

use error_handling::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use shared_types::{field_names, numeric_fields, CapabilityRequest, Identity, Operation, Record, Scalar};

use super::records;
use crate::dispatch::Capability;

/// Categories beyond this make a pie chart unreadable
const MAX_PIE_SLICES: usize = 6;

static DATE_VALUE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}(-\d{2})?([T ].*)?$").ok());

const TEMPORAL_NAMES: &[&str] = &["date", "time", "day", "week", "month", "quarter", "year", "period"];

/// Picks a chart type from the shape of a dataset
#[derive(Debug, Clone, Copy, Default)]
pub struct ChartRecommender;

fn is_temporal(records: &[Record], field: &str) -> bool {
    let lowered = field.to_lowercase();
    if TEMPORAL_NAMES.iter().any(|name| lowered.contains(name)) {
        return true;
    }
    let pattern = match DATE_VALUE.as_ref() {
        Some(pattern) => pattern,
        None => return false,
    };
    let mut texts = records.iter().filter_map(|r| match r.get(field) {
        Some(Scalar::Text(text)) => Some(text.as_str()),
        _ => None,
    });
    let first = texts.next();
    first.is_some() && first.into_iter().chain(texts).all(|text| pattern.is_match(text))
}

fn distinct_values(records: &[Record], field: &str) -> usize {
    records
        .iter()
        .filter_map(|r| r.get(field))
        .filter(|v| !v.is_null())
        .map(|v| match v {
            Scalar::Text(text) => text.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        })
        .collect::<BTreeSet<_>>()
        .len()
}

impl Capability for ChartRecommender {
    fn operation(&self) -> Operation {
        Operation::RecommendChart
    }

    fn invoke(&self, request: &CapabilityRequest, _identity: &Identity) -> Result<Value> {
        let records = records(request);
        let fields = field_names(records);
        if fields.is_empty() {
            return Err(Error::insufficient_data("Cannot recommend a chart for an empty dataset"));
        }

        let numeric = numeric_fields(records);
        let temporal: Vec<&String> = fields.iter().filter(|f| is_temporal(records, f)).collect();
        let categorical: Vec<&String> = fields
            .iter()
            .filter(|f| !numeric.contains(*f) && !temporal.contains(f))
            .collect();
        // Year-like numbers still count as time when paired with another measure
        let measures: Vec<&String> = numeric.iter().filter(|f| !temporal.contains(f)).collect();

        let (chart_type, x_axis, y_axis, alternatives, rationale, confidence) =
            match (temporal.first(), categorical.first(), measures.as_slice()) {
                (Some(time), _, [measure, ..]) => (
                    "line",
                    Some(*time),
                    Some(*measure),
                    vec!["area", "bar"],
                    format!("{} changes over {}; a line shows the trend.", measure, time),
                    0.9,
                ),
                (None, Some(category), [measure, ..]) => {
                    let slices = distinct_values(records, category);
                    let mut alternatives = vec!["table"];
                    if slices <= MAX_PIE_SLICES {
                        alternatives.insert(0, "pie");
                    }
                    (
                        "bar",
                        Some(*category),
                        Some(*measure),
                        alternatives,
                        format!("{} compared across {} {} values.", measure, slices, category),
                        0.85,
                    )
                }
                (None, None, [x, y, ..]) => (
                    "scatter",
                    Some(*x),
                    Some(*y),
                    vec!["line"],
                    format!("Two measures ({} and {}); a scatter shows their relationship.", x, y),
                    0.75,
                ),
                (None, None, [only]) => (
                    "histogram",
                    Some(*only),
                    None,
                    vec!["box"],
                    format!("A single measure ({}); a histogram shows its distribution.", only),
                    0.7,
                ),
                _ => (
                    "table",
                    categorical.first().or(temporal.first()).copied(),
                    None,
                    vec!["bar"],
                    "No numeric measure to plot; a table lists the values.".to_string(),
                    0.5,
                ),
            };

        Ok(json!({
            "chart_type": chart_type,
            "x_axis": x_axis,
            "y_axis": y_axis,
            "alternatives": alternatives,
            "rationale": rationale,
            "confidence": confidence,
        }))
    }
}
