use std::collections::BTreeMap;

use error_handling::Result;
use serde_json::{json, Value};
use shared_types::{field_names, numeric_fields, numeric_series, CapabilityRequest, Identity, Operation, Record, Scalar};

use super::{linear_fit, mean, records, round4};
use crate::dispatch::Capability;

/// Relative change across the series below which a trend counts as flat
const TREND_TOLERANCE: f64 = 0.05;

/// Descriptive statistics over a dataset
#[derive(Debug, Clone, Copy, Default)]
pub struct InsightGenerator;

fn label_of(record: &Record, field: Option<&String>) -> Option<String> {
    match field.and_then(|f| record.get(f)) {
        Some(Scalar::Text(text)) => Some(text.clone()),
        Some(Scalar::Number(n)) => Some(n.to_string()),
        Some(Scalar::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

fn summary_insight(field: &str, values: &[f64]) -> Option<Value> {
    let avg = mean(values)?;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(json!({
        "type": "summary",
        "field": field,
        "message": format!(
            "{} averages {} (min {}, max {}) across {} values.",
            field, round4(avg), round4(min), round4(max), values.len()
        ),
        "mean": round4(avg),
        "min": min,
        "max": max,
        "sum": round4(values.iter().sum()),
    }))
}

fn highest_insight(records: &[Record], field: &str, label_field: Option<&String>) -> Option<Value> {
    let (index, value) = records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.get(field).and_then(Scalar::as_f64).map(|v| (i, v)))
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    let label = label_of(&records[index], label_field).unwrap_or_else(|| format!("Row {}", index + 1));
    Some(json!({
        "type": "highest",
        "field": field,
        "message": format!("{} has the highest {} ({}).", label, field, value),
        "row": index,
        "value": value,
    }))
}

fn trend_insight(field: &str, values: &[f64]) -> Option<Value> {
    if values.len() < 3 {
        return None;
    }
    let (slope, _) = linear_fit(values)?;
    let scale = mean(values)?.abs().max(f64::EPSILON);
    let relative = slope * (values.len() - 1) as f64 / scale;
    let direction = if relative > TREND_TOLERANCE {
        "increasing"
    } else if relative < -TREND_TOLERANCE {
        "decreasing"
    } else {
        "stable"
    };
    Some(json!({
        "type": "trend",
        "field": field,
        "message": format!("{} is {} across the dataset ({:+.1}% overall).", field, direction, relative * 100.0),
        "direction": direction,
        "slope": round4(slope),
    }))
}

fn top_category_insight(records: &[Record], category: &str, field: &str) -> Option<Value> {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for record in records {
        let label = match record.get(category) {
            Some(Scalar::Text(text)) => text.clone(),
            _ => continue,
        };
        if let Some(value) = record.get(field).and_then(Scalar::as_f64) {
            *totals.entry(label).or_default() += value;
        }
    }
    let grand_total: f64 = totals.values().sum();
    let (top, amount) = totals.iter().max_by(|a, b| a.1.total_cmp(b.1))?;
    let share = if grand_total != 0.0 { amount / grand_total } else { 0.0 };
    Some(json!({
        "type": "top_category",
        "field": field,
        "category": category,
        "message": format!(
            "{} leads {} with {:.1}% of total {}.",
            top, category, share * 100.0, field
        ),
        "value": top,
        "share": round4(share),
    }))
}

impl Capability for InsightGenerator {
    fn operation(&self) -> Operation {
        Operation::GenerateInsights
    }

    fn invoke(&self, request: &CapabilityRequest, _identity: &Identity) -> Result<Value> {
        let records = records(request);
        let fields = field_names(records);
        let numeric = numeric_fields(records);
        let category = fields.iter().find(|f| !numeric.contains(*f));

        let mut insights = Vec::new();
        for field in &numeric {
            let values = numeric_series(records, field);
            insights.extend(summary_insight(field, &values));
            insights.extend(trend_insight(field, &values));
        }
        if let Some(primary) = numeric.first() {
            insights.extend(highest_insight(records, primary, category));
            if let Some(category) = category {
                insights.extend(top_category_insight(records, category, primary));
            }
        }
        if insights.is_empty() && !records.is_empty() {
            insights.push(json!({
                "type": "summary",
                "message": format!("{} records across {} fields; no numeric fields to analyze.", records.len(), fields.len()),
            }));
        }

        let confidence = match (records.len(), numeric.is_empty()) {
            (0, _) => 0.0,
            (_, true) => 0.4,
            (n, false) if n < 5 => 0.6,
            _ => 0.8,
        };

        Ok(json!({
            "insights": insights,
            "record_count": records.len(),
            "field_count": fields.len(),
            "confidence": confidence,
        }))
    }
}
