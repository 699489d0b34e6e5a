use error_handling::{Error, Result};
use serde_json::{json, Value};
use shared_types::{CapabilityRequest, Identity, Operation};

use super::{parse_intent, Aggregation, Intent, Period};
use crate::dispatch::Capability;

const DEFAULT_TABLE: &str = "data";

/// Template-based SQL generator
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlGenerator;

impl Capability for SqlGenerator {
    fn operation(&self) -> Operation {
        Operation::GenerateSql
    }

    fn invoke(&self, request: &CapabilityRequest, _identity: &Identity) -> Result<Value> {
        let requirement = request
            .requirement()
            .ok_or_else(|| Error::processing("SQL generation needs a text requirement"))?;
        let intent = parse_intent(requirement)?;
        let (query, explanation) = build_query(&intent);

        Ok(json!({
            "requirement": requirement,
            "query": query,
            "explanation": explanation,
            "confidence": if intent.explicit { 0.8 } else { 0.5 },
        }))
    }
}

fn build_query(intent: &Intent) -> (String, String) {
    let table = intent.table.as_deref().unwrap_or(DEFAULT_TABLE);
    let measure = intent.measure.as_deref();

    let (aggregate, alias) = match (intent.aggregation, measure) {
        (Aggregation::Count, _) => ("COUNT(*)".to_string(), "row_count".to_string()),
        (Aggregation::Sum, Some(m)) => (format!("SUM({})", m), format!("total_{}", m)),
        (Aggregation::Average, Some(m)) => (format!("AVG({})", m), format!("avg_{}", m)),
        (Aggregation::Min, Some(m)) => (format!("MIN({})", m), format!("min_{}", m)),
        (Aggregation::Max, Some(m)) => (format!("MAX({})", m), format!("max_{}", m)),
        (_, None) => ("COUNT(*)".to_string(), "row_count".to_string()),
    };

    let mut query = String::from("SELECT ");
    if let Some(group) = intent.group_by.as_deref() {
        query.push_str(group);
        query.push_str(", ");
    }
    query.push_str(&format!("{} AS {}\nFROM {}", aggregate, alias, table));
    if let Some(group) = intent.group_by.as_deref() {
        query.push_str(&format!("\nGROUP BY {}\nORDER BY {} DESC", group, alias));
    }
    if let Some(limit) = intent.limit {
        query.push_str(&format!("\nLIMIT {}", limit));
    }
    query.push(';');

    let mut explanation = format!("Computes {} over {}", aggregate, table);
    if let Some(group) = intent.group_by.as_deref() {
        explanation.push_str(&format!(" for each {}, largest first", group));
    }
    if let Some(limit) = intent.limit {
        explanation.push_str(&format!(", keeping the first {} rows", limit));
    }
    explanation.push('.');
    if intent.period.is_some() {
        explanation.push_str(" Add a date filter for the ");
        explanation.push_str(match intent.period {
            Some(Period::YearOverYear) => "two years being compared.",
            _ => "current year.",
        });
    }
    if !intent.explicit {
        explanation.push_str(" No aggregation was named, so SUM was assumed.");
    }

    (query, explanation)
}
