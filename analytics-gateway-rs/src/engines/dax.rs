use error_handling::{Error, Result};
use serde_json::{json, Value};
use shared_types::{CapabilityRequest, Identity, Operation};

use super::{parse_intent, title_case, Aggregation, Intent, Period};
use crate::dispatch::Capability;

const DEFAULT_TABLE: &str = "Data";
const DATE_COLUMN: &str = "'Date'[Date]";

/// Template-based DAX measure generator
#[derive(Debug, Clone, Copy, Default)]
pub struct DaxGenerator;

impl Capability for DaxGenerator {
    fn operation(&self) -> Operation {
        Operation::GenerateDax
    }

    fn invoke(&self, request: &CapabilityRequest, _identity: &Identity) -> Result<Value> {
        let requirement = request
            .requirement()
            .ok_or_else(|| Error::processing("DAX generation needs a text requirement"))?;
        let intent = parse_intent(requirement)?;
        let measure = build_measure(&intent);

        Ok(json!({
            "requirement": requirement,
            "measure_name": measure.name,
            "expression": measure.expression,
            "explanation": measure.explanation,
            "confidence": if intent.explicit { 0.85 } else { 0.5 },
        }))
    }
}

struct Measure {
    name: String,
    expression: String,
    explanation: String,
}

fn table_name(intent: &Intent) -> String {
    intent
        .table
        .as_deref()
        .map(title_case)
        .unwrap_or_else(|| DEFAULT_TABLE.to_string())
}

fn build_measure(intent: &Intent) -> Measure {
    let table = table_name(intent);
    let column = intent.measure.as_deref().map(title_case);
    let column_ref = |c: &str| format!("'{}'[{}]", table, c);

    let (name, base) = match (intent.aggregation, column.as_deref()) {
        (Aggregation::Count, None) => (format!("{} Count", table), format!("COUNTROWS('{}')", table)),
        (Aggregation::Count, Some(c)) => (
            format!("Count of {}", c),
            format!("COUNTROWS('{}')", intent.table.as_deref().map(title_case).unwrap_or_else(|| c.to_string())),
        ),
        (Aggregation::Sum, Some(c)) => (format!("Total {}", c), format!("SUM({})", column_ref(c))),
        (Aggregation::Average, Some(c)) => (format!("Average {}", c), format!("AVERAGE({})", column_ref(c))),
        (Aggregation::Min, Some(c)) => (format!("Min {}", c), format!("MIN({})", column_ref(c))),
        (Aggregation::Max, Some(c)) => (format!("Max {}", c), format!("MAX({})", column_ref(c))),
        // parse_intent guarantees a measure for every other aggregation
        (_, None) => (format!("{} Rows", table), format!("COUNTROWS('{}')", table)),
    };

    let (name, expression) = match intent.period {
        None => (name.clone(), format!("{} = {}", name, base)),
        Some(Period::YearToDate) => {
            let name = format!("{} YTD", name);
            let expression = format!("{} = TOTALYTD({}, {})", name, base, DATE_COLUMN);
            (name, expression)
        }
        Some(Period::YearOverYear) => {
            let name = format!("{} YoY %", name);
            let expression = format!(
                "{name} =\nVAR CurrentValue = {base}\nVAR PriorValue = CALCULATE({base}, SAMEPERIODLASTYEAR({date}))\nRETURN DIVIDE(CurrentValue - PriorValue, PriorValue)",
                name = name,
                base = base,
                date = DATE_COLUMN
            );
            (name, expression)
        }
    };

    let mut explanation = format!("Measure '{}' evaluates {}.", name, base);
    if let Some(period) = intent.period {
        explanation.push_str(match period {
            Period::YearToDate => " It accumulates from the start of the year and needs a marked date table.",
            Period::YearOverYear => " It compares each period with the same period last year and needs a marked date table.",
        });
    }
    if let Some(group) = intent.group_by.as_deref() {
        explanation.push_str(&format!(
            " Place {} on a visual axis to break it down by {}.",
            column_ref(&title_case(group)),
            group.replace('_', " ")
        ));
    }
    if !intent.explicit {
        explanation.push_str(" No aggregation was named, so SUM was assumed.");
    }

    Measure { name, expression, explanation }
}
