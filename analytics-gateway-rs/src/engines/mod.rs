//! Built-in capability engines
//!
//! Small deterministic implementations of the six operations so the gateway
//! is usable without external model services. Any of them can be replaced
//! through [`crate::dispatch::CapabilityRegistry::with`].

mod anomaly;
mod chart;
mod dax;
mod forecast;
mod insights;
mod sql;

pub use anomaly::AnomalyDetector;
pub use chart::ChartRecommender;
pub use dax::DaxGenerator;
pub use forecast::Forecaster;
pub use insights::InsightGenerator;
pub use sql::SqlGenerator;

use error_handling::Error;
use once_cell::sync::Lazy;
use regex::Regex;
use shared_types::{CapabilityRequest, Record};

static WORD: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[a-z0-9_]+").ok());
static LIMIT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\b(?:top|first|limit)\s+(\d{1,6})\b").ok());

/// Aggregation named in a requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Aggregation {
    Sum,
    Average,
    Count,
    Min,
    Max,
}

/// Time intelligence modifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Period {
    YearToDate,
    YearOverYear,
}

/// What a free-text requirement asks for
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Intent {
    pub aggregation: Aggregation,
    /// False when no aggregation keyword was found and `Sum` was assumed
    pub explicit: bool,
    pub measure: Option<String>,
    pub group_by: Option<String>,
    pub table: Option<String>,
    pub limit: Option<u32>,
    pub period: Option<Period>,
}

const FILLER: &[&str] = &[
    "a", "an", "the", "of", "all", "me", "show", "give", "get", "list", "display", "calculate",
    "compute", "find", "what", "is", "are", "i", "want", "need", "please", "create", "measure",
    "query", "write", "value", "values", "our", "my", "each", "every",
];

const BOUNDARY: &[&str] = &[
    "by", "per", "for", "from", "in", "where", "over", "across", "grouped", "group", "top",
    "first", "limit", "ytd", "yoy", "year", "and", "with", "sorted", "ordered",
];

fn aggregation_keyword(words: &[&str], i: usize) -> Option<(Aggregation, usize)> {
    let next = words.get(i + 1).copied();
    let found = match words[i] {
        "total" | "sum" => (Aggregation::Sum, 1),
        "average" | "avg" | "mean" => (Aggregation::Average, 1),
        "count" => (Aggregation::Count, 1),
        "number" if next == Some("of") => (Aggregation::Count, 2),
        "how" if next == Some("many") => (Aggregation::Count, 2),
        "minimum" | "min" | "lowest" | "smallest" => (Aggregation::Min, 1),
        "maximum" | "max" | "highest" | "largest" => (Aggregation::Max, 1),
        _ => return None,
    };
    Some(found)
}

/// Words that end a phrase; "order" only does so as part of "order by"
fn is_boundary(words: &[&str], i: usize) -> bool {
    match words[i] {
        "order" => words.get(i + 1) == Some(&"by"),
        w => BOUNDARY.contains(&w),
    }
}

/// Consecutive content words starting at `start`, stopping at a boundary word
fn phrase_at(words: &[&str], start: usize) -> Option<String> {
    let begin = (start..words.len()).find(|&i| !FILLER.contains(&words[i]))?;
    let phrase: Vec<&str> = (begin..words.len())
        .take_while(|&i| !is_boundary(words, i))
        .map(|i| words[i])
        .filter(|w| !FILLER.contains(w))
        .collect();
    if phrase.is_empty() {
        None
    } else {
        Some(phrase.join("_"))
    }
}

/// Parses a requirement such as "total sales by region" or
/// "top 5 customers by average order amount from orders"
pub(crate) fn parse_intent(requirement: &str) -> Result<Intent, Error> {
    let lowered = requirement.to_lowercase();
    let words: Vec<&str> = match WORD.as_ref() {
        Some(re) => re.find_iter(&lowered).map(|m| m.as_str()).collect(),
        None => lowered.split_whitespace().collect(),
    };

    let keyword = (0..words.len()).find_map(|i| aggregation_keyword(&words, i).map(|(a, len)| (i, a, len)));
    let (aggregation, explicit, measure) = match keyword {
        Some((i, aggregation, len)) => (aggregation, true, phrase_at(&words, i + len)),
        None => (Aggregation::Sum, false, phrase_at(&words, 0)),
    };

    let keyword_at = keyword.map(|(i, _, _)| i);
    let after = |markers: &[&str]| {
        words
            .iter()
            .enumerate()
            .filter(|(i, w)| markers.contains(*w) && Some(i + 1) != keyword_at)
            .find_map(|(i, _)| phrase_at(&words, i + 1))
    };
    // "top 5 customers by ..." groups by what follows the count
    let ranked = || {
        words
            .iter()
            .position(|w| matches!(*w, "top" | "first"))
            .filter(|i| words.get(i + 1).map_or(false, |n| n.parse::<u32>().is_ok()))
            .and_then(|i| phrase_at(&words, i + 2))
    };
    let group_by = after(&["by", "per"]).or_else(ranked);
    let table = after(&["from"]);

    let period = if lowered.contains("year to date") || words.contains(&"ytd") {
        Some(Period::YearToDate)
    } else if lowered.contains("year over year") || words.contains(&"yoy") {
        Some(Period::YearOverYear)
    } else {
        None
    };

    let limit = LIMIT
        .as_ref()
        .and_then(|re| re.captures(&lowered))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|n| *n > 0);

    if measure.is_none() && aggregation != Aggregation::Count {
        return Err(Error::insufficient_data(format!(
            "Could not identify a measure in requirement '{}'",
            requirement.trim()
        )));
    }

    Ok(Intent { aggregation, explicit, measure, group_by, table, limit, period })
}

/// `order_amount` -> `Order Amount`
pub(crate) fn title_case(identifier: &str) -> String {
    identifier
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Records of a dataset request; empty for text requests
pub(crate) fn records(request: &CapabilityRequest) -> &[Record] {
    request.records().unwrap_or_default()
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub(crate) fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Least-squares fit of `values` against their index: (slope, intercept)
pub(crate) fn linear_fit(values: &[f64]) -> Option<(f64, f64)> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values)?;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;
    Some((slope, y_mean - slope * x_mean))
}

pub(crate) fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sum_by_group() {
        let intent = parse_intent("total sales by region").unwrap();
        assert_eq!(intent.aggregation, Aggregation::Sum);
        assert!(intent.explicit);
        assert_eq!(intent.measure.as_deref(), Some("sales"));
        assert_eq!(intent.group_by.as_deref(), Some("region"));
        assert_eq!(intent.period, None);
    }

    #[test]
    fn test_parse_count_limit_and_table() {
        let intent = parse_intent("Show the top 5 customers by number of orders from sales_orders").unwrap();
        assert_eq!(intent.limit, Some(5));
        assert_eq!(intent.aggregation, Aggregation::Count);
        assert_eq!(intent.measure.as_deref(), Some("orders"));
        assert_eq!(intent.table.as_deref(), Some("sales_orders"));
        assert_eq!(intent.group_by.as_deref(), Some("customers"));
    }

    #[test]
    fn test_parse_periods_and_multiword_measure() {
        let intent = parse_intent("average order amount year to date").unwrap();
        assert_eq!(intent.aggregation, Aggregation::Average);
        assert_eq!(intent.measure.as_deref(), Some("order_amount"));
        assert_eq!(intent.period, Some(Period::YearToDate));

        let intent = parse_intent("revenue YoY").unwrap();
        assert!(!intent.explicit);
        assert_eq!(intent.measure.as_deref(), Some("revenue"));
        assert_eq!(intent.period, Some(Period::YearOverYear));
    }

    #[test]
    fn test_parse_measure_starting_with_order() {
        let intent = parse_intent("total order value").unwrap();
        assert_eq!(intent.measure.as_deref(), Some("order"));

        let intent = parse_intent("sum of order quantity order by month").unwrap();
        assert_eq!(intent.aggregation, Aggregation::Sum);
        assert_eq!(intent.measure.as_deref(), Some("order_quantity"));
        assert_eq!(intent.group_by.as_deref(), Some("month"));
    }

    #[test]
    fn test_parse_rejects_fillers_only() {
        let err = parse_intent("show me the").unwrap_err();
        assert_eq!(err.kind, error_handling::ErrorKind::InsufficientData);
    }

    #[test]
    fn test_helpers() {
        assert_eq!(title_case("order_amount"), "Order Amount");
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        let (slope, intercept) = linear_fit(&[1.0, 3.0, 5.0]).unwrap();
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((intercept - 1.0).abs() < 1e-9);
        assert!(linear_fit(&[1.0]).is_none());
    }
}
