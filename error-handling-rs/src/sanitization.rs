//! # Input Sanitization
//!
//! Request echoes stored in the error log are exposed through the status
//! endpoints, so they are scrubbed of credentials and contact details and
//! truncated before they are kept.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use shared_types::{CapabilityRequest, Payload, Record, Scalar};

/// Longest text echo kept, in characters
pub const MAX_ECHO_CHARS: usize = 500;
/// Records included in a dataset echo
pub const DATASET_PREVIEW_ROWS: usize = 5;

const REDACTED: &str = "[REDACTED]";

// Static regex patterns for sensitive information detection
static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // API keys, tokens, credentials
        r#"(?i)(api[_-]?key|token|secret|password|credential)s?["']?\s*[=:]\s*["']?([^"'\s]+)"#,
        // OAuth 2.0 tokens
        r"(?i)bearer\s+([a-zA-Z0-9\._\-]+)",
        // JWTs
        r"eyJ[a-zA-Z0-9\-_]+\.eyJ[a-zA-Z0-9\-_]+\.[a-zA-Z0-9\-_]+",
        // Email addresses
        r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

// Field names whose values are never echoed
static SENSITIVE_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "password", "secret", "token", "credential", "ssn", "credit_card",
        "api_key", "apikey", "access_token", "session_id", "cookie",
    ]
    .into_iter()
    .collect()
});

/// Determines if a field name is sensitive
fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|sensitive| key_lower.contains(sensitive))
}

/// Replaces sensitive substrings of a message
pub fn sanitize_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    for pattern in SENSITIVE_PATTERNS.iter() {
        sanitized = pattern
            .replace_all(&sanitized, |caps: &regex::Captures| {
                if caps.len() > 2 {
                    // Keep the key name but redact the value
                    format!("{}={}", &caps[1], REDACTED)
                } else {
                    REDACTED.to_string()
                }
            })
            .to_string();
    }

    truncate(&sanitized, MAX_ECHO_CHARS)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

fn sanitize_record(record: &Record) -> Value {
    let fields = record
        .iter()
        .map(|(key, value)| {
            let value = if is_sensitive_key(key) {
                Value::String(REDACTED.to_string())
            } else {
                match value {
                    Scalar::Text(text) => Value::String(sanitize_message(text)),
                    other => serde_json::to_value(other).unwrap_or(Value::Null),
                }
            };
            (key.clone(), value)
        })
        .collect();
    Value::Object(fields)
}

/// Builds the input echo stored with an error log entry
pub fn sanitize_input_echo(request: &CapabilityRequest) -> Value {
    match &request.payload {
        Payload::Text(requirement) => json!({
            "requirement": sanitize_message(requirement),
        }),
        Payload::Dataset(records) => {
            let preview: Vec<Value> = records
                .iter()
                .take(DATASET_PREVIEW_ROWS)
                .map(sanitize_record)
                .collect();
            let mut echo = json!({
                "record_count": records.len(),
                "preview": preview,
            });
            if let Some(horizon) = request.horizon {
                echo["horizon"] = json!(horizon);
            }
            echo
        }
    }
}
