//! # Telemetrist - Execution Telemetry
//!
//! Captures one entry per capability invocation, per endpoint, in bounded
//! FIFO series. Summaries are recomputed from the retained window on every
//! query rather than kept as running aggregates.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};

/// Default number of entries kept per endpoint
pub const DEFAULT_WINDOW: usize = 1000;

/// One execution outcome. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetricEntry {
    pub timestamp: DateTime<Utc>,
    /// Wall-clock duration of the invocation, serialized in seconds
    #[serde(rename = "execution_time", serialize_with = "serialize_secs")]
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Derived statistics over an endpoint's retained window.
///
/// `success_rate` and `avg_execution_time` are absent when the window is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointSummary {
    #[serde(rename = "total_requests")]
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
    /// Mean duration in seconds
    #[serde(rename = "avg_execution_time", skip_serializing_if = "Option::is_none")]
    pub avg_duration: Option<f64>,
}

impl EndpointSummary {
    fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a PerformanceMetricEntry>,
    {
        let mut count = 0usize;
        let mut successes = 0usize;
        let mut total_secs = 0.0f64;
        for entry in entries {
            count += 1;
            if entry.success {
                successes += 1;
            }
            total_secs += entry.duration.as_secs_f64();
        }

        if count == 0 {
            return Self { count: 0, success_rate: None, avg_duration: None };
        }

        Self {
            count,
            success_rate: Some(successes as f64 / count as f64),
            avg_duration: Some(total_secs / count as f64),
        }
    }
}

/// Configuration for the recorder
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Entries retained per endpoint
    pub window: usize,
    /// Redact emails and phone numbers from stored error text
    pub pii_redaction_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            pii_redaction_enabled: true,
        }
    }
}

static EMAIL_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").ok());
// Separated phone numbers only; bare digit runs are left alone
static PHONE_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?:\(\d{3}\)\s?|\b\d{3}[-. ])\d{3}[-. ]\d{4}\b").ok());

/// Strips emails and phone numbers from free text
pub fn redact_pii(text: &str) -> String {
    let mut result = text.to_string();
    if let Some(pattern) = EMAIL_PATTERN.as_ref() {
        result = pattern.replace_all(&result, "[EMAIL_REDACTED]").to_string();
    }
    if let Some(pattern) = PHONE_PATTERN.as_ref() {
        result = pattern.replace_all(&result, "[PHONE_REDACTED]").to_string();
    }
    result
}

type Series = Arc<Mutex<VecDeque<PerformanceMetricEntry>>>;

fn lock_series(series: &Series) -> MutexGuard<'_, VecDeque<PerformanceMetricEntry>> {
    series.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-endpoint bounded execution history.
///
/// Each endpoint's series has its own mutex, so appends to different
/// endpoints never contend; the endpoint map is only write-locked the first
/// time an endpoint is seen.
#[derive(Debug, Default)]
pub struct TelemetryRecorder {
    config: TelemetryConfig,
    series: RwLock<HashMap<String, Series>>,
}

impl TelemetryRecorder {
    pub fn new(config: TelemetryConfig) -> Self {
        let window = config.window.max(1);
        Self {
            config: TelemetryConfig { window, ..config },
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_window(window: usize) -> Self {
        Self::new(TelemetryConfig { window, ..TelemetryConfig::default() })
    }

    pub fn window(&self) -> usize {
        self.config.window
    }

    fn series_for(&self, endpoint: &str) -> Series {
        if let Some(series) = self
            .series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
        {
            return Arc::clone(series);
        }

        let mut map = self.series.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            map.entry(endpoint.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::with_capacity(self.config.window)))),
        )
    }

    fn existing_series(&self, endpoint: &str) -> Option<Series> {
        self.series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
            .cloned()
    }

    /// Appends an outcome for `endpoint`, evicting the oldest entries beyond the window
    pub fn record(&self, endpoint: &str, duration: Duration, success: bool, error: Option<String>) {
        let error = match error {
            Some(text) if self.config.pii_redaction_enabled => Some(redact_pii(&text)),
            other => other,
        };

        let entry = PerformanceMetricEntry {
            timestamp: Utc::now(),
            duration,
            success,
            error,
        };

        let series = self.series_for(endpoint);
        {
            let mut entries = lock_series(&series);
            entries.push_back(entry);
            while entries.len() > self.config.window {
                entries.pop_front();
            }
        }

        let outcome = if success { "success" } else { "failure" };
        counter!("capability.executions", 1, "endpoint" => endpoint.to_string(), "outcome" => outcome);
        histogram!("capability.duration_seconds", duration.as_secs_f64(), "endpoint" => endpoint.to_string());
        tracing::debug!(
            endpoint = %endpoint,
            duration_ms = %duration.as_millis(),
            success = %success,
            "Recorded execution"
        );
    }

    /// Statistics over the retained window of `endpoint`; zero-count when unknown
    pub fn summarize(&self, endpoint: &str) -> EndpointSummary {
        match self.existing_series(endpoint) {
            Some(series) => {
                let summary = EndpointSummary::from_entries(lock_series(&series).iter());
                summary
            }
            None => EndpointSummary::from_entries(std::iter::empty()),
        }
    }

    /// Summaries for every endpoint that has recorded at least once
    pub fn summarize_all(&self) -> BTreeMap<String, EndpointSummary> {
        self.handles()
            .into_iter()
            .map(|(endpoint, series)| {
                let summary = EndpointSummary::from_entries(lock_series(&series).iter());
                (endpoint, summary)
            })
            .collect()
    }

    /// Copy of the retained entries for `endpoint`, oldest first
    pub fn snapshot(&self, endpoint: &str) -> Vec<PerformanceMetricEntry> {
        match self.existing_series(endpoint) {
            Some(series) => {
                let entries = lock_series(&series).iter().cloned().collect();
                entries
            }
            None => Vec::new(),
        }
    }

    /// Copy of every endpoint's retained entries
    pub fn snapshot_all(&self) -> BTreeMap<String, Vec<PerformanceMetricEntry>> {
        self.handles()
            .into_iter()
            .map(|(endpoint, series)| {
                let entries = lock_series(&series).iter().cloned().collect();
                (endpoint, entries)
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    // Clones the handles so no series lock is taken while the map lock is held
    fn handles(&self) -> Vec<(String, Series)> {
        self.series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(endpoint, series)| (endpoint.clone(), Arc::clone(series)))
            .collect()
    }
}
