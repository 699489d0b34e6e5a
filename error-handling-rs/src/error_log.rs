//! # Error Log
//!
//! Process-wide, bounded record of errors. The log is owned by the
//! application state and shared by every request handler; appends and
//! eviction happen under one mutex so concurrent writers never tear it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::logging::log_structured_error;
use crate::types::{Error, ErrorKind};

/// Default number of entries retained
pub const DEFAULT_ERROR_LOG_CAPACITY: usize = 1000;

/// One logged error. Never mutated after it is appended.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub error_type: String,
    pub kind: ErrorKind,
    pub error_message: String,
    pub traceback: String,
    pub context: Map<String, Value>,
}

impl ErrorLogEntry {
    /// Builds an entry from an error plus call-site context. Call-site keys
    /// win over keys already attached to the error.
    pub fn from_error(error: &Error, context: Map<String, Value>) -> Self {
        let mut merged = error.context.clone();
        merged.extend(context);
        Self {
            id: error.id,
            timestamp: Utc::now(),
            error_type: error.kind.name().to_string(),
            kind: error.kind,
            error_message: error.message.clone(),
            traceback: error.stack_context(),
            context: merged,
        }
    }
}

/// FIFO-bounded error log
#[derive(Debug)]
pub struct ErrorLog {
    entries: Mutex<VecDeque<ErrorLogEntry>>,
    capacity: usize,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ErrorLogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Logs `error` with context and appends it, evicting the oldest entries
    /// beyond capacity. Returns the stored entry.
    pub fn record(&self, error: &Error, context: Map<String, Value>) -> ErrorLogEntry {
        let entry = ErrorLogEntry::from_error(error, context);
        let endpoint = entry
            .context
            .get("endpoint")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        log_structured_error(error, &endpoint);
        self.push(entry.clone());
        counter!("error_log.entries", 1, "kind" => error.kind.name());
        entry
    }

    /// Appends an entry, evicting from the front until within capacity
    pub fn push(&self, entry: ErrorLogEntry) {
        let mut entries = self.lock();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// The last `n` entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<ErrorLogEntry> {
        let entries = self.lock();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Copy of every retained entry, oldest first
    pub fn snapshot(&self) -> Vec<ErrorLogEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn ctx(endpoint: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("endpoint".to_string(), Value::String(endpoint.to_string()));
        map
    }

    #[test]
    fn test_record_merges_context() {
        let log = ErrorLog::new(10);
        let err = Error::processing("bad pivot").context("stage", "aggregate");
        let entry = log.record(&err, ctx("forecast"));

        assert_eq!(entry.error_type, "ProcessingError");
        assert_eq!(entry.error_message, "bad pivot");
        assert_eq!(entry.context["stage"], "aggregate");
        assert_eq!(entry.context["endpoint"], "forecast");
        assert!(entry.traceback.starts_with("ProcessingError: bad pivot"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_fifo_eviction_keeps_most_recent() {
        let log = ErrorLog::new(1000);
        for i in 0..1005 {
            log.record(&Error::processing(format!("failure-{}", i)), Map::new());
        }
        let entries = log.snapshot();
        assert_eq!(entries.len(), 1000);
        assert_eq!(entries[0].error_message, "failure-5");
        assert_eq!(entries[999].error_message, "failure-1004");
    }

    #[test]
    fn test_recent_returns_tail_oldest_first() {
        let log = ErrorLog::new(50);
        assert!(log.recent(10).is_empty());
        for i in 0..15 {
            log.record(&Error::processing(format!("e{}", i)), Map::new());
        }
        let recent = log.recent(10);
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].error_message, "e5");
        assert_eq!(recent[9].error_message, "e14");
        assert_eq!(log.recent(100).len(), 15);
    }

    #[test]
    fn test_concurrent_writers() {
        let log = Arc::new(ErrorLog::new(10_000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..100 {
                        log.record(&Error::processing(format!("{}-{}", t, i)), Map::new());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 800);
    }
}
