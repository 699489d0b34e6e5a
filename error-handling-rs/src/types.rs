//! # Standardized Error Types
//!
//! The error type capabilities return, and the classification the recovery
//! coordinator works from. Classification is by [`ErrorKind`] only; the
//! coordinator never inspects capability-specific message text.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A type alias for Result with the error type defaulting to our Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// How loudly a failure is logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Expected with bad or thin input; logged at warn
    Minor,
    /// A capability or dependency failed; logged at error
    Major,
    /// A panic or internal fault; logged at error with full context
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Minor => write!(f, "MINOR"),
            Severity::Major => write!(f, "MAJOR"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Major
    }
}

/// Categorizes different kinds of errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Input was well-formed but unusable by the capability
    Validation,
    /// The capability failed while computing its result
    Processing,
    /// Not enough data to produce a meaningful result
    InsufficientData,
    /// The invocation exceeded its deadline
    Timeout,
    /// A backing resource or model is unavailable
    Unavailable,
    /// A dependency outside the process failed
    External,
    /// Internal server error
    Internal,
    /// The capability panicked
    Panic,
}

impl ErrorKind {
    /// Short type label stored in error log entries
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Processing => "ProcessingError",
            ErrorKind::InsufficientData => "InsufficientDataError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Unavailable => "UnavailableError",
            ErrorKind::External => "ExternalError",
            ErrorKind::Internal => "InternalError",
            ErrorKind::Panic => "PanicError",
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorKind::Validation | ErrorKind::InsufficientData => Severity::Minor,
            ErrorKind::Processing | ErrorKind::Timeout | ErrorKind::Unavailable | ErrorKind::External => {
                Severity::Major
            }
            ErrorKind::Internal | ErrorKind::Panic => Severity::Critical,
        }
    }

    /// Whether the same call might succeed if repeated later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::Unavailable | ErrorKind::External
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "Validation Error"),
            ErrorKind::Processing => write!(f, "Processing Error"),
            ErrorKind::InsufficientData => write!(f, "Insufficient Data Error"),
            ErrorKind::Timeout => write!(f, "Timeout Error"),
            ErrorKind::Unavailable => write!(f, "Service Unavailable Error"),
            ErrorKind::External => write!(f, "External Service Error"),
            ErrorKind::Internal => write!(f, "Internal Server Error"),
            ErrorKind::Panic => write!(f, "Panic"),
        }
    }
}

/// Core error type returned by capabilities
///
/// `Clone` is implemented manually: clones keep every structured field but
/// drop the opaque `cause` and `backtrace`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Error {
    pub id: Uuid,
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    /// Merged into the error log entry's context
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    #[serde(skip)]
    pub cause: Option<Box<dyn StdError + Send + Sync>>,
    /// Captured at construction when `RUST_BACKTRACE` allows it
    #[serde(skip)]
    pub backtrace: Option<Backtrace>,
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            kind: self.kind,
            message: self.message.clone(),
            timestamp: self.timestamp,
            severity: self.severity,
            context: self.context.clone(),
            cause: None,
            backtrace: None,
        }
    }
}

impl Error {
    /// Creates a new error with the specified kind and message
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            severity: kind.default_severity(),
            context: serde_json::Map::new(),
            cause: None,
            backtrace: Some(Backtrace::capture()),
        }
    }

    pub fn processing<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Processing, message)
    }

    pub fn insufficient_data<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::InsufficientData, message)
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Attaches a serializable context value; unserializable values are skipped
    pub fn context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.into(), value);
        }
        self
    }

    pub fn cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Timeouts and unavailable dependencies may clear on their own
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Human-readable stack context: the cause chain, followed by the
    /// backtrace when one was captured (`RUST_BACKTRACE=1`).
    pub fn stack_context(&self) -> String {
        let mut lines = vec![format!("{}: {}", self.kind.name(), self.message)];

        let mut source = self.source();
        while let Some(err) = source {
            lines.push(format!("caused by: {}", err));
            source = err.source();
        }

        if let Some(backtrace) = &self.backtrace {
            if backtrace.status() == BacktraceStatus::Captured {
                lines.push(backtrace.to_string());
            }
        }

        lines.join("\n")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.kind, self.message)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Processing, format!("JSON error: {}", err)).cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::new(ErrorKind::Processing, "matrix is singular")
            .context("field", "sales")
            .severity(Severity::Minor);

        assert_eq!(err.kind, ErrorKind::Processing);
        assert_eq!(err.message, "matrix is singular");
        assert_eq!(err.severity, Severity::Minor);
        assert_eq!(err.context["field"], "sales");
    }

    #[test]
    fn test_error_display() {
        let err = Error::new(ErrorKind::Timeout, "deadline exceeded");
        let display = format!("{}", err);
        assert!(display.contains("MAJOR"));
        assert!(display.contains("Timeout Error"));
        assert!(display.contains("deadline exceeded"));
    }

    #[test]
    fn test_clone_drops_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = Error::new(ErrorKind::Unavailable, "model store offline").cause(io);
        assert!(err.source().is_some());
        assert!(err.stack_context().contains("caused by: disk gone"));

        let cloned = err.clone();
        assert_eq!(cloned.id, err.id);
        assert!(cloned.source().is_none());
        assert!(cloned.is_transient());
    }

    #[test]
    fn test_kind_defaults() {
        assert_eq!(ErrorKind::Panic.default_severity(), Severity::Critical);
        assert_eq!(ErrorKind::InsufficientData.default_severity(), Severity::Minor);
        assert!(!ErrorKind::Processing.is_transient());
        assert_eq!(ErrorKind::Timeout.name(), "TimeoutError");
    }
}
