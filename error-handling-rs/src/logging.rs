//! # Structured Logging
//!
//! One-time `tracing` subscriber setup and severity-aware error logging.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::types::{Error, ErrorKind, Result, Severity};

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The log level to use when `RUST_LOG` is unset (trace, debug, info, warn, error)
    pub level: String,
    /// The service name for identification
    pub service_name: String,
    /// Whether to use JSON formatting
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "analytics-gateway".to_string(),
            json_format: false,
        }
    }
}

/// Initializes the structured logging system. Later calls are no-ops.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    if LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let json_layer = config.json_format.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
    });
    let text_layer = (!config.json_format).then(|| fmt::layer().with_target(true).with_thread_names(true));

    Registry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| {
            LOGGING_INITIALIZED.store(false, Ordering::SeqCst);
            Error::new(ErrorKind::Internal, format!("Failed to set global subscriber: {}", e))
        })?;

    tracing::info!(
        service = %config.service_name,
        level = %config.level,
        json = %config.json_format,
        "Structured logging initialized"
    );

    Ok(())
}

/// Logs an error at the level its severity calls for
pub fn log_structured_error(error: &Error, endpoint: &str) {
    match error.severity {
        Severity::Critical => tracing::error!(
            error_id = %error.id,
            error_kind = %error.kind,
            endpoint = %endpoint,
            severity = %error.severity,
            context = ?error.context,
            "Critical error: {}",
            error.message
        ),
        Severity::Major => tracing::error!(
            error_id = %error.id,
            error_kind = %error.kind,
            endpoint = %endpoint,
            severity = %error.severity,
            "Error logged: {}",
            error.message
        ),
        Severity::Minor => tracing::warn!(
            error_id = %error.id,
            error_kind = %error.kind,
            endpoint = %endpoint,
            "Minor error logged: {}",
            error.message
        ),
    }
}
