//! # Error Handling Framework
//!
//! Error classification and degraded-mode recovery for the analytics gateway.
//!
//! ## Features
//!
//! - A structured [`Error`] type classified by [`ErrorKind`]
//! - Structured logging setup shared by every binary
//! - Sanitization of request echoes before they are stored
//! - A bounded, thread-safe [`ErrorLog`] (FIFO eviction)
//! - [`ErrorRecoveryCoordinator`], which turns a failed capability call into a
//!   well-formed [`FallbackResult`]
//!

pub mod error_log;
pub mod fallback;
pub mod logging;
pub mod sanitization;
pub mod types;

// Re-export commonly used types
pub use error_log::{ErrorLog, ErrorLogEntry, DEFAULT_ERROR_LOG_CAPACITY};
pub use fallback::{ErrorRecoveryCoordinator, FallbackResult, FallbackType, RecoveryContext};
pub use logging::{init_logging, LoggingConfig};
pub use sanitization::{sanitize_input_echo, sanitize_message};
pub use types::{Error, ErrorKind, Result, Severity};
