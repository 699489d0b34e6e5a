//! Types shared across the analytics gateway crates.
//!
//! The gateway exposes six analytical operations. Everything that crosses a
//! crate boundary (the operation tag, the validated request, the caller's
//! identity fingerprint) lives here so that the telemetry, recovery and HTTP
//! crates agree on one vocabulary.

pub mod identity;
pub mod operation;
pub mod request;

pub use identity::Identity;
pub use operation::{Operation, PayloadKind, Surface, UnknownOperationName};
pub use request::{
    field_names, numeric_fields, numeric_series, CapabilityRequest, Dataset, Payload, Record, Scalar,
    DEFAULT_FORECAST_HORIZON,
};
