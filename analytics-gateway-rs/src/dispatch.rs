// Capability registry and dispatcher
//
// Every operation is bound to one `Capability` at startup. Invocation runs on
// the blocking pool; its wall-clock duration is recorded to telemetry whether
// it succeeds, fails, panics or overruns the deadline.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use error_handling::{Error, ErrorKind};
use metrics::counter;
use serde_json::Value;
use shared_types::{CapabilityRequest, Identity, Operation, PayloadKind};
use telemetrist::TelemetryRecorder;
use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::engines;

/// A pluggable analysis operation
pub trait Capability: Send + Sync {
    /// The operation this capability serves
    fn operation(&self) -> Operation;

    fn accepts(&self, kind: PayloadKind) -> bool {
        kind == self.operation().payload_kind()
    }

    /// Runs the analysis. Called on a blocking thread.
    fn invoke(&self, request: &CapabilityRequest, identity: &Identity) -> error_handling::Result<Value>;
}

/// Operation -> capability bindings
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<Operation, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in engine for every operation
    pub fn with_defaults() -> Self {
        Self::empty()
            .with(engines::DaxGenerator)
            .with(engines::ChartRecommender)
            .with(engines::InsightGenerator)
            .with(engines::AnomalyDetector::default())
            .with(engines::Forecaster)
            .with(engines::SqlGenerator)
    }

    /// Binds `capability` to its operation, replacing any previous binding
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        let operation = capability.operation();
        if self.capabilities.insert(operation, capability).is_some() {
            debug!(operation = %operation, "Replaced capability binding");
        }
    }

    pub fn with<C: Capability + 'static>(mut self, capability: C) -> Self {
        self.register(Arc::new(capability));
        self
    }

    pub fn get(&self, operation: Operation) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(&operation).cloned()
    }

    pub fn contains(&self, operation: Operation) -> bool {
        self.capabilities.contains_key(&operation)
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut operations: Vec<_> = self.capabilities.keys().map(Operation::as_str).collect();
        operations.sort_unstable();
        f.debug_struct("CapabilityRegistry")
            .field("operations", &operations)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(Operation),

    #[error("Operation {operation} does not accept {kind} payloads")]
    UnsupportedPayload { operation: Operation, kind: PayloadKind },

    /// The capability ran and failed; recoverable
    #[error("{0}")]
    Capability(Error),
}

/// Invokes capabilities and records their outcome
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    telemetry: Arc<TelemetryRecorder>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        telemetry: Arc<TelemetryRecorder>,
        timeout: Option<Duration>,
    ) -> Self {
        Self { registry, telemetry, timeout }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Runs `request` against its capability, timing the invocation under `endpoint`
    pub async fn dispatch(
        &self,
        endpoint: &str,
        request: Arc<CapabilityRequest>,
        identity: Identity,
    ) -> Result<Value, DispatchError> {
        let operation = request.operation;
        let capability = self
            .registry
            .get(operation)
            .ok_or(DispatchError::UnknownOperation(operation))?;

        let kind = request.payload.kind();
        if !capability.accepts(kind) {
            return Err(DispatchError::UnsupportedPayload { operation, kind });
        }

        let started = Instant::now();
        let task_request = Arc::clone(&request);
        let handle = tokio::task::spawn_blocking(move || capability.invoke(&task_request, &identity));

        let outcome = match self.timeout {
            Some(deadline) => match tokio::time::timeout(deadline, handle).await {
                Ok(joined) => flatten(joined),
                // The blocking thread keeps running; its result is dropped.
                Err(_) => Err(Error::new(
                    ErrorKind::Timeout,
                    format!("{} exceeded its {}s deadline", operation, deadline.as_secs_f64()),
                )),
            },
            None => flatten(handle.await),
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(result) => {
                self.telemetry.record(endpoint, elapsed, true, None);
                debug!(endpoint = %endpoint, elapsed_ms = elapsed.as_millis() as u64, "Capability succeeded");
                Ok(result)
            }
            Err(error) => {
                self.telemetry
                    .record(endpoint, elapsed, false, Some(error.message.clone()));
                counter!("capability.failures", 1, "operation" => operation.as_str(), "kind" => error.kind.name());
                warn!(
                    endpoint = %endpoint,
                    error_kind = %error.kind,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Capability failed: {}",
                    error.message
                );
                Err(DispatchError::Capability(error))
            }
        }
    }
}

fn flatten(joined: Result<error_handling::Result<Value>, JoinError>) -> error_handling::Result<Value> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(Error::new(
            ErrorKind::Panic,
            format!("Capability panicked: {}", panic_message(e.into_panic())),
        )),
        Err(e) => Err(Error::new(ErrorKind::Internal, format!("Capability task aborted: {}", e))),
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
