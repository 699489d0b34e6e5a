// Read-side aggregation for the operational endpoints

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use error_handling::{ErrorLog, ErrorLogEntry};
use serde::Serialize;
use serde_json::{json, Value};
use shared_types::Operation;
use telemetrist::{EndpointSummary, TelemetryRecorder};

use crate::dispatch::CapabilityRegistry;

/// Errors included in a report
pub const RECENT_ERROR_COUNT: usize = 10;

pub const FEATURES: [&str; 8] = [
    "Enhanced DAX Generation",
    "ML-based Chart Recommendation",
    "Advanced AI Insights",
    "Multi-algorithm Anomaly Detection",
    "Ensemble Forecasting",
    "Optimized SQL Generation",
    "Enterprise Security",
    "Auto Error Recovery",
];

const ACTIVE: &str = "active";
const MISSING: &str = "missing";

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub subsystems: BTreeMap<&'static str, &'static str>,
    pub performance_summary: BTreeMap<String, EndpointSummary>,
    pub recent_errors: Vec<ErrorLogEntry>,
}

/// Snapshots telemetry and the error log; never fails on empty state
#[derive(Debug, Clone)]
pub struct HealthStatusReporter {
    telemetry: Arc<TelemetryRecorder>,
    error_log: Arc<ErrorLog>,
    registry: Arc<CapabilityRegistry>,
    api_key_configured: bool,
    started_at: Instant,
}

impl HealthStatusReporter {
    pub fn new(
        telemetry: Arc<TelemetryRecorder>,
        error_log: Arc<ErrorLog>,
        registry: Arc<CapabilityRegistry>,
        api_key_configured: bool,
    ) -> Self {
        Self {
            telemetry,
            error_log,
            registry,
            api_key_configured,
            started_at: Instant::now(),
        }
    }

    fn engines_status(&self) -> BTreeMap<&'static str, &'static str> {
        Operation::ALL
            .iter()
            .map(|op| (op.engine_name(), if self.registry.contains(*op) { ACTIVE } else { MISSING }))
            .collect()
    }

    pub fn report(&self) -> HealthReport {
        let all_engines = Operation::ALL.iter().all(|op| self.registry.contains(*op));

        let mut subsystems = BTreeMap::new();
        subsystems.insert("api_status", "healthy");
        subsystems.insert("security_manager", ACTIVE);
        subsystems.insert("error_recovery", ACTIVE);
        subsystems.insert("ai_models", if all_engines { ACTIVE } else { "degraded" });

        HealthReport {
            status: if all_engines { "healthy" } else { "degraded" },
            subsystems,
            performance_summary: self.telemetry.summarize_all(),
            recent_errors: self.error_log.recent(RECENT_ERROR_COUNT),
        }
    }

    /// Body of `GET /api/health`
    pub fn health(&self) -> Value {
        let report = self.report();
        let mut body = json!({
            "status": report.status,
            "timestamp": Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": self.started_at.elapsed().as_secs(),
            "features": FEATURES,
        });
        if let Value::Object(fields) = &mut body {
            for (name, status) in &report.subsystems {
                fields.insert(name.to_string(), json!(status));
            }
            if !report.performance_summary.is_empty() {
                fields.insert("performance_summary".to_string(), json!(report.performance_summary));
            }
        }
        body
    }

    /// Body of `GET /api/system-status`
    pub fn system_status(&self) -> Value {
        json!({
            "performance_metrics": self.telemetry.snapshot_all(),
            "recent_errors": self.error_log.recent(RECENT_ERROR_COUNT),
            "security_status": {
                "api_key_configured": self.api_key_configured,
                "constant_time_comparison": true,
                "identity_fingerprinting": true,
            },
            "ai_models_status": self.engines_status(),
            "error_log_size": self.error_log.len(),
            "timestamp": Utc::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_handling::{Error, ErrorKind};
    use serde_json::Map;
    use std::time::Duration;

    fn reporter(registry: CapabilityRegistry) -> (HealthStatusReporter, Arc<TelemetryRecorder>, Arc<ErrorLog>) {
        let telemetry = Arc::new(TelemetryRecorder::default());
        let error_log = Arc::new(ErrorLog::new(100));
        let reporter = HealthStatusReporter::new(
            Arc::clone(&telemetry),
            Arc::clone(&error_log),
            Arc::new(registry),
            true,
        );
        (reporter, telemetry, error_log)
    }

    #[test]
    fn test_empty_state() {
        let (reporter, _, _) = reporter(CapabilityRegistry::with_defaults());
        let report = reporter.report();
        assert_eq!(report.status, "healthy");
        assert!(report.performance_summary.is_empty());
        assert!(report.recent_errors.is_empty());

        let health = reporter.health();
        assert!(health.get("performance_summary").is_none());
        assert_eq!(health["features"].as_array().unwrap().len(), 8);
        assert_eq!(health["ai_models"], "active");
    }

    #[test]
    fn test_recent_errors_are_capped() {
        let (reporter, telemetry, error_log) = reporter(CapabilityRegistry::with_defaults());
        for i in 0..15 {
            error_log.record(&Error::new(ErrorKind::Processing, format!("failure {}", i)), Map::new());
        }
        telemetry.record("forecast", Duration::from_millis(5), true, None);

        let report = reporter.report();
        assert_eq!(report.recent_errors.len(), RECENT_ERROR_COUNT);
        assert_eq!(report.recent_errors[0].error_message, "failure 5");
        assert_eq!(report.performance_summary["forecast"].count, 1);

        let status = reporter.system_status();
        assert_eq!(status["error_log_size"], 15);
        assert_eq!(status["recent_errors"].as_array().unwrap().len(), 10);
        assert_eq!(status["performance_metrics"]["forecast"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_engine_degrades() {
        let (reporter, _, _) = reporter(CapabilityRegistry::empty().with(crate::engines::Forecaster));
        assert_eq!(reporter.report().status, "degraded");
        let status = reporter.system_status();
        assert_eq!(status["ai_models_status"]["forecasting_model"], "active");
        assert_eq!(status["ai_models_status"]["sql_generator"], "missing");
    }
}
