use error_handling::Result;
use serde_json::{json, Value};
use shared_types::{numeric_fields, CapabilityRequest, Identity, Operation, Scalar};

use super::{mean, median, records, round4};
use crate::dispatch::Capability;

/// Iglewicz-Hoaglin cutoff for the modified z-score
pub const DEFAULT_THRESHOLD: f64 = 3.5;
/// Scale that makes the MAD consistent with the standard deviation
const MAD_SCALE: f64 = 0.6745;
/// Mean-absolute-deviation consistency constant, used when the MAD is zero
const MEAN_AD_SCALE: f64 = 1.253314;
const MIN_POINTS: usize = 3;

/// Flags outliers per numeric field with the modified z-score
#[derive(Debug, Clone, Copy)]
pub struct AnomalyDetector {
    pub threshold: f64,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self { threshold: DEFAULT_THRESHOLD }
    }
}

impl AnomalyDetector {
    /// Modified z-scores of `values`, or None when the spread is zero
    fn scores(values: &[f64]) -> Option<Vec<f64>> {
        let center = median(values)?;
        let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
        let mad = median(&deviations)?;
        if mad > 0.0 {
            return Some(values.iter().map(|v| MAD_SCALE * (v - center) / mad).collect());
        }
        let mean_ad = mean(&deviations)?;
        if mean_ad > 0.0 {
            return Some(values.iter().map(|v| (v - center) / (MEAN_AD_SCALE * mean_ad)).collect());
        }
        None
    }
}

impl Capability for AnomalyDetector {
    fn operation(&self) -> Operation {
        Operation::DetectAnomalies
    }

    fn invoke(&self, request: &CapabilityRequest, _identity: &Identity) -> Result<Value> {
        let records = records(request);
        let mut anomalies = Vec::new();
        let mut fields_scanned = 0;

        for field in numeric_fields(records) {
            // (row, value) pairs so flagged points map back to their record
            let points: Vec<(usize, f64)> = records
                .iter()
                .enumerate()
                .filter_map(|(row, r)| r.get(&field).and_then(Scalar::as_f64).map(|v| (row, v)))
                .collect();
            if points.len() < MIN_POINTS {
                continue;
            }
            fields_scanned += 1;

            let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
            let scores = match Self::scores(&values) {
                Some(scores) => scores,
                None => continue,
            };
            for ((row, value), score) in points.into_iter().zip(scores) {
                if score.abs() > self.threshold {
                    anomalies.push(json!({
                        "row": row,
                        "field": field,
                        "value": value,
                        "score": round4(score),
                    }));
                }
            }
        }

        let confidence = if fields_scanned == 0 {
            0.0
        } else if records.len() < 10 {
            0.6
        } else {
            0.8
        };

        Ok(json!({
            "anomalies": anomalies,
            "method": "modified_z_score",
            "threshold": self.threshold,
            "record_count": records.len(),
            "confidence": confidence,
        }))
    }
}
