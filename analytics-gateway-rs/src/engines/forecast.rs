use error_handling::{Error, Result};
use serde_json::{json, Value};
use shared_types::{numeric_fields, numeric_series, CapabilityRequest, Identity, Operation};

use super::{linear_fit, mean, records, round4};
use crate::dispatch::Capability;

/// Two-sided 95% normal quantile
const Z_95: f64 = 1.96;

/// Least-squares linear trend forecaster over the first numeric field
#[derive(Debug, Clone, Copy, Default)]
pub struct Forecaster;

impl Capability for Forecaster {
    fn operation(&self) -> Operation {
        Operation::Forecast
    }

    fn invoke(&self, request: &CapabilityRequest, _identity: &Identity) -> Result<Value> {
        let records = records(request);
        let horizon = request.horizon() as usize;
        let field = numeric_fields(records)
            .into_iter()
            .next()
            .ok_or_else(|| Error::insufficient_data("Forecasting needs a numeric field"))?;
        let series = numeric_series(records, &field);
        let (slope, intercept) = linear_fit(&series).ok_or_else(|| {
            Error::insufficient_data(format!("Forecasting needs at least 2 values of {}", field))
        })?;

        let n = series.len();
        let fitted = |x: f64| intercept + slope * x;
        let sse: f64 = series
            .iter()
            .enumerate()
            .map(|(i, y)| (y - fitted(i as f64)).powi(2))
            .sum();
        let sigma = if n > 2 { (sse / (n - 2) as f64).sqrt() } else { 0.0 };

        let predictions: Vec<f64> = (n..n + horizon).map(|x| round4(fitted(x as f64))).collect();
        let lower: Vec<f64> = predictions.iter().map(|p| round4(p - Z_95 * sigma)).collect();
        let upper: Vec<f64> = predictions.iter().map(|p| round4(p + Z_95 * sigma)).collect();

        let y_mean = mean(&series).unwrap_or_default();
        let sst: f64 = series.iter().map(|y| (y - y_mean).powi(2)).sum();
        let r_squared = if sst > 0.0 { (1.0 - sse / sst).clamp(0.0, 1.0) } else { 1.0 };

        Ok(json!({
            "field": field,
            "horizon": horizon,
            "predictions": predictions,
            "lower": lower,
            "upper": upper,
            "method": "linear_regression",
            "slope": round4(slope),
            "confidence": round4(r_squared),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forecast(dataset: Value, horizon: u32) -> Result<Value> {
        let dataset = serde_json::from_value(dataset).unwrap();
        Forecaster.invoke(
            &CapabilityRequest::dataset(Operation::Forecast, dataset).with_horizon(horizon),
            &Identity::derive("127.0.0.1", "test"),
        )
    }

    #[test]
    fn test_linear_series_extends_exactly() {
        let result = forecast(
            json!([{"month": "jan", "sales": 10}, {"month": "feb", "sales": 20}, {"month": "mar", "sales": 30}]),
            3,
        )
        .unwrap();
        assert_eq!(result["field"], "sales");
        assert_eq!(result["predictions"], json!([40.0, 50.0, 60.0]));
        assert_eq!(result["lower"], result["predictions"]);
        assert_eq!(result["confidence"], 1.0);
    }

    #[test]
    fn test_noisy_series_has_bounds() {
        let result = forecast(json!([{"v": 1}, {"v": 3}, {"v": 2}, {"v": 5}, {"v": 4}]), 2).unwrap();
        let predictions = result["predictions"].as_array().unwrap();
        assert_eq!(predictions.len(), 2);
        let lower = result["lower"][0].as_f64().unwrap();
        let upper = result["upper"][0].as_f64().unwrap();
        assert!(lower < predictions[0].as_f64().unwrap());
        assert!(upper > predictions[0].as_f64().unwrap());
    }

    #[test]
    fn test_too_little_data() {
        for dataset in [json!([]), json!([{"v": 1}]), json!([{"name": "a"}, {"name": "b"}])] {
            let err = forecast(dataset, 30).unwrap_err();
            assert_eq!(err.kind, error_handling::ErrorKind::InsufficientData);
        }
    }
}
