//! Per-sensor calibration record and its application logic.
//!
//! Grounded on `original_source/app/domain/sensors/calibration.py`.

use serde::{Deserialize, Serialize};

use crate::core::domain::errors::PipelineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CalibrationType {
    Linear { slope: f64, offset: f64 },
    Polynomial { coefficients: Vec<f64> },
    LookupTable { points: Vec<(f64, f64)> },
    Custom { function_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub calibration: CalibrationType,
    pub calibrated_at: chrono::DateTime<chrono::Utc>,
    pub calibrated_by: String,
    pub reference_values: Vec<f64>,
    pub measured_values: Vec<f64>,
}

impl CalibrationRecord {
    /// Apply this calibration to a raw numeric value.
    ///
    /// Returns an error when the record is missing required parameters
    /// (lookup with <2 distinct keys, linear without both slope/offset).
    /// Callers must keep the raw value in place on error rather than halt.
    pub fn apply(&self, raw: f64, sensor_id: i64, field: &str) -> Result<f64, PipelineError> {
        match &self.calibration {
            CalibrationType::Linear { slope, offset } => Ok(raw * slope + offset),
            CalibrationType::Polynomial { coefficients } => {
                if coefficients.is_empty() {
                    return Err(PipelineError::CalibrationFailed {
                        sensor_id,
                        field: field.to_string(),
                        reason: "polynomial calibration has no coefficients".into(),
                    });
                }
                let mut result = 0.0;
                let mut power = 1.0;
                for c in coefficients {
                    result += c * power;
                    power *= raw;
                }
                Ok(result)
            }
            CalibrationType::LookupTable { points } => {
                if points.len() < 2 {
                    return Err(PipelineError::CalibrationFailed {
                        sensor_id,
                        field: field.to_string(),
                        reason: "lookup table requires at least two distinct raw keys".into(),
                    });
                }
                let mut sorted = points.clone();
                sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
                Ok(interpolate(&sorted, raw))
            }
            CalibrationType::Custom { function_id } => Err(PipelineError::CalibrationFailed {
                sensor_id,
                field: field.to_string(),
                reason: format!("custom calibration function '{function_id}' not registered"),
            }),
        }
    }
}

/// Linear interpolation between adjacent keys; clamps to nearest endpoint
/// outside the key range.
fn interpolate(sorted_points: &[(f64, f64)], raw: f64) -> f64 {
    if raw <= sorted_points[0].0 {
        return sorted_points[0].1;
    }
    if raw >= sorted_points[sorted_points.len() - 1].0 {
        return sorted_points[sorted_points.len() - 1].1;
    }
    for window in sorted_points.windows(2) {
        let (x0, y0) = window[0];
        let (x1, y1) = window[1];
        if raw >= x0 && raw <= x1 {
            if (x1 - x0).abs() < f64::EPSILON {
                return y0;
            }
            let t = (raw - x0) / (x1 - x0);
            return y0 + t * (y1 - y0);
        }
    }
    sorted_points[sorted_points.len() - 1].1
}
