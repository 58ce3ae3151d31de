//! C3 — Calibrator.
//!
//! Grounded on
//! `original_source/app/hardware/sensors/processors/calibration_processor.py`.

use std::collections::BTreeMap;

use crate::core::domain::calibration::CalibrationRecord;
use crate::core::domain::value::Value;
use tracing::warn;

/// Metrics eligible for calibration application.
const CALIBRATABLE_FIELDS: &[&str] = &[
    "temperature",
    "humidity",
    "soil_moisture",
    "co2",
    "voc",
    "ec",
    "ph",
    "pressure",
    "lux",
];

/// Apply a sensor's calibration record, if any, to its calibratable numeric
/// fields. A calibration error for one field is logged and leaves the raw
/// value untouched; it never halts the pipeline.
pub fn apply_calibration(
    data: &mut BTreeMap<String, Value>,
    calibration: Option<&CalibrationRecord>,
    sensor_id: i64,
) {
    let Some(calibration) = calibration else {
        return;
    };

    for field in CALIBRATABLE_FIELDS {
        let Some(raw) = data.get(*field).and_then(Value::as_f64) else {
            continue;
        };
        match calibration.apply(raw, sensor_id, field) {
            Ok(calibrated) => {
                data.insert(field.to_string(), Value::Number(calibrated));
            }
            Err(err) => {
                warn!(sensor_id, field = *field, error = %err, "calibration failed, keeping raw value");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::calibration::CalibrationType;

    fn linear_record(slope: f64, offset: f64) -> CalibrationRecord {
        CalibrationRecord {
            calibration: CalibrationType::Linear { slope, offset },
            calibrated_at: chrono::Utc::now(),
            calibrated_by: "test".into(),
            reference_values: vec![],
            measured_values: vec![],
        }
    }

    #[test]
    fn applies_calibration_to_present_numeric_field() {
        let mut data = BTreeMap::new();
        data.insert("temperature".to_string(), Value::Number(20.0));
        let record = linear_record(1.02, -0.5);
        apply_calibration(&mut data, Some(&record), 12);
        assert!((data["temperature"].as_f64().unwrap() - 19.9).abs() < 1e-9);
    }

    #[test]
    fn leaves_raw_value_on_calibration_failure() {
        let mut data = BTreeMap::new();
        data.insert("ph".to_string(), Value::Number(7.0));
        let record = CalibrationRecord {
            calibration: CalibrationType::LookupTable { points: vec![(0.0, 0.0)] },
            calibrated_at: chrono::Utc::now(),
            calibrated_by: "test".into(),
            reference_values: vec![],
            measured_values: vec![],
        };
        apply_calibration(&mut data, Some(&record), 1);
        assert_eq!(data["ph"].as_f64(), Some(7.0));
    }

    #[test]
    fn no_calibration_record_is_a_no_op() {
        let mut data = BTreeMap::new();
        data.insert("temperature".to_string(), Value::Number(20.0));
        apply_calibration(&mut data, None, 1);
        assert_eq!(data["temperature"].as_f64(), Some(20.0));
    }
}
