//! C4 — Transformer.
//!
//! Grounded on
//! `original_source/app/hardware/sensors/processors/transformation_processor.py::transform`.

use std::collections::BTreeMap;

use crate::core::domain::reading::{Reading, ReadingStatus};
use crate::core::domain::sensor::Sensor;
use crate::core::domain::value::Value;

/// Produce the immutable reading from a calibrated data map.
pub fn transform(data: &BTreeMap<String, Value>, sensor: &Sensor, now: chrono::DateTime<chrono::Utc>) -> Reading {
    let status = determine_status(data);
    let numeric: BTreeMap<String, f64> = data
        .iter()
        .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
        .collect();

    Reading {
        sensor_id: sensor.id,
        unit_id: sensor.unit_id,
        category: sensor.category,
        sensor_name: sensor.name.clone(),
        data: numeric,
        timestamp: now,
        status,
        quality_score: None,
        is_anomaly: false,
        anomaly_reason: None,
        calibration_applied: sensor.has_calibration(),
    }
}

fn determine_status(data: &BTreeMap<String, Value>) -> ReadingStatus {
    if data.contains_key("error") {
        return ReadingStatus::Error;
    }
    if data.get("status").and_then(Value::as_str) == Some("MOCK") {
        return ReadingStatus::Mock;
    }
    if data.get("battery").and_then(Value::as_f64).is_some_and(|b| b < 20.0) {
        return ReadingStatus::Warning;
    }
    if data
        .get("linkquality")
        .and_then(Value::as_f64)
        .is_some_and(|l| l < 50.0)
    {
        return ReadingStatus::Warning;
    }
    ReadingStatus::Success
}
