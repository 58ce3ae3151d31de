//! The immutable reading value produced by the transformer (C4) and refined
//! by the enricher (C5).
//!
//! Grounded on `original_source/app/domain/sensors/reading.py`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::domain::sensor::SensorCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingStatus {
    Success,
    Warning,
    Error,
    Mock,
}

impl ReadingStatus {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            ReadingStatus::Success => "success",
            ReadingStatus::Warning => "warning",
            ReadingStatus::Error => "error",
            ReadingStatus::Mock => "mock",
        }
    }
}

/// A processed, immutable sensor reading. The enrichment step never mutates
/// an existing `Reading`; it returns a new one with derived fields added.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub sensor_id: i64,
    pub unit_id: i64,
    pub category: SensorCategory,
    pub sensor_name: String,
    pub data: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
    pub status: ReadingStatus,
    pub quality_score: Option<f64>,
    pub is_anomaly: bool,
    pub anomaly_reason: Option<String>,
    pub calibration_applied: bool,
}

impl Reading {
    pub fn has_error(&self) -> bool {
        matches!(self.status, ReadingStatus::Error)
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.data.get(metric).copied()
    }
}
