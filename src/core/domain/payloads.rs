//! Outbound payload shapes: device payload, dashboard snapshot, unregistered
//! device discovery payload, and internal controller events.
//!
//! Grounded on spec §3 and §6, and on
//! `original_source/app/hardware/sensors/processors/composite_processor.py`
//! (`_build_device_payload`, `_build_controller_events`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSource {
    Battery,
    Mains,
    Unknown,
}

/// Infer power source from presence of a battery reading, mirroring the
/// reference `infer_power_source` helper.
pub fn infer_power_source(battery: Option<i64>) -> PowerSource {
    match battery {
        Some(_) => PowerSource::Battery,
        None => PowerSource::Unknown,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicePayload {
    pub schema_version: u32,
    pub sensor_id: i64,
    pub unit_id: i64,
    pub sensor_name: String,
    pub sensor_type: String,
    pub readings: BTreeMap<String, f64>,
    pub units: BTreeMap<String, String>,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub battery: Option<i64>,
    pub power_source: PowerSource,
    pub linkquality: Option<i64>,
    pub quality_score: Option<f64>,
    pub is_anomaly: bool,
    pub anomaly_reason: Option<String>,
    pub calibration_applied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSource {
    pub sensor_id: i64,
    pub sensor_name: Option<String>,
    pub sensor_type: String,
    pub protocol: Option<String>,
    pub battery: Option<i64>,
    pub power_source: PowerSource,
    pub linkquality: Option<i64>,
    pub quality_score: Option<f64>,
    pub status: String,
    pub is_anomaly: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetric {
    pub value: f64,
    pub unit: String,
    pub trend: Trend,
    pub trend_delta: Option<f64>,
    pub source: SnapshotSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub schema_version: u32,
    pub unit_id: i64,
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, SnapshotMetric>,
    /// When this snapshot was computed; used to bound staleness from the
    /// TTL cache (testable property #10).
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisteredDevicePayload {
    pub schema_version: u32,
    pub unit_id: i64,
    pub publisher_id: String,
    pub topic: String,
    pub friendly_name: String,
    pub registered: bool,
    pub timestamp: DateTime<Utc>,
    pub raw_data: serde_json::Value,
    pub suggested_sensor_type: Option<String>,
    pub detected_capabilities: Vec<String>,
}

/// A stable-named internal controller event body. Event names live in
/// `core::application::pipeline::event_names`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerEvent {
    pub name: &'static str,
    pub unit_id: i64,
    pub sensor_id: i64,
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}
