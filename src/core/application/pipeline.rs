//! C6 — Pipeline orchestrator.
//!
//! Runs canonicalize → validate → calibrate → transform → enrich for a single
//! inbound reading, then asks the registry for sensor identity context and the
//! arbitrator (C7) for the refreshed dashboard snapshot, and finally builds
//! the outbound device payload and any gated/ungated controller events.
//!
//! Grounded on
//! `original_source/app/hardware/sensors/processors/composite_processor.py`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::application::arbitrator::PriorityArbitrator;
use crate::core::application::calibrator::apply_calibration;
use crate::core::application::canonicalizer::{default_meta_keys, standardize_fields};
use crate::core::application::enricher::{enrich_derived_metrics, quality_score};
use crate::core::application::registry::SensorRegistry;
use crate::core::application::transformer::transform;
use crate::core::application::validator::{expected_fields, validate};
use crate::core::domain::errors::PipelineError;
use crate::core::domain::metrics::{is_meta_key, unit_for_metric};
use crate::core::domain::payloads::{infer_power_source, ControllerEvent, DashboardSnapshot, DevicePayload, SCHEMA_VERSION};
use crate::core::domain::reading::Reading;
use crate::core::domain::sensor::{Sensor, SensorCategory};
use crate::core::domain::value::{decode_payload, Value};

/// Stable internal event names, published on the event bus (C12).
pub mod event_names {
    pub const TEMPERATURE_UPDATE: &str = "sensor.temperature_update";
    pub const HUMIDITY_UPDATE: &str = "sensor.humidity_update";
    pub const CO2_UPDATE: &str = "sensor.co2_update";
    pub const VOC_UPDATE: &str = "sensor.voc_update";
    pub const LIGHT_UPDATE: &str = "sensor.light_update";
    pub const PRESSURE_UPDATE: &str = "sensor.pressure_update";
    pub const SOIL_MOISTURE_UPDATE: &str = "sensor.soil_moisture_update";
    pub const PH_UPDATE: &str = "sensor.ph_update";
    pub const EC_UPDATE: &str = "sensor.ec_update";
    pub const SENSOR_CREATED: &str = "device.sensor_created";
    pub const SENSOR_DELETED: &str = "device.sensor_deleted";
    pub const AVAILABILITY_CHANGED: &str = "device.availability_changed";
    pub const BRIDGE_INFO: &str = "device.bridge_info";
    pub const BRIDGE_HEALTH: &str = "device.bridge_health";
    pub const BRIDGE_RESPONSE: &str = "device.bridge_response";
}

pub struct ProcessOutcome {
    pub reading: Reading,
    pub device_payload: Option<DevicePayload>,
    pub snapshot: DashboardSnapshot,
    pub controller_events: Vec<ControllerEvent>,
    pub warnings: Vec<String>,
}

pub struct Pipeline {
    registry: Arc<SensorRegistry>,
    arbitrator: Arc<PriorityArbitrator>,
}

impl Pipeline {
    pub fn new(registry: Arc<SensorRegistry>, arbitrator: Arc<PriorityArbitrator>) -> Self {
        Self { registry, arbitrator }
    }

    pub fn registry(&self) -> &Arc<SensorRegistry> {
        &self.registry
    }

    pub fn arbitrator(&self) -> &Arc<PriorityArbitrator> {
        &self.arbitrator
    }

    /// Run the full C1-C5 pipeline for a single inbound payload, ingest the
    /// result into the arbitrator, and assemble the outbound payloads.
    pub fn process(&self, sensor: &Sensor, raw: &serde_json::Value, now: DateTime<Utc>) -> Result<ProcessOutcome, PipelineError> {
        let decoded = decode_payload(raw).ok_or_else(|| PipelineError::PayloadDecode {
            topic: String::new(),
            reason: "payload body is not a JSON object".into(),
        })?;

        let mut data = standardize_fields(&decoded, &default_meta_keys());
        let warnings = validate(&data, sensor.category, sensor.id)?;
        apply_calibration(&mut data, sensor.calibration.as_ref(), sensor.id);

        let mut reading = transform(&data, sensor, now);
        enrich_derived_metrics(&mut reading);

        let expected = expected_fields(sensor.category);
        let present = expected.iter().filter(|m| reading.data.contains_key(**m)).count();
        let battery = reading.data.get("battery").map(|v| *v as i64);
        let linkquality = reading.data.get("linkquality").map(|v| *v as i64);
        let has_error = reading.has_error();
        reading.quality_score = Some(quality_score(&reading, expected.len(), present, battery, linkquality, has_error));

        let soil_channels = extract_soil_channels(&data);
        let snapshot = self.arbitrator.ingest(sensor, &reading, soil_channels, now);

        let device_payload = build_device_payload(sensor, &reading, battery, linkquality);
        let controller_events = self.build_controller_events(sensor, &reading);

        Ok(ProcessOutcome {
            reading,
            device_payload,
            snapshot,
            controller_events,
            warnings,
        })
    }

    fn build_controller_events(&self, sensor: &Sensor, reading: &Reading) -> Vec<ControllerEvent> {
        let unit_id = sensor.unit_id;
        let gated = |metric: &str| {
            self.arbitrator
                .is_primary_metric(unit_id, metric, sensor.id, sensor.config.declares_primary(metric))
        };
        let has = |k: &str| reading.data.contains_key(k);
        let mut events = Vec::new();

        if has("temperature") && gated("temperature") {
            let mut values = BTreeMap::new();
            values.insert("temperature".to_string(), reading.data["temperature"]);
            for extra in ["humidity", "vpd", "dew_point", "heat_index"] {
                if let Some(&v) = reading.data.get(extra) {
                    values.insert(extra.to_string(), v);
                }
            }
            events.push(ControllerEvent {
                name: event_names::TEMPERATURE_UPDATE,
                unit_id,
                sensor_id: sensor.id,
                timestamp: reading.timestamp,
                values,
            });
        } else if has("humidity") && gated("humidity") {
            let mut values = BTreeMap::new();
            values.insert("humidity".to_string(), reading.data["humidity"]);
            events.push(ControllerEvent {
                name: event_names::HUMIDITY_UPDATE,
                unit_id,
                sensor_id: sensor.id,
                timestamp: reading.timestamp,
                values,
            });
        }

        if has("co2") && gated("co2") {
            let mut values = BTreeMap::new();
            values.insert("co2".to_string(), reading.data["co2"]);
            if let Some(&v) = reading.data.get("voc") {
                values.insert("voc".to_string(), v);
            }
            events.push(ControllerEvent {
                name: event_names::CO2_UPDATE,
                unit_id,
                sensor_id: sensor.id,
                timestamp: reading.timestamp,
                values,
            });
        } else if has("voc") && gated("voc") {
            let mut values = BTreeMap::new();
            values.insert("voc".to_string(), reading.data["voc"]);
            events.push(ControllerEvent {
                name: event_names::VOC_UPDATE,
                unit_id,
                sensor_id: sensor.id,
                timestamp: reading.timestamp,
                values,
            });
        }

        if has("lux") && gated("lux") {
            events.push(single_metric_event(event_names::LIGHT_UPDATE, unit_id, sensor.id, reading, "lux"));
        }
        if has("pressure") && gated("pressure") {
            events.push(single_metric_event(event_names::PRESSURE_UPDATE, unit_id, sensor.id, reading, "pressure"));
        }

        // Plant-channel metrics are never gated: every sensor reporting them
        // fans its own event out, regardless of arbitration state.
        if has("soil_moisture") {
            events.push(single_metric_event(
                event_names::SOIL_MOISTURE_UPDATE,
                unit_id,
                sensor.id,
                reading,
                "soil_moisture",
            ));
        }
        if has("ph") {
            events.push(single_metric_event(event_names::PH_UPDATE, unit_id, sensor.id, reading, "ph"));
        }
        if has("ec") {
            events.push(single_metric_event(event_names::EC_UPDATE, unit_id, sensor.id, reading, "ec"));
        }

        events
    }
}

fn single_metric_event(name: &'static str, unit_id: i64, sensor_id: i64, reading: &Reading, metric: &str) -> ControllerEvent {
    let mut values = BTreeMap::new();
    values.insert(metric.to_string(), reading.data[metric]);
    ControllerEvent {
        name,
        unit_id,
        sensor_id,
        timestamp: reading.timestamp,
        values,
    }
}

fn extract_soil_channels(data: &BTreeMap<String, Value>) -> Option<Vec<f64>> {
    match data.get("soil_moisture") {
        Some(Value::ListOfObject(items)) => {
            let values: Vec<f64> = items
                .iter()
                .filter_map(|obj| obj.get("moisture_percentage").or_else(|| obj.get("value")).and_then(Value::as_f64))
                .collect();
            if values.is_empty() {
                None
            } else {
                Some(values)
            }
        }
        _ => None,
    }
}

fn build_device_payload(sensor: &Sensor, reading: &Reading, battery: Option<i64>, linkquality: Option<i64>) -> Option<DevicePayload> {
    if sensor.unit_id <= 0 || sensor.id <= 0 {
        return None;
    }
    let readings: BTreeMap<String, f64> = reading
        .data
        .iter()
        .filter(|(k, _)| !is_meta_key(k))
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    if readings.is_empty() {
        return None;
    }
    let units = readings.keys().map(|k| (k.clone(), unit_for_metric(k).to_string())).collect();

    Some(DevicePayload {
        schema_version: SCHEMA_VERSION,
        sensor_id: sensor.id,
        unit_id: sensor.unit_id,
        sensor_name: sensor.name.clone(),
        sensor_type: match sensor.category {
            SensorCategory::Environmental => "environmental".to_string(),
            SensorCategory::Plant => "plant".to_string(),
        },
        readings,
        units,
        status: reading.status.as_wire_str().to_string(),
        timestamp: reading.timestamp,
        battery,
        power_source: infer_power_source(battery),
        linkquality,
        quality_score: reading.quality_score,
        is_anomaly: reading.is_anomaly,
        anomaly_reason: reading.anomaly_reason.clone(),
        calibration_applied: reading.calibration_applied,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::application::arbitrator::ArbitratorConfig;
    use crate::core::domain::sensor::{Protocol, SensorConfig};
    use serde_json::json;
    use std::collections::HashSet;

    fn env_sensor(id: i64, unit_id: i64, primary: &[&str]) -> Sensor {
        Sensor {
            id,
            unit_id,
            name: format!("env_{id}"),
            category: SensorCategory::Environmental,
            protocol: Protocol::Zigbee2mqtt,
            model: "generic".into(),
            config: SensorConfig {
                primary_metrics: primary.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
                ..Default::default()
            },
            calibration: None,
        }
    }

    fn plant_sensor(id: i64, unit_id: i64) -> Sensor {
        Sensor {
            id,
            unit_id,
            name: format!("plant_{id}"),
            category: SensorCategory::Plant,
            protocol: Protocol::Zigbee2mqtt,
            model: "generic".into(),
            config: SensorConfig::default(),
            calibration: None,
        }
    }

    fn pipeline() -> Pipeline {
        let registry = Arc::new(SensorRegistry::new());
        let arbitrator = Arc::new(PriorityArbitrator::new(ArbitratorConfig::default(), registry.clone()));
        Pipeline::new(registry, arbitrator)
    }

    #[test]
    fn end_to_end_temperature_reading_builds_payload_and_gated_event() {
        let pipeline = pipeline();
        let sensor = env_sensor(1, 10, &["temperature", "humidity"]);
        pipeline.registry().register(sensor.clone());

        let raw = json!({"temperature": 22.5, "humidity": 55.0, "battery": 90, "linkquality": 200});
        let outcome = pipeline.process(&sensor, &raw, Utc::now()).unwrap();

        let payload = outcome.device_payload.expect("payload expected");
        assert_eq!(payload.readings["temperature"], 22.5);
        assert!(payload.readings.contains_key("vpd"));
        assert!(outcome.controller_events.iter().any(|e| e.name == event_names::TEMPERATURE_UPDATE));
        assert!(outcome.snapshot.metrics.contains_key("temperature"));
    }

    #[test]
    fn error_field_halts_before_arbitrator_ingest() {
        let pipeline = pipeline();
        let sensor = env_sensor(2, 10, &[]);
        pipeline.registry().register(sensor.clone());

        let raw = json!({"error": "sensor fault"});
        let result = pipeline.process(&sensor, &raw, Utc::now());
        assert!(matches!(result, Err(PipelineError::DataInvalid { .. })));
        assert_eq!(pipeline.arbitrator().stats().ingest_count, 0);
    }

    #[test]
    fn multichannel_soil_moisture_feeds_arbitrator_aggregate() {
        let pipeline = pipeline();
        let sensor = plant_sensor(3, 20);
        pipeline.registry().register(sensor.clone());

        let raw = json!({
            "soil_moisture": [
                {"moisture_percentage": 40.0},
                {"moisture_percentage": 60.0}
            ]
        });
        let outcome = pipeline.process(&sensor, &raw, Utc::now()).unwrap();
        let soil = outcome.snapshot.metrics.get("soil_moisture").expect("soil metric present");
        assert!((soil.value - 50.0).abs() < 1e-9);
        assert_eq!(soil.source.sensor_id, 0);
    }

    #[test]
    fn device_payload_dropped_for_unassigned_unit() {
        let pipeline = pipeline();
        let mut sensor = env_sensor(4, 0, &[]);
        sensor.id = 0;
        let raw = json!({"temperature": 21.0});
        let outcome = pipeline.process(&sensor, &raw, Utc::now()).unwrap();
        assert!(outcome.device_payload.is_none());
    }
}
