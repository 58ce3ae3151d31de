//! End-to-end scenarios exercising the full registry -> pipeline ->
//! arbitrator -> router/broadcast/event-bus wiring together, rather than a
//! single module in isolation. Scenario lettering follows the spec's
//! testable end-to-end properties (A: first observation from an unknown
//! Zigbee friendly name, B: unregistered SYSGrow discovery, C: primary
//! replacement on staleness, D: multichannel soil aggregation, E:
//! calibration, F: eviction under the tracked-sensor ceiling).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use sysgrow_sensor_core::core::application::arbitrator::{ArbitratorConfig, PriorityArbitrator};
use sysgrow_sensor_core::core::application::registry::SensorRegistry;
use sysgrow_sensor_core::core::application::Pipeline;
use sysgrow_sensor_core::core::domain::calibration::{CalibrationRecord, CalibrationType};
use sysgrow_sensor_core::core::domain::sensor::{Protocol, Sensor, SensorCategory, SensorConfig};
use sysgrow_sensor_core::infrastructure::broadcast::{BroadcastSink, InMemoryTransport};
use sysgrow_sensor_core::infrastructure::config::MqttConfig;
use sysgrow_sensor_core::infrastructure::event_bus::EventBus;
use sysgrow_sensor_core::infrastructure::mqtt_router::MqttRouter;

fn env_sensor(id: i64, unit_id: i64, name: &str, primary: &[&str]) -> Sensor {
    Sensor {
        id,
        unit_id,
        name: name.to_string(),
        category: SensorCategory::Environmental,
        protocol: Protocol::Zigbee2mqtt,
        model: "generic".into(),
        config: SensorConfig {
            zigbee_friendly_name: Some(name.to_string()),
            primary_metrics: primary.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
            ..Default::default()
        },
        calibration: None,
    }
}

fn plant_sensor(id: i64, unit_id: i64, name: &str) -> Sensor {
    Sensor {
        id,
        unit_id,
        name: name.to_string(),
        category: SensorCategory::Plant,
        protocol: Protocol::Zigbee2mqtt,
        model: "generic".into(),
        config: SensorConfig {
            zigbee_friendly_name: Some(name.to_string()),
            ..Default::default()
        },
        calibration: None,
    }
}

fn mqtt_config() -> MqttConfig {
    MqttConfig {
        broker_host: "localhost".into(),
        broker_port: 1883,
        client_id: "e2e".into(),
        username: None,
        password: None,
        keep_alive_seconds: 30,
        identity_cache_ttl_seconds: 300,
        identity_cache_max_entries: 256,
        unknown_device_log_cooldown_seconds: 600,
    }
}

fn router_stack() -> Arc<MqttRouter> {
    let registry = Arc::new(SensorRegistry::new());
    let arbitrator = Arc::new(PriorityArbitrator::new(ArbitratorConfig::default(), registry.clone()));
    let pipeline = Arc::new(Pipeline::new(registry, arbitrator));
    let broadcast = Arc::new(BroadcastSink::new(Box::new(InMemoryTransport::new())));
    let event_bus = Arc::new(EventBus::new());
    MqttRouter::new(pipeline, broadcast, event_bus, mqtt_config())
}

/// Scenario A: a never-before-seen Zigbee friendly name that IS registered
/// produces a dashboard snapshot on first observation.
#[test]
fn scenario_a_zigbee_first_observation_builds_a_snapshot() {
    let router = router_stack();
    let sensor = env_sensor(1, 100, "greenhouse_env_1", &["temperature", "humidity"]);
    router.pipeline().registry().register(sensor);

    router.on_message("zigbee2mqtt/greenhouse_env_1", json!({"temperature": 24.1, "humidity": 58.0}).to_string().as_bytes());

    let snapshot = router.pipeline().arbitrator().snapshot(100, Utc::now()).expect("snapshot for unit 100");
    assert!(snapshot.metrics.contains_key("temperature"));
    assert_eq!(router.stats().unregistered, 0);
}

/// Scenario B: a SYSGrow device with no friendly-name or MAC match emits an
/// unregistered discovery payload scoped to unit_id 0 (no room), never
/// silently adopted into a per-unit room.
#[test]
fn scenario_b_unregistered_sysgrow_device_discovery() {
    let router = router_stack();
    router.on_message(
        "sysgrow/unit_9_soil_node",
        json!({"soil_moisture": 42.0, "mac_address": "11:22:33:44:55:66"}).to_string().as_bytes(),
    );

    let stats = router.stats();
    assert_eq!(stats.unregistered, 1);
    assert_eq!(stats.dropped_invalid_unit, 0);
}

/// Scenario C: the elected primary for a metric goes stale beyond the
/// configured bound and a fresher secondary sensor takes over the election.
#[test]
fn scenario_c_primary_replacement_on_staleness() {
    let registry = Arc::new(SensorRegistry::new());
    let config = ArbitratorConfig { stale_seconds: 30, max_tracked_sensors: 500 };
    let arbitrator = Arc::new(PriorityArbitrator::new(config, registry.clone()));
    let pipeline = Pipeline::new(registry.clone(), arbitrator.clone());

    let primary_sensor = env_sensor(1, 50, "primary_temp", &["temperature"]);
    let backup_sensor = env_sensor(2, 50, "backup_temp", &[]);
    registry.register(primary_sensor.clone());
    registry.register(backup_sensor.clone());

    let t0 = Utc::now();
    pipeline.process(&primary_sensor, &json!({"temperature": 20.0}), t0).unwrap();

    let snapshot = arbitrator.snapshot(50, t0).unwrap();
    assert_eq!(snapshot.metrics["temperature"].source.sensor_id, 1);

    // The primary goes silent; the backup keeps reporting well past the
    // staleness bound, so it should be elected on its next ingest.
    let t1 = t0 + Duration::seconds(90);
    pipeline.process(&backup_sensor, &json!({"temperature": 19.5}), t1).unwrap();

    let snapshot = arbitrator.snapshot(50, t1).unwrap();
    assert_eq!(snapshot.metrics["temperature"].source.sensor_id, 2);
}

/// Scenario D: soil-moisture channels from multiple sensors in a unit
/// aggregate to a mean under the synthetic `sensor_id = 0` source.
#[test]
fn scenario_d_multichannel_soil_moisture_aggregates() {
    let registry = Arc::new(SensorRegistry::new());
    let arbitrator = Arc::new(PriorityArbitrator::new(ArbitratorConfig::default(), registry.clone()));
    let pipeline = Pipeline::new(registry.clone(), arbitrator.clone());

    let probe_a = plant_sensor(10, 60, "soil_probe_a");
    let probe_b = plant_sensor(11, 60, "soil_probe_b");
    registry.register(probe_a.clone());
    registry.register(probe_b.clone());

    let now = Utc::now();
    pipeline.process(&probe_a, &json!({"soil_moisture": 30.0}), now).unwrap();
    pipeline.process(&probe_b, &json!({"soil_moisture": 70.0}), now).unwrap();

    let snapshot = arbitrator.snapshot(60, now).unwrap();
    let soil = &snapshot.metrics["soil_moisture"];
    assert!((soil.value - 50.0).abs() < 1e-9);
    assert_eq!(soil.source.sensor_id, 0);
}

/// Scenario E: a linear calibration offset shifts the reported value and
/// the device payload records that calibration was applied.
#[test]
fn scenario_e_calibration_shifts_the_reported_value() {
    let registry = Arc::new(SensorRegistry::new());
    let arbitrator = Arc::new(PriorityArbitrator::new(ArbitratorConfig::default(), registry.clone()));
    let pipeline = Pipeline::new(registry.clone(), arbitrator);

    let mut sensor = env_sensor(20, 70, "calibrated_temp", &["temperature"]);
    sensor.calibration = Some(CalibrationRecord {
        calibration: CalibrationType::Linear { slope: 1.0, offset: 1.5 },
        calibrated_at: Utc::now(),
        calibrated_by: "test-fixture".into(),
        reference_values: vec![],
        measured_values: vec![],
    });
    registry.register(sensor.clone());

    let outcome = pipeline.process(&sensor, &json!({"temperature": 20.0}), Utc::now()).unwrap();
    let payload = outcome.device_payload.expect("device payload expected");
    assert!(payload.calibration_applied);
    assert!((payload.readings["temperature"] - 21.5).abs() < 1e-9);
}

/// Scenario F: once the tracked-sensor ceiling is exceeded, entries stale
/// beyond twice the configured bound are purged from arbitrator state.
#[test]
fn scenario_f_eviction_past_the_tracked_sensor_ceiling() {
    let registry = Arc::new(SensorRegistry::new());
    let config = ArbitratorConfig { stale_seconds: 10, max_tracked_sensors: 10 };
    let arbitrator = PriorityArbitrator::new(config, registry.clone());

    let t0 = Utc::now();
    for id in 1..=10 {
        let sensor = env_sensor(id, 80 + id, &format!("sensor_{id}"), &[]);
        registry.register(sensor.clone());
        let reading = build_reading(&sensor, t0);
        arbitrator.ingest(&sensor, &reading, None, t0);
    }

    // An 11th ingest, well past 2x stale_seconds later, pushes the tracked
    // count over the ceiling and triggers the stale purge.
    let eleventh = env_sensor(11, 91, "sensor_11", &[]);
    registry.register(eleventh.clone());
    let t1 = t0 + Duration::seconds(30);
    let reading = build_reading(&eleventh, t1);
    arbitrator.ingest(&eleventh, &reading, None, t1);

    assert!(arbitrator.stats().evictions > 0);
}

fn build_reading(sensor: &Sensor, now: chrono::DateTime<Utc>) -> sysgrow_sensor_core::core::domain::reading::Reading {
    use sysgrow_sensor_core::core::domain::reading::{Reading, ReadingStatus};
    use std::collections::BTreeMap;

    let mut data = BTreeMap::new();
    data.insert("temperature".to_string(), 21.0);
    Reading {
        sensor_id: sensor.id,
        unit_id: sensor.unit_id,
        category: sensor.category,
        sensor_name: sensor.name.clone(),
        data,
        timestamp: now,
        status: ReadingStatus::Success,
        quality_score: None,
        is_anomaly: false,
        anomaly_reason: None,
        calibration_applied: false,
    }
}
