//! C8 — MQTT router.
//!
//! Subscribes to the Zigbee2MQTT and SYSGrow topic trees, resolves inbound
//! messages to a registered sensor, and drives them through the pipeline
//! (C1-C7). A single execution path handles every message; nothing thrown
//! out of the callback is allowed to kill the event loop, so every branch
//! returns a `PipelineResult` that the caller logs and counts instead of
//! propagating.
//!
//! Grounded on
//! `original_source/app/services/hardware/mqtt_sensor_service.py` for the
//! topic dispatch table and the mac-address candidate-name derivation, and
//! on `infrastructure::tools::mqtt_tool` for the rumqttc connect/event-loop
//! idiom.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use rumqttc::{AsyncClient, Event as MqttEvent, MqttOptions, Packet, QoS};
use tracing::{debug, error, info, warn};

use crate::core::application::pipeline::{event_names, Pipeline};
use crate::core::application::registry::RegistryEvent;
use crate::core::domain::errors::PipelineError;
use crate::core::domain::metrics::CANONICAL_METRICS;
use crate::core::domain::payloads::{UnregisteredDevicePayload, SCHEMA_VERSION};
use crate::core::domain::sensor::Sensor;
use crate::infrastructure::broadcast::BroadcastSink;
use crate::infrastructure::config::MqttConfig;
use crate::infrastructure::event_bus::{Event as BusEvent, EventBus};

const SUBSCRIBE_TOPICS: &[&str] = &[
    "zigbee2mqtt/+",
    "zigbee2mqtt/+/availability",
    "zigbee2mqtt/bridge/#",
    "sysgrow/+",
    "sysgrow/+/availability",
    "sysgrow/bridge/#",
];

struct CachedIdentity {
    sensor_id: i64,
    at: Instant,
}

#[derive(Debug, Default)]
pub struct MqttRouterStats {
    pub messages_received: u64,
    pub invalid_payload: u64,
    pub unregistered: u64,
    pub dropped_invalid_unit: u64,
    pub processing_errors: HashMap<&'static str, u64>,
    pub emit_errors: u64,
}

#[derive(Default)]
struct StatsInner {
    messages_received: AtomicU64,
    invalid_payload: AtomicU64,
    unregistered: AtomicU64,
    dropped_invalid_unit: AtomicU64,
    processing_errors: Mutex<HashMap<&'static str, u64>>,
}

/// Dispatches inbound MQTT traffic to the processing pipeline, maintaining
/// the resolved-identity cache and the unknown-device log cooldown.
pub struct MqttRouter {
    pipeline: Arc<Pipeline>,
    broadcast: Arc<BroadcastSink>,
    event_bus: Arc<EventBus>,
    config: MqttConfig,
    identity_cache: Mutex<HashMap<String, CachedIdentity>>,
    unknown_log_cooldown: Mutex<HashMap<String, Instant>>,
    availability: Mutex<HashMap<i64, bool>>,
    stats: StatsInner,
}

impl MqttRouter {
    pub fn new(pipeline: Arc<Pipeline>, broadcast: Arc<BroadcastSink>, event_bus: Arc<EventBus>, config: MqttConfig) -> Arc<Self> {
        let router = Arc::new(Self {
            pipeline,
            broadcast,
            event_bus,
            config,
            identity_cache: Mutex::new(HashMap::new()),
            unknown_log_cooldown: Mutex::new(HashMap::new()),
            availability: Mutex::new(HashMap::new()),
            stats: StatsInner::default(),
        });
        router.wire_registry_invalidation();
        router
    }

    /// Invalidate the identity cache and the arbitrator's election state on
    /// any sensor create/delete so stale mappings never survive a rename or
    /// removal.
    fn wire_registry_invalidation(self: &Arc<Self>) {
        let router = Arc::clone(self);
        self.pipeline.registry().on_event(move |event| {
            router.identity_cache.lock().unwrap().clear();
            router.pipeline.arbitrator().clear_all();
            match event {
                RegistryEvent::SensorCreated { sensor_id } => {
                    router.event_bus.publish(BusEvent::SensorCreated { sensor_id });
                }
                RegistryEvent::SensorDeleted { sensor_id } => {
                    router.event_bus.publish(BusEvent::SensorDeleted { sensor_id });
                }
            }
        });
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn stats(&self) -> MqttRouterStats {
        MqttRouterStats {
            messages_received: self.stats.messages_received.load(Ordering::Relaxed),
            invalid_payload: self.stats.invalid_payload.load(Ordering::Relaxed),
            unregistered: self.stats.unregistered.load(Ordering::Relaxed),
            dropped_invalid_unit: self.stats.dropped_invalid_unit.load(Ordering::Relaxed),
            processing_errors: self.stats.processing_errors.lock().unwrap().clone(),
            emit_errors: self.broadcast.emit_errors(),
        }
    }

    /// Connect to the broker, subscribe to the fixed topic set, and spawn
    /// the event-loop task. Returns once the initial connection has been
    /// established; message handling continues on the spawned task.
    pub async fn connect(self: &Arc<Self>) -> anyhow::Result<AsyncClient> {
        let mut options = MqttOptions::new(self.config.client_id.clone(), self.config.broker_host.clone(), self.config.broker_port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_seconds));
        options.set_clean_session(true);
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user.clone(), pass.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        for topic in SUBSCRIBE_TOPICS {
            client.subscribe(*topic, QoS::AtLeastOnce).await?;
            debug!(topic, "subscribed to mqtt topic");
        }

        let router = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                        router.on_message(&publish.topic, &publish.payload);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!(error = %err, "mqtt event loop error");
                        router.record_error("transport_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(client)
    }

    /// Single entry point for every inbound publish. Never panics or
    /// returns an error to the caller; logs and counts instead.
    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.dispatch(topic, payload) {
            warn!(topic, kind = err.kind(), error = %err, "router processing error");
            self.record_error(err.kind());
        }
    }

    fn record_error(&self, kind: &'static str) {
        *self.stats.processing_errors.lock().unwrap().entry(kind).or_insert(0) += 1;
    }

    fn dispatch(&self, topic: &str, payload: &[u8]) -> Result<(), PipelineError> {
        if let Some(rest) = topic.strip_prefix("zigbee2mqtt/") {
            return self.dispatch_zigbee(rest, topic, payload);
        }
        if let Some(rest) = topic.strip_prefix("sysgrow/") {
            return self.dispatch_sysgrow(rest, topic, payload);
        }
        Ok(())
    }

    fn dispatch_zigbee(&self, rest: &str, topic: &str, payload: &[u8]) -> Result<(), PipelineError> {
        if rest.starts_with("bridge/") || rest == "bridge" {
            return Ok(());
        }
        if let Some(friendly_name) = rest.strip_suffix("/availability") {
            return self.handle_availability(friendly_name, payload);
        }
        if rest == "bridge" {
            return Ok(());
        }

        let friendly_name = rest;
        let raw = self.decode_object(topic, payload)?;

        let Some(sensor) = self.resolve_by_friendly_name(friendly_name) else {
            self.log_unknown(friendly_name);
            self.stats.unregistered.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };
        self.run_pipeline(&sensor, &raw)
    }

    fn dispatch_sysgrow(&self, rest: &str, topic: &str, payload: &[u8]) -> Result<(), PipelineError> {
        if rest.starts_with("bridge/") || rest == "bridge" {
            return self.handle_sysgrow_bridge(rest, topic, payload);
        }
        if let Some(friendly_name) = rest.strip_suffix("/availability") {
            return self.handle_availability(friendly_name, payload);
        }

        let friendly_name = rest;
        let raw = self.decode_object(topic, payload)?;

        let sensor = self.resolve_by_friendly_name(friendly_name).or_else(|| {
            raw.get("mac_address")
                .and_then(|v| v.as_str())
                .and_then(|mac| self.resolve_by_mac(mac))
        });

        let Some(sensor) = sensor else {
            self.emit_unregistered_sysgrow(friendly_name, topic, &raw);
            self.stats.unregistered.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };
        self.run_pipeline(&sensor, &raw)
    }

    fn handle_sysgrow_bridge(&self, rest: &str, topic: &str, payload: &[u8]) -> Result<(), PipelineError> {
        // Bridge status/health/command-response traffic is published as
        // internal events and never routed into the pipeline.
        let subtopic = rest.strip_prefix("bridge/").unwrap_or(rest);
        let body = self.decode_object(topic, payload)?;
        let timestamp = Utc::now();

        let event = if subtopic == "info" {
            BusEvent::BridgeInfo { body, timestamp }
        } else if subtopic == "health" {
            BusEvent::BridgeHealth { body, timestamp }
        } else if let Some(command) = subtopic.strip_prefix("response/") {
            BusEvent::BridgeResponse { command: command.to_string(), body, timestamp }
        } else {
            debug!(subtopic, "unrecognized sysgrow bridge subtopic; not published");
            return Ok(());
        };

        debug!(subtopic, "sysgrow bridge event published");
        self.event_bus.publish(event);
        Ok(())
    }

    fn handle_availability(&self, friendly_name: &str, payload: &[u8]) -> Result<(), PipelineError> {
        let status = String::from_utf8_lossy(payload).trim().to_lowercase();
        let online = status == "online";

        if let Some(sensor) = self.resolve_by_friendly_name(friendly_name) {
            self.availability.lock().unwrap().insert(sensor.id, online);
            info!(friendly_name, online, "device availability changed");
            self.event_bus.publish(BusEvent::AvailabilityChanged {
                sensor_id: sensor.id,
                unit_id: sensor.unit_id,
                online,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    fn decode_object(&self, topic: &str, payload: &[u8]) -> Result<serde_json::Value, PipelineError> {
        let text = std::str::from_utf8(payload).map_err(|e| {
            self.stats.invalid_payload.fetch_add(1, Ordering::Relaxed);
            PipelineError::PayloadDecode { topic: topic.to_string(), reason: e.to_string() }
        })?;
        let value: serde_json::Value = serde_json::from_str(text).map_err(|e| {
            self.stats.invalid_payload.fetch_add(1, Ordering::Relaxed);
            PipelineError::PayloadDecode { topic: topic.to_string(), reason: e.to_string() }
        })?;
        if !value.is_object() {
            self.stats.invalid_payload.fetch_add(1, Ordering::Relaxed);
            return Err(PipelineError::PayloadDecode {
                topic: topic.to_string(),
                reason: "payload body is not a JSON object".into(),
            });
        }
        Ok(value)
    }

    fn run_pipeline(&self, sensor: &Sensor, raw: &serde_json::Value) -> Result<(), PipelineError> {
        if sensor.unit_id <= 0 {
            self.stats.dropped_invalid_unit.fetch_add(1, Ordering::Relaxed);
            return Err(PipelineError::InvalidUnitContext { sensor_id: sensor.id });
        }

        let outcome = self.pipeline.process(sensor, raw, Utc::now())?;

        for event in outcome.controller_events {
            self.event_bus.publish(BusEvent::Controller(event));
        }
        if let Some(payload) = &outcome.device_payload {
            self.broadcast.emit_device(payload);
        }
        self.broadcast.emit_snapshot(&outcome.snapshot);
        Ok(())
    }

    /// Resolve a friendly name to a sensor, consulting the TTL cache first.
    fn resolve_by_friendly_name(&self, friendly_name: &str) -> Option<Sensor> {
        {
            let mut cache = self.identity_cache.lock().unwrap();
            if let Some(entry) = cache.get(friendly_name) {
                if entry.at.elapsed() < Duration::from_secs(self.config.identity_cache_ttl_seconds) {
                    let sensor_id = entry.sensor_id;
                    drop(cache);
                    return self.pipeline.registry().get(sensor_id);
                }
                cache.remove(friendly_name);
            }
        }

        let sensor = self.pipeline.registry().get_sensor_by_friendly_name(friendly_name)?;
        self.cache_identity(friendly_name, sensor.id);
        Some(sensor)
    }

    fn cache_identity(&self, friendly_name: &str, sensor_id: i64) {
        let mut cache = self.identity_cache.lock().unwrap();
        if cache.len() >= self.config.identity_cache_max_entries && !cache.contains_key(friendly_name) {
            if let Some(oldest_key) = cache.iter().min_by_key(|(_, v)| v.at).map(|(k, _)| k.clone()) {
                cache.remove(&oldest_key);
            }
        }
        cache.insert(friendly_name.to_string(), CachedIdentity { sensor_id, at: Instant::now() });
    }

    /// Resolve a sysgrow device by MAC address, trying the candidate name
    /// formats a sysgrow firmware build's friendly name might take.
    fn resolve_by_mac(&self, mac_address: &str) -> Option<Sensor> {
        let mac_clean: String = mac_address.chars().filter(|c| *c != ':').collect::<String>().to_uppercase();
        let mac_suffix: String = mac_clean.chars().rev().take(8).collect::<Vec<_>>().into_iter().rev().collect();

        let candidates = [
            format!("sysgrow-{mac_suffix}"),
            format!("sysgrow-{}", mac_suffix.to_lowercase()),
            mac_address.replace(':', "-"),
            mac_address.to_string(),
        ];
        for candidate in candidates {
            if let Some(sensor) = self.resolve_by_friendly_name(&candidate) {
                return Some(sensor);
            }
        }
        None
    }

    fn log_unknown(&self, friendly_name: &str) {
        let mut cooldown = self.unknown_log_cooldown.lock().unwrap();
        let now = Instant::now();
        let should_log = match cooldown.get(friendly_name) {
            Some(last) => now.duration_since(*last) >= Duration::from_secs(self.config.unknown_device_log_cooldown_seconds),
            None => true,
        };
        if should_log {
            cooldown.insert(friendly_name.to_string(), now);
            warn!(friendly_name, "unregistered device detected; mapping missing");
        }
    }

    fn emit_unregistered_sysgrow(&self, friendly_name: &str, topic: &str, raw: &serde_json::Value) {
        self.log_unknown(friendly_name);

        let detected_capabilities: Vec<String> = raw
            .as_object()
            .map(|obj| {
                CANONICAL_METRICS
                    .iter()
                    .filter(|metric| obj.contains_key(**metric))
                    .map(|metric| metric.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let payload = UnregisteredDevicePayload {
            schema_version: SCHEMA_VERSION,
            unit_id: 0,
            publisher_id: format!("sysgrow:{friendly_name}"),
            topic: topic.to_string(),
            friendly_name: friendly_name.to_string(),
            registered: false,
            timestamp: Utc::now(),
            raw_data: raw.clone(),
            suggested_sensor_type: None,
            detected_capabilities,
        };
        self.broadcast.emit_unregistered(&payload);
    }

    pub fn availability_of(&self, sensor_id: i64) -> Option<bool> {
        self.availability.lock().unwrap().get(&sensor_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::application::arbitrator::{ArbitratorConfig, PriorityArbitrator};
    use crate::core::application::registry::SensorRegistry;
    use crate::core::domain::sensor::{Protocol, SensorCategory, SensorConfig};
    use crate::infrastructure::broadcast::InMemoryTransport;
    use serde_json::json;

    fn router() -> Arc<MqttRouter> {
        let registry = Arc::new(SensorRegistry::new());
        let arbitrator = Arc::new(PriorityArbitrator::new(ArbitratorConfig::default(), registry.clone()));
        let pipeline = Arc::new(Pipeline::new(registry, arbitrator));
        let broadcast = Arc::new(BroadcastSink::new(Box::new(InMemoryTransport::new())));
        let event_bus = Arc::new(EventBus::new());
        let config = MqttConfig {
            broker_host: "localhost".into(),
            broker_port: 1883,
            client_id: "test".into(),
            username: None,
            password: None,
            keep_alive_seconds: 30,
            identity_cache_ttl_seconds: 300,
            identity_cache_max_entries: 256,
            unknown_device_log_cooldown_seconds: 600,
        };
        MqttRouter::new(pipeline, broadcast, event_bus, config)
    }

    fn env_sensor(id: i64, unit_id: i64, name: &str) -> Sensor {
        Sensor {
            id,
            unit_id,
            name: name.to_string(),
            category: SensorCategory::Environmental,
            protocol: Protocol::Zigbee2mqtt,
            model: "generic".into(),
            config: SensorConfig {
                zigbee_friendly_name: Some(name.to_string()),
                ..Default::default()
            },
            calibration: None,
        }
    }

    #[test]
    fn zigbee_bridge_messages_are_counted_and_dropped() {
        let router = router();
        router.on_message("zigbee2mqtt/bridge/state", b"online");
        let stats = router.stats();
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.processing_errors.get("invalid_payload"), None);
    }

    #[test]
    fn zigbee_state_routes_to_pipeline_when_resolved() {
        let router = router();
        router.pipeline.registry().register(env_sensor(1, 10, "zig_env"));
        router.on_message("zigbee2mqtt/zig_env", json!({"temperature": 21.0}).to_string().as_bytes());
        assert_eq!(router.stats().unregistered, 0);
        assert_eq!(router.pipeline.arbitrator().stats().ingest_count, 1);
    }

    #[test]
    fn unresolved_zigbee_device_is_dropped_without_discovery_payload() {
        let router = router();
        router.on_message("zigbee2mqtt/ghost", json!({"temperature": 21.0}).to_string().as_bytes());
        assert_eq!(router.stats().unregistered, 1);
    }

    #[test]
    fn unresolved_sysgrow_device_emits_discovery_payload() {
        let router = router();
        router.on_message(
            "sysgrow/unit_7_node",
            json!({"temperature": 22.0, "mac_address": "AA:BB:CC:DD:EE:FF"}).to_string().as_bytes(),
        );
        assert_eq!(router.stats().unregistered, 1);
    }

    #[test]
    fn sysgrow_device_resolves_by_mac_candidate_name() {
        let router = router();
        router.pipeline.registry().register(env_sensor(2, 11, "sysgrow-CCDDEEFF"));
        router.on_message(
            "sysgrow/unknown_alias",
            json!({"temperature": 22.0, "mac_address": "AA:BB:CC:DD:EE:FF"}).to_string().as_bytes(),
        );
        assert_eq!(router.stats().unregistered, 0);
        assert_eq!(router.pipeline.arbitrator().stats().ingest_count, 1);
    }

    #[test]
    fn availability_updates_event_bus_and_local_state() {
        let router = router();
        router.pipeline.registry().register(env_sensor(3, 12, "zig_env2"));
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        router.event_bus.subscribe(move |event| {
            if matches!(event, BusEvent::AvailabilityChanged { .. }) {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        router.on_message("zigbee2mqtt/zig_env2/availability", b"online");
        assert_eq!(router.availability_of(3), Some(true));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_json_payload_is_counted_and_logged_not_propagated() {
        let router = router();
        router.pipeline.registry().register(env_sensor(4, 13, "zig_env3"));
        router.on_message("zigbee2mqtt/zig_env3", b"not json");
        assert_eq!(router.stats().processing_errors.get("invalid_payload"), Some(&1));
    }

    #[test]
    fn sysgrow_bridge_messages_never_reach_the_pipeline_but_publish_events() {
        let router = router();
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        router.event_bus.subscribe(move |event| {
            let name = match event {
                BusEvent::BridgeInfo { .. } => "info",
                BusEvent::BridgeHealth { .. } => "health",
                BusEvent::BridgeResponse { command, .. } => {
                    assert_eq!(command, "reboot");
                    "response"
                }
                _ => return,
            };
            e.lock().unwrap().push(name);
        });

        router.on_message("sysgrow/bridge/info", json!({"devices": []}).to_string().as_bytes());
        router.on_message("sysgrow/bridge/health", json!({"status": "ok"}).to_string().as_bytes());
        router.on_message("sysgrow/bridge/response/reboot", json!({"ok": true}).to_string().as_bytes());

        let stats = router.stats();
        assert_eq!(stats.unregistered, 0);
        assert_eq!(stats.dropped_invalid_unit, 0);
        assert_eq!(stats.processing_errors.get("invalid_payload"), None);
        assert_eq!(*events.lock().unwrap(), vec!["info", "health", "response"]);
    }
}
