//! C9 — Local hardware polling engine.
//!
//! A single background worker that reads every locally-wired sensor
//! (gpio/i2c/adc/spi/onewire) on a fixed interval, feeding results through
//! the same pipeline the MQTT router uses. Failing sensors back off
//! exponentially instead of being retried every tick.
//!
//! Grounded on
//! `original_source/app/services/hardware/sensor_polling_service.py`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::core::application::pipeline::Pipeline;
use crate::core::domain::health::SensorHealth;
use crate::core::domain::sensor::{Protocol, Sensor};
use crate::infrastructure::broadcast::BroadcastSink;
use crate::infrastructure::config::PollingConfig;
use crate::infrastructure::event_bus::{Event as BusEvent, EventBus};

/// Reads a single locally-wired sensor's raw field map. The production
/// implementation talks to gpio/i2c/adc/spi/onewire hardware; tests supply
/// a fixed or scripted double.
#[async_trait]
pub trait HardwareReader: Send + Sync {
    async fn read(&self, sensor: &Sensor) -> anyhow::Result<serde_json::Value>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PollingStatus {
    pub running: bool,
    pub poll_interval_seconds: u64,
    pub tick_count: u64,
    pub sensors_count: usize,
    pub healthy_count: usize,
}

/// The local polling worker. Construct with `new`, drive with `run` inside
/// a spawned task, and request a cooperative stop with `request_stop` —
/// the caller is responsible for joining the task within a bounded grace
/// period (`PollingConfig::stop_grace_period_seconds`).
pub struct PollingEngine {
    pipeline: Arc<Pipeline>,
    broadcast: Arc<BroadcastSink>,
    event_bus: Arc<EventBus>,
    reader: Arc<dyn HardwareReader>,
    config: PollingConfig,
    health: Mutex<HashMap<i64, SensorHealth>>,
    stop_flag: AtomicBool,
    running: AtomicBool,
    tick_count: AtomicU64,
}

impl PollingEngine {
    pub fn new(
        pipeline: Arc<Pipeline>,
        broadcast: Arc<BroadcastSink>,
        event_bus: Arc<EventBus>,
        reader: Arc<dyn HardwareReader>,
        config: PollingConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            broadcast,
            event_bus,
            reader,
            config,
            health: Mutex::new(HashMap::new()),
            stop_flag: AtomicBool::new(false),
            running: AtomicBool::new(false),
            tick_count: AtomicU64::new(0),
        })
    }

    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs until `request_stop` is called. Does nothing (and never flips
    /// `running`) if no locally-polled sensor is registered at start time.
    pub async fn run(self: Arc<Self>) {
        if self.locally_polled_sensors().is_empty() {
            info!("no locally-polled sensors configured; polling engine not starting");
            return;
        }

        self.running.store(true, Ordering::SeqCst);
        info!(interval_seconds = self.config.interval_seconds, "hardware polling engine started");

        while !self.stop_flag.load(Ordering::SeqCst) {
            let tick_start = Instant::now();
            self.tick(Utc::now()).await;
            self.tick_count.fetch_add(1, Ordering::SeqCst);

            let interval = Duration::from_secs(self.config.interval_seconds);
            let sleep_for = interval
                .checked_sub(tick_start.elapsed())
                .unwrap_or(Duration::from_millis(100))
                .max(Duration::from_millis(100));
            tokio::time::sleep(sleep_for).await;
        }

        self.running.store(false, Ordering::SeqCst);
        info!("hardware polling engine stopped");
    }

    fn locally_polled_sensors(&self) -> Vec<Sensor> {
        self.pipeline.registry().all_with_protocol(Protocol::is_locally_polled)
    }

    async fn tick(&self, now: DateTime<Utc>) {
        for sensor in self.locally_polled_sensors() {
            let in_backoff = self
                .health
                .lock()
                .unwrap()
                .get(&sensor.id)
                .map(|h| h.is_in_backoff(now))
                .unwrap_or(false);
            if in_backoff {
                continue;
            }
            self.poll_one(&sensor, now).await;
        }
    }

    async fn poll_one(&self, sensor: &Sensor, now: DateTime<Utc>) {
        let timeout = Duration::from_secs(self.config.hardware_read_timeout_seconds);
        match tokio::time::timeout(timeout, self.reader.read(sensor)).await {
            Ok(Ok(raw)) => match self.pipeline.process(sensor, &raw, now) {
                Ok(outcome) => {
                    for event in outcome.controller_events {
                        self.event_bus.publish(BusEvent::Controller(event));
                    }
                    if let Some(payload) = &outcome.device_payload {
                        self.broadcast.emit_device(payload);
                    }
                    self.broadcast.emit_snapshot(&outcome.snapshot);
                    self.health.lock().unwrap().entry(sensor.id).or_default().record_success(now);
                }
                Err(err) => self.handle_failure(sensor.id, now, err.to_string()),
            },
            Ok(Err(err)) => self.handle_failure(sensor.id, now, err.to_string()),
            Err(_elapsed) => self.handle_failure(sensor.id, now, "hardware read timed out".to_string()),
        }
    }

    fn handle_failure(&self, sensor_id: i64, now: DateTime<Utc>, error_msg: String) {
        let mut health_map = self.health.lock().unwrap();
        let health = health_map.entry(sensor_id).or_default();
        let new_failures = health.consecutive_failures + 1;

        let uncapped = self.config.base_backoff_seconds as f64 * 2f64.powi(new_failures as i32 - 1);
        let backoff_secs = uncapped.min(self.config.max_backoff_seconds as f64) as i64;

        if new_failures == 1 || new_failures % 10 == 0 {
            warn!(sensor_id, new_failures, error = %error_msg, backoff_secs, "sensor poll failed");
        } else {
            debug!(sensor_id, new_failures, error = %error_msg, "sensor poll failed");
        }

        health.record_failure(now, error_msg, now + chrono::Duration::seconds(backoff_secs));
    }

    pub fn get_service_status(&self) -> PollingStatus {
        let health_map = self.health.lock().unwrap();
        let healthy_count = health_map.values().filter(|h| h.is_healthy()).count();
        PollingStatus {
            running: self.is_running(),
            poll_interval_seconds: self.config.interval_seconds,
            tick_count: self.tick_count.load(Ordering::SeqCst),
            sensors_count: self.locally_polled_sensors().len(),
            healthy_count,
        }
    }

    pub fn get_health_status(&self, sensor_id: i64) -> Option<SensorHealth> {
        self.health.lock().unwrap().get(&sensor_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::application::arbitrator::{ArbitratorConfig, PriorityArbitrator};
    use crate::core::application::registry::SensorRegistry;
    use crate::core::domain::sensor::{SensorCategory, SensorConfig};
    use crate::infrastructure::broadcast::InMemoryTransport;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    struct FixedReader(StdMutex<Result<serde_json::Value, String>>);

    #[async_trait]
    impl HardwareReader for FixedReader {
        async fn read(&self, _sensor: &Sensor) -> anyhow::Result<serde_json::Value> {
            self.0.lock().unwrap().clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn gpio_sensor(id: i64, unit_id: i64) -> Sensor {
        Sensor {
            id,
            unit_id,
            name: format!("gpio_{id}"),
            category: SensorCategory::Environmental,
            protocol: Protocol::Gpio,
            model: "generic".into(),
            config: SensorConfig::default(),
            calibration: None,
        }
    }

    fn config() -> PollingConfig {
        PollingConfig {
            interval_seconds: 10,
            base_backoff_seconds: 5,
            max_backoff_seconds: 600,
            hardware_read_timeout_seconds: 5,
            stop_grace_period_seconds: 5,
        }
    }

    fn engine(reader: Arc<dyn HardwareReader>) -> (Arc<PollingEngine>, Arc<SensorRegistry>) {
        let registry = Arc::new(SensorRegistry::new());
        let arbitrator = Arc::new(PriorityArbitrator::new(ArbitratorConfig::default(), registry.clone()));
        let pipeline = Arc::new(Pipeline::new(registry.clone(), arbitrator));
        let broadcast = Arc::new(BroadcastSink::new(Box::new(InMemoryTransport::new())));
        let event_bus = Arc::new(EventBus::new());
        (PollingEngine::new(pipeline, broadcast, event_bus, reader, config()), registry)
    }

    #[tokio::test]
    async fn successful_read_marks_sensor_healthy_and_resets_backoff() {
        let reader: Arc<dyn HardwareReader> = Arc::new(FixedReader(StdMutex::new(Ok(json!({"temperature": 20.0})))));
        let (engine, registry) = engine(reader);
        registry.register(gpio_sensor(1, 5));

        engine.tick(Utc::now()).await;

        let health = engine.get_health_status(1).unwrap();
        assert!(health.is_healthy());
        assert_eq!(health.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn failed_read_applies_exponential_backoff() {
        let reader: Arc<dyn HardwareReader> = Arc::new(FixedReader(StdMutex::new(Err("hw fault".into()))));
        let (engine, registry) = engine(reader);
        registry.register(gpio_sensor(2, 5));

        let now = Utc::now();
        engine.tick(now).await;
        let health = engine.get_health_status(2).unwrap();
        assert_eq!(health.consecutive_failures, 1);
        assert!(health.is_in_backoff(now));
    }

    #[tokio::test]
    async fn backoff_skips_the_sensor_on_the_next_tick() {
        let reader: Arc<dyn HardwareReader> = Arc::new(FixedReader(StdMutex::new(Err("hw fault".into()))));
        let (engine, registry) = engine(reader);
        registry.register(gpio_sensor(3, 5));

        let now = Utc::now();
        engine.tick(now).await;
        engine.tick(now).await;
        let health = engine.get_health_status(3).unwrap();
        // Still in backoff from the first failure; second tick must have skipped.
        assert_eq!(health.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn run_does_not_start_without_locally_polled_sensors() {
        let reader: Arc<dyn HardwareReader> = Arc::new(FixedReader(StdMutex::new(Ok(json!({})))));
        let (engine, _registry) = engine(reader);
        engine.clone().run().await;
        assert!(!engine.is_running());
        assert_eq!(engine.get_service_status().tick_count, 0);
    }
}
