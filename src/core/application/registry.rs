//! C10 — Sensor registry.
//!
//! Grounded on
//! `original_source/app/services/hardware/sensor_management_service.py` and
//! `app/hardware/sensors/registry.py`. Holds the in-memory sensor map and
//! serves friendly-name resolution for the MQTT router's identity cache.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::info;

use crate::core::domain::sensor::{Protocol, Sensor, SensorCategory};

/// Published when a sensor is registered or removed. Downstream caches
/// (the router's identity cache, the arbitrator's primary map and snapshot
/// cache) subscribe to this to invalidate themselves.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    SensorCreated { sensor_id: i64 },
    SensorDeleted { sensor_id: i64 },
}

struct CachedLookup {
    sensor: Sensor,
    at: Instant,
}

const LOOKUP_CACHE_TTL: Duration = Duration::from_secs(60);

/// In-memory map of configured sensors with friendly-name resolution.
///
/// All mutation goes through `register`/`unregister`, both of which are
/// idempotent and rebuild the category/protocol indices under a single lock,
/// mirroring the reference service's re-entrant-lock discipline.
pub struct SensorRegistry {
    sensors: RwLock<HashMap<i64, Sensor>>,
    lookup_cache: Mutex<HashMap<i64, CachedLookup>>,
    listeners: Mutex<Vec<Box<dyn Fn(RegistryEvent) + Send + Sync>>>,
}

impl Default for SensorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self {
            sensors: RwLock::new(HashMap::new()),
            lookup_cache: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to registry mutation events (sensor created/deleted).
    pub fn on_event<F>(&self, listener: F)
    where
        F: Fn(RegistryEvent) + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    fn publish(&self, event: RegistryEvent) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(event.clone());
        }
    }

    /// Register (or re-register) a sensor. Idempotent on the same id.
    pub fn register(&self, sensor: Sensor) {
        let id = sensor.id;
        self.sensors.write().unwrap().insert(id, sensor);
        self.lookup_cache.lock().unwrap().remove(&id);
        info!(sensor_id = id, "sensor registered");
        self.publish(RegistryEvent::SensorCreated { sensor_id: id });
    }

    pub fn unregister(&self, sensor_id: i64) -> bool {
        let removed = self.sensors.write().unwrap().remove(&sensor_id).is_some();
        if removed {
            self.lookup_cache.lock().unwrap().remove(&sensor_id);
            info!(sensor_id, "sensor unregistered");
            self.publish(RegistryEvent::SensorDeleted { sensor_id });
        }
        removed
    }

    /// Resolve a sensor by id, consulting the short-TTL lookup cache first.
    pub fn get(&self, sensor_id: i64) -> Option<Sensor> {
        {
            let cache = self.lookup_cache.lock().unwrap();
            if let Some(entry) = cache.get(&sensor_id) {
                if entry.at.elapsed() < LOOKUP_CACHE_TTL {
                    return Some(entry.sensor.clone());
                }
            }
        }
        let sensor = self.sensors.read().unwrap().get(&sensor_id).cloned();
        if let Some(s) = &sensor {
            self.lookup_cache.lock().unwrap().insert(
                sensor_id,
                CachedLookup {
                    sensor: s.clone(),
                    at: Instant::now(),
                },
            );
        }
        sensor
    }

    pub fn all_in_unit(&self, unit_id: i64) -> Vec<Sensor> {
        self.sensors
            .read()
            .unwrap()
            .values()
            .filter(|s| s.unit_id == unit_id)
            .cloned()
            .collect()
    }

    pub fn all_with_protocol(&self, predicate: impl Fn(Protocol) -> bool) -> Vec<Sensor> {
        self.sensors
            .read()
            .unwrap()
            .values()
            .filter(|s| predicate(s.protocol))
            .cloned()
            .collect()
    }

    /// Linear scan matching by name, declared Zigbee friendly name, the
    /// `extra_config["friendly_name"]` override, or MQTT topic containment.
    pub fn get_sensor_by_friendly_name(&self, query: &str) -> Option<Sensor> {
        self.sensors
            .read()
            .unwrap()
            .values()
            .find(|s| {
                s.name == query
                    || s.config.zigbee_friendly_name.as_deref() == Some(query)
                    || s.config.extra_config.get("friendly_name").map(String::as_str) == Some(query)
                    || s.config
                        .mqtt_topic
                        .as_deref()
                        .is_some_and(|topic| topic.contains(query))
            })
            .cloned()
    }

    /// Stats surface: counts by category and protocol grouping.
    pub fn stats(&self) -> RegistryStats {
        let sensors = self.sensors.read().unwrap();
        let mut by_category = HashMap::new();
        let mut wired = 0;
        let mut wireless = 0;
        for sensor in sensors.values() {
            *by_category.entry(sensor.category).or_insert(0) += 1;
            if sensor.protocol.is_locally_polled() {
                wired += 1;
            } else {
                wireless += 1;
            }
        }
        RegistryStats {
            total: sensors.len(),
            wired,
            wireless,
            environmental: *by_category.get(&SensorCategory::Environmental).unwrap_or(&0),
            plant: *by_category.get(&SensorCategory::Plant).unwrap_or(&0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryStats {
    pub total: usize,
    pub wired: usize,
    pub wireless: usize,
    pub environmental: usize,
    pub plant: usize,
}
