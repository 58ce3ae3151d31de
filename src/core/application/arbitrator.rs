//! C7 — Priority arbitrator.
//!
//! Grounded on
//! `original_source/app/hardware/sensors/processors/priority_processor.py`.
//! Elects one primary sensor per `(unit, metric)`, tracks staleness and
//! trend, aggregates multi-channel soil readings, and assembles a
//! TTL-cached per-unit dashboard snapshot with derived psychrometrics.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::application::enricher::{dew_point, heat_index, vapor_pressure_deficit};
use crate::core::application::registry::SensorRegistry;
use crate::core::domain::metrics::{
    is_air_metric, is_dashboard_metric, unit_for_metric, DASHBOARD_METRICS, DERIVED_METRICS,
};
use crate::core::domain::payloads::{DashboardSnapshot, SnapshotMetric, SnapshotSource, Trend};
use crate::core::domain::reading::Reading;
use crate::core::domain::sensor::{Sensor, SensorCategory};

/// Preserve as a documented constant; do not retune (SPEC_FULL.md §9).
pub const TREND_STABLE_THRESHOLD: f64 = 0.1;

pub const MIN_STALE_SECONDS: u64 = 10;
pub const MAX_STALE_SECONDS: u64 = 3600;
pub const MIN_TRACKED_SENSORS: usize = 10;
pub const MAX_TRACKED_SENSORS: usize = 10_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArbitratorConfig {
    pub stale_seconds: u64,
    pub max_tracked_sensors: usize,
}

impl Default for ArbitratorConfig {
    fn default() -> Self {
        Self {
            stale_seconds: 180,
            max_tracked_sensors: 500,
        }
    }
}

impl ArbitratorConfig {
    pub fn clamped(mut self) -> Self {
        self.stale_seconds = self.stale_seconds.clamp(MIN_STALE_SECONDS, MAX_STALE_SECONDS);
        self.max_tracked_sensors = self
            .max_tracked_sensors
            .clamp(MIN_TRACKED_SENSORS, MAX_TRACKED_SENSORS);
        self
    }

    pub fn snapshot_cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(MIN_STALE_SECONDS as i64)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ManualPriority {
    pub priority: i32,
    pub metric_filter: Option<&'static str>,
}

#[derive(Debug, Clone)]
struct LastReading {
    unit_id: i64,
    sensor_name: String,
    category: SensorCategory,
    protocol_wire: String,
    data: BTreeMap<String, f64>,
    soil_channels: Option<Vec<f64>>,
    battery: Option<i64>,
    linkquality: Option<i64>,
    quality_score: Option<f64>,
    status: String,
    is_anomaly: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ArbitratorStats {
    pub ingest_count: u64,
    pub primary_changes: u64,
    pub evictions: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Default)]
struct ArbitratorState {
    last_seen: HashMap<i64, DateTime<Utc>>,
    last_reading: HashMap<i64, LastReading>,
    unit_sensors: HashMap<i64, HashSet<i64>>,
    primary: HashMap<(i64, String), i64>,
    manual_priority: HashMap<i64, ManualPriority>,
    previous_value: HashMap<(i64, String), f64>,
    snapshot_cache: HashMap<i64, DashboardSnapshot>,
    stats: ArbitratorStats,
}

pub struct PriorityArbitrator {
    config: ArbitratorConfig,
    registry: Arc<SensorRegistry>,
    state: Mutex<ArbitratorState>,
}

impl PriorityArbitrator {
    pub fn new(config: ArbitratorConfig, registry: Arc<SensorRegistry>) -> Self {
        Self {
            config: config.clamped(),
            registry,
            state: Mutex::new(ArbitratorState::default()),
        }
    }

    pub fn set_manual_priority(&self, sensor_id: i64, priority: ManualPriority) {
        self.state.lock().unwrap().manual_priority.insert(sensor_id, priority);
    }

    /// Clear transient state tied to a sensor id, invoked when the registry
    /// publishes `sensor-created`/`sensor-deleted` so elections recompute.
    pub fn clear_mapping_for_unit(&self, unit_id: i64) {
        let mut state = self.state.lock().unwrap();
        state.primary.retain(|(u, _), _| *u != unit_id);
        state.snapshot_cache.remove(&unit_id);
    }

    /// Clear all primary-election and snapshot-cache state. Invoked on any
    /// `sensor-created`/`sensor-deleted` registry event when the affected
    /// unit isn't known up front (the event only carries a sensor id).
    pub fn clear_all(&self) {
        let mut state = self.state.lock().unwrap();
        state.primary.clear();
        state.snapshot_cache.clear();
    }

    /// Record a reading, consider primary election for each reported dashboard
    /// metric, and return the refreshed (and cached) per-unit snapshot.
    pub fn ingest(&self, sensor: &Sensor, reading: &Reading, soil_channels: Option<Vec<f64>>, now: DateTime<Utc>) -> DashboardSnapshot {
        let mut state = self.state.lock().unwrap();
        state.stats.ingest_count += 1;

        state.last_seen.insert(sensor.id, now);
        state.unit_sensors.entry(sensor.unit_id).or_default().insert(sensor.id);
        state.last_reading.insert(
            sensor.id,
            LastReading {
                unit_id: sensor.unit_id,
                sensor_name: sensor.name.clone(),
                category: sensor.category,
                protocol_wire: sensor.protocol.as_wire_str().to_string(),
                data: reading.data.clone(),
                soil_channels,
                battery: reading.data.get("battery").map(|v| *v as i64),
                linkquality: reading.data.get("linkquality").map(|v| *v as i64),
                quality_score: reading.quality_score,
                status: reading.status.as_wire_str().to_string(),
                is_anomaly: reading.is_anomaly,
            },
        );

        if state.last_reading.len() > self.config.max_tracked_sensors {
            self.evict_stale_entries(&mut state, now);
        }

        for metric in reading.data.keys() {
            if is_dashboard_metric(metric) && !DERIVED_METRICS.contains(&metric.as_str()) {
                self.consider_primary(&mut state, sensor, metric, now);
            }
        }

        let snapshot = self.build_snapshot(&mut state, sensor.unit_id, now);
        state.snapshot_cache.insert(sensor.unit_id, snapshot.clone());
        snapshot
    }

    /// Whether `sensor_id` is the current primary for `(unit_id, metric)`, or
    /// — when no primary has yet been elected — whether `sensor_id` declares
    /// the metric as primary. Used for the conservative/permissive gating
    /// split on controller events.
    pub fn is_primary_metric(&self, unit_id: i64, metric: &str, sensor_id: i64, declares_primary: bool) -> bool {
        let state = self.state.lock().unwrap();
        match state.primary.get(&(unit_id, metric.to_string())) {
            Some(&current) => current == sensor_id,
            None => declares_primary,
        }
    }

    pub fn snapshot(&self, unit_id: i64, now: DateTime<Utc>) -> Option<DashboardSnapshot> {
        let mut state = self.state.lock().unwrap();
        if let Some(cached) = state.snapshot_cache.get(&unit_id) {
            if now.signed_duration_since(cached.cached_at) <= self.config.snapshot_cache_ttl() {
                state.stats.cache_hits += 1;
                return Some(cached.clone());
            }
        }
        state.stats.cache_misses += 1;
        if !state.unit_sensors.contains_key(&unit_id) {
            return None;
        }
        let snapshot = self.build_snapshot(&mut state, unit_id, now);
        state.snapshot_cache.insert(unit_id, snapshot.clone());
        Some(snapshot)
    }

    pub fn stats(&self) -> ArbitratorStats {
        self.state.lock().unwrap().stats
    }

    fn effective_priority(&self, state: &ArbitratorState, sensor: &Sensor, metric: &str) -> i32 {
        if let Some(manual) = state.manual_priority.get(&sensor.id) {
            if manual.metric_filter.map(|f| f == metric).unwrap_or(true) {
                return manual.priority;
            }
        }
        if sensor.config.declares_primary(metric) {
            return 10;
        }
        if !sensor.config.primary_metrics.is_empty() {
            return 50;
        }
        if is_air_metric(metric) {
            return if sensor.is_environment_sensor() { 20 } else { 40 };
        }
        if metric == "soil_moisture" {
            return if sensor.is_soil_sensor() { 20 } else { 40 };
        }
        50
    }

    fn is_stale(&self, state: &ArbitratorState, sensor_id: i64, now: DateTime<Utc>, bound_s: u64) -> bool {
        match state.last_seen.get(&sensor_id) {
            Some(last) => now.signed_duration_since(*last).num_seconds() > bound_s as i64,
            None => true,
        }
    }

    fn consider_primary(&self, state: &mut ArbitratorState, sensor: &Sensor, metric: &str, now: DateTime<Utc>) {
        let key = (sensor.unit_id, metric.to_string());
        let stale_bound = self.config.stale_seconds;

        let replace = match state.primary.get(&key).copied() {
            None => sensor.config.declares_primary(metric),
            Some(current_id) if current_id == sensor.id => false,
            Some(current_id) => {
                let current_stale = self.is_stale(state, current_id, now, stale_bound);
                if current_stale {
                    true
                } else if self.registry.get(current_id).is_none() {
                    true
                } else {
                    let current_sensor = self.registry.get(current_id);
                    let new_declares = sensor.config.declares_primary(metric);
                    let current_declares = current_sensor
                        .as_ref()
                        .map(|s| s.config.declares_primary(metric))
                        .unwrap_or(false);
                    if new_declares && !current_declares {
                        true
                    } else {
                        let current_priority = current_sensor
                            .as_ref()
                            .map(|s| self.effective_priority(state, s, metric))
                            .unwrap_or(i32::MAX);
                        let candidate_priority = self.effective_priority(state, sensor, metric);
                        candidate_priority < current_priority
                    }
                }
            }
        };

        if replace {
            state.primary.insert(key, sensor.id);
            state.stats.primary_changes += 1;
            debug!(unit_id = sensor.unit_id, metric, sensor_id = sensor.id, "primary elected");
        }
    }

    fn evict_stale_entries(&self, state: &mut ArbitratorState, now: DateTime<Utc>) {
        let eviction_threshold = 2 * self.config.stale_seconds;
        let mut to_evict = Vec::new();
        for (&id, &last_seen) in state.last_seen.iter() {
            let age = now.signed_duration_since(last_seen).num_seconds();
            if age as u64 <= eviction_threshold {
                continue;
            }
            let kept_longer = state
                .last_reading
                .get(&id)
                .map(|lr| lr.data.contains_key("soil_moisture") || lr.data.contains_key("lux"))
                .unwrap_or(false);
            if kept_longer && age as u64 <= MAX_STALE_SECONDS {
                continue;
            }
            to_evict.push(id);
        }

        for id in to_evict {
            state.last_seen.remove(&id);
            state.last_reading.remove(&id);
            state.manual_priority.remove(&id);
            let mut affected_units = HashSet::new();
            for (unit_id, sensors) in state.unit_sensors.iter_mut() {
                if sensors.remove(&id) {
                    affected_units.insert(*unit_id);
                }
            }
            state.primary.retain(|_, v| *v != id);
            for unit_id in affected_units {
                state.snapshot_cache.remove(&unit_id);
            }
            state.stats.evictions += 1;
        }
    }

    fn build_snapshot(&self, state: &mut ArbitratorState, unit_id: i64, now: DateTime<Utc>) -> DashboardSnapshot {
        let mut metrics = BTreeMap::new();
        let mut sorted_metrics: Vec<&str> = DASHBOARD_METRICS.to_vec();
        sorted_metrics.sort();

        for &metric in &sorted_metrics {
            if metric == "soil_moisture" {
                if let Some(m) = self.aggregate_soil_moisture(state, unit_id, now) {
                    metrics.insert(metric.to_string(), m);
                }
            } else if metric == "lux" {
                if let Some(m) = self.select_lux(state, unit_id, now) {
                    metrics.insert(metric.to_string(), m);
                }
            } else if let Some(m) = self.select_best_sensor(state, unit_id, metric, now) {
                metrics.insert(metric.to_string(), m);
            }
        }

        self.fill_derived_metrics(&mut metrics);
        self.update_trends(state, unit_id, &mut metrics);

        DashboardSnapshot {
            schema_version: crate::core::domain::payloads::SCHEMA_VERSION,
            unit_id,
            timestamp: now,
            metrics,
            cached_at: now,
        }
    }

    fn aggregate_soil_moisture(&self, state: &ArbitratorState, unit_id: i64, now: DateTime<Utc>) -> Option<SnapshotMetric> {
        let sensors = state.unit_sensors.get(&unit_id)?;
        let mut values = Vec::new();
        for &id in sensors {
            if self.is_stale(state, id, now, MAX_STALE_SECONDS) {
                continue;
            }
            let Some(lr) = state.last_reading.get(&id) else { continue };
            if let Some(channels) = &lr.soil_channels {
                values.extend(channels.iter().copied());
            } else if let Some(v) = lr.data.get("soil_moisture") {
                values.push(*v);
            }
        }
        if values.is_empty() {
            return None;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Some(SnapshotMetric {
            value: round_to(mean, 1),
            unit: unit_for_metric("soil_moisture").to_string(),
            trend: Trend::Unknown,
            trend_delta: None,
            source: SnapshotSource {
                sensor_id: 0,
                sensor_name: Some("Soil Moisture (avg)".to_string()),
                sensor_type: "aggregate".to_string(),
                protocol: None,
                battery: None,
                power_source: crate::core::domain::payloads::PowerSource::Unknown,
                linkquality: None,
                quality_score: None,
                status: "success".to_string(),
                is_anomaly: false,
            },
        })
    }

    fn select_lux(&self, state: &mut ArbitratorState, unit_id: i64, now: DateTime<Utc>) -> Option<SnapshotMetric> {
        let key = (unit_id, "lux".to_string());
        if let Some(&primary_id) = state.primary.get(&key) {
            if !self.is_stale(state, primary_id, now, MAX_STALE_SECONDS) {
                if let Some(lr) = state.last_reading.get(&primary_id) {
                    if let Some(&v) = lr.data.get("lux") {
                        return Some(self.metric_from_reading(primary_id, lr, "lux", v));
                    }
                }
            }
        }
        let sensors = state.unit_sensors.get(&unit_id)?.clone();
        let mut ids: Vec<i64> = sensors.into_iter().collect();
        ids.sort();
        for id in ids {
            if let Some(lr) = state.last_reading.get(&id) {
                if let Some(&v) = lr.data.get("lux") {
                    state.primary.insert(key.clone(), id);
                    let lr = lr.clone();
                    return Some(self.metric_from_reading(id, &lr, "lux", v));
                }
            }
        }
        None
    }

    fn select_best_sensor(&self, state: &ArbitratorState, unit_id: i64, metric: &str, now: DateTime<Utc>) -> Option<SnapshotMetric> {
        let key = (unit_id, metric.to_string());
        if let Some(&primary_id) = state.primary.get(&key) {
            if !self.is_stale(state, primary_id, now, self.config.stale_seconds) {
                if let Some(lr) = state.last_reading.get(&primary_id) {
                    if let Some(&v) = lr.data.get(metric) {
                        return Some(self.metric_from_reading(primary_id, lr, metric, v));
                    }
                }
            }
        }

        let sensors = state.unit_sensors.get(&unit_id)?;
        let mut declared = Vec::new();
        let mut secondary = Vec::new();
        for &id in sensors {
            if self.is_stale(state, id, now, self.config.stale_seconds) {
                continue;
            }
            let Some(lr) = state.last_reading.get(&id) else { continue };
            let Some(&value) = lr.data.get(metric) else { continue };
            let Some(sensor) = self.registry.get(id) else { continue };
            let age = state
                .last_seen
                .get(&id)
                .map(|t| now.signed_duration_since(*t).num_milliseconds())
                .unwrap_or(i64::MAX);
            let priority = self.effective_priority(state, &sensor, metric);
            let quality = lr.quality_score.unwrap_or(0.0);
            let candidate = (priority, age, quality, id, value);
            if sensor.config.declares_primary(metric) {
                declared.push(candidate);
            } else {
                secondary.push(candidate);
            }
        }

        let pick_from = if !declared.is_empty() { &mut declared } else { &mut secondary };
        pick_from.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(b.2.partial_cmp(&a.2).unwrap()));
        let (_, _, _, id, value) = *pick_from.first()?;
        let lr = state.last_reading.get(&id)?;
        Some(self.metric_from_reading(id, lr, metric, value))
    }

    fn metric_from_reading(&self, sensor_id: i64, lr: &LastReading, metric: &str, value: f64) -> SnapshotMetric {
        SnapshotMetric {
            value,
            unit: unit_for_metric(metric).to_string(),
            trend: Trend::Unknown,
            trend_delta: None,
            source: SnapshotSource {
                sensor_id,
                sensor_name: Some(lr.sensor_name.clone()),
                sensor_type: match lr.category {
                    SensorCategory::Environmental => "environmental".to_string(),
                    SensorCategory::Plant => "plant".to_string(),
                },
                protocol: Some(lr.protocol_wire.clone()),
                battery: lr.battery,
                power_source: crate::core::domain::payloads::infer_power_source(lr.battery),
                linkquality: lr.linkquality,
                quality_score: lr.quality_score,
                status: lr.status.clone(),
                is_anomaly: lr.is_anomaly,
            },
        }
    }

    fn fill_derived_metrics(&self, metrics: &mut BTreeMap<String, SnapshotMetric>) {
        let Some(t) = metrics.get("temperature").map(|m| m.value) else {
            return;
        };
        let Some(rh) = metrics.get("humidity").map(|m| m.value) else {
            return;
        };

        let derived_source = |value: f64, metric: &str| SnapshotMetric {
            value,
            unit: unit_for_metric(metric).to_string(),
            trend: Trend::Unknown,
            trend_delta: None,
            source: SnapshotSource {
                sensor_id: 0,
                sensor_name: None,
                sensor_type: "derived".to_string(),
                protocol: None,
                battery: None,
                power_source: crate::core::domain::payloads::PowerSource::Unknown,
                linkquality: None,
                quality_score: None,
                status: "success".to_string(),
                is_anomaly: false,
            },
        };

        metrics
            .entry("vpd".to_string())
            .or_insert_with(|| derived_source(vapor_pressure_deficit(t, rh), "vpd"));
        metrics
            .entry("dew_point".to_string())
            .or_insert_with(|| derived_source(dew_point(t, rh), "dew_point"));
        metrics
            .entry("heat_index".to_string())
            .or_insert_with(|| derived_source(heat_index(t, rh), "heat_index"));
    }

    fn update_trends(&self, state: &mut ArbitratorState, unit_id: i64, metrics: &mut BTreeMap<String, SnapshotMetric>) {
        for (metric, snapshot_metric) in metrics.iter_mut() {
            let key = (unit_id, metric.clone());
            let previous = state.previous_value.get(&key).copied();
            let (trend, delta) = match previous {
                None => (Trend::Unknown, None),
                Some(prev) => {
                    let delta = round_to(snapshot_metric.value - prev, 3);
                    let trend = if delta.abs() <= TREND_STABLE_THRESHOLD {
                        Trend::Stable
                    } else if delta > 0.0 {
                        Trend::Rising
                    } else {
                        Trend::Falling
                    };
                    (trend, Some(delta))
                }
            };
            snapshot_metric.trend = trend;
            snapshot_metric.trend_delta = delta;
            state.previous_value.insert(key, snapshot_metric.value);
        }
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
