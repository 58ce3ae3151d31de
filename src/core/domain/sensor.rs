//! Configured sensor entity and its immutable configuration.
//!
//! Grounded on `original_source/app/domain/sensors/sensor_entity.py` and
//! `sensor_config.py`.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::core::domain::calibration::CalibrationRecord;

/// Sensor category. Determines which validator rule set and which auto-priority
/// tier applies, independent of transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorCategory {
    Environmental,
    Plant,
}

impl SensorCategory {
    /// Legacy spellings map onto the two current categories; anything else is
    /// a decode error rather than a silently-accepted value (SPEC_FULL §9).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "environmental" | "environment" | "climate" => Some(SensorCategory::Environmental),
            "plant" | "soil" | "substrate" => Some(SensorCategory::Plant),
            _ => None,
        }
    }
}

/// Transport protocol for a configured sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Gpio,
    I2c,
    Adc,
    Spi,
    Onewire,
    Mqtt,
    Zigbee,
    Zigbee2mqtt,
    Wireless,
    Http,
    Modbus,
}

impl Protocol {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "gpio" => Some(Protocol::Gpio),
            "i2c" => Some(Protocol::I2c),
            "adc" => Some(Protocol::Adc),
            "spi" => Some(Protocol::Spi),
            "onewire" | "1-wire" | "one_wire" => Some(Protocol::Onewire),
            "mqtt" => Some(Protocol::Mqtt),
            "zigbee" => Some(Protocol::Zigbee),
            "zigbee2mqtt" => Some(Protocol::Zigbee2mqtt),
            "wireless" | "wifi" | "esp32" => Some(Protocol::Wireless),
            "http" => Some(Protocol::Http),
            "modbus" => Some(Protocol::Modbus),
            _ => None,
        }
    }

    /// Canonical wire name, used when a protocol must be embedded in an
    /// outbound payload from the allowed-protocol set, or `other` otherwise.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Protocol::Gpio => "gpio",
            Protocol::I2c => "i2c",
            Protocol::Adc => "adc",
            Protocol::Spi => "spi",
            Protocol::Onewire => "onewire",
            Protocol::Mqtt => "mqtt",
            Protocol::Zigbee => "zigbee",
            Protocol::Zigbee2mqtt => "zigbee2mqtt",
            Protocol::Wireless => "wireless",
            Protocol::Http => "http",
            Protocol::Modbus => "modbus",
        }
    }

    /// Protocols polled locally by the polling engine (C9).
    pub fn is_locally_polled(&self) -> bool {
        matches!(
            self,
            Protocol::Gpio | Protocol::I2c | Protocol::Adc | Protocol::Spi | Protocol::Onewire
        )
    }

    pub fn is_wireless(&self) -> bool {
        matches!(
            self,
            Protocol::Mqtt | Protocol::Zigbee | Protocol::Zigbee2mqtt | Protocol::Wireless
        )
    }
}

/// Immutable, protocol-agnostic sensor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorConfig {
    pub unit: String,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub precision: Option<u32>,
    pub read_interval_s: Option<u64>,

    /// Metrics this sensor is authoritative for; drives election priority.
    pub primary_metrics: HashSet<String>,

    pub gpio_pin: Option<u32>,
    pub i2c_bus: Option<u32>,
    pub i2c_address: Option<String>,
    pub adc_channel: Option<u32>,

    pub mqtt_topic: Option<String>,
    pub zigbee_ieee: Option<String>,
    pub zigbee_friendly_name: Option<String>,
    pub mac_address: Option<String>,
    pub modbus_address: Option<u32>,
    pub modbus_slave_id: Option<u32>,

    pub poll_interval_s: Option<u64>,
    pub timeout_s: Option<u64>,

    pub min_threshold: Option<f64>,
    pub max_threshold: Option<f64>,

    pub extra_config: HashMap<String, String>,
}

impl SensorConfig {
    pub fn friendly_name(&self) -> Option<&str> {
        self.extra_config
            .get("friendly_name")
            .map(String::as_str)
            .or(self.zigbee_friendly_name.as_deref())
    }

    pub fn declares_primary(&self, metric: &str) -> bool {
        self.primary_metrics.contains(metric)
    }
}

/// A registered sensor. Owned exclusively by the sensor registry (C10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sensor {
    pub id: i64,
    pub unit_id: i64,
    pub name: String,
    pub category: SensorCategory,
    pub protocol: Protocol,
    pub model: String,
    pub config: SensorConfig,
    pub calibration: Option<CalibrationRecord>,
}

impl Sensor {
    pub fn is_soil_sensor(&self) -> bool {
        matches!(self.category, SensorCategory::Plant)
    }

    pub fn is_environment_sensor(&self) -> bool {
        matches!(self.category, SensorCategory::Environmental)
    }

    pub fn has_calibration(&self) -> bool {
        self.calibration.is_some()
    }
}
