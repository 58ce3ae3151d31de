//! The closed canonical metric vocabulary and the vendor-spelling alias table.
//!
//! Grounded on `original_source/app/domain/sensors/fields.py`.

use std::collections::HashMap;
use std::sync::OnceLock;

/// A canonical metric name, the only keys accepted past the canonicalizer.
pub const CANONICAL_METRICS: &[&str] = &[
    "temperature",
    "humidity",
    "soil_moisture",
    "co2",
    "voc",
    "air_quality",
    "ec",
    "ph",
    "smoke",
    "pressure",
    "lux",
    "full_spectrum",
    "infrared",
    "visible",
    "battery",
    "linkquality",
];

/// Metrics added by the enricher; not present on raw payloads.
pub const DERIVED_METRICS: &[&str] = &["vpd", "dew_point", "heat_index"];

/// Non-metric fields preserved verbatim through the pipeline.
pub const META_KEYS: &[&str] = &["battery", "linkquality", "report_interval"];

/// The subset of canonical + derived metrics that appear on a dashboard snapshot.
pub const DASHBOARD_METRICS: &[&str] = &[
    "temperature",
    "humidity",
    "soil_moisture",
    "co2",
    "voc",
    "air_quality",
    "ec",
    "ph",
    "smoke",
    "pressure",
    "lux",
    "full_spectrum",
    "infrared",
    "visible",
    "vpd",
    "dew_point",
    "heat_index",
];

/// "Air" metrics participate in the environmental-vs-plant auto-priority split.
pub const AIR_METRICS: &[&str] = &["temperature", "humidity", "pressure", "co2", "voc", "air_quality"];

pub fn is_meta_key(key: &str) -> bool {
    META_KEYS.contains(&key)
}

pub fn is_canonical_metric(key: &str) -> bool {
    CANONICAL_METRICS.contains(&key) || DERIVED_METRICS.contains(&key)
}

pub fn is_dashboard_metric(key: &str) -> bool {
    DASHBOARD_METRICS.contains(&key)
}

pub fn is_air_metric(key: &str) -> bool {
    AIR_METRICS.contains(&key)
}

fn alias_table() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert("temp", "temperature");
        m.insert("temperature_c", "temperature");
        m.insert("temperature_f", "temperature");
        m.insert("humidity_percent", "humidity");
        m.insert("rh", "humidity");
        m.insert("soil moisture", "soil_moisture");
        m.insert("soilmoisture", "soil_moisture");
        m.insert("moisture", "soil_moisture");
        m.insert("moisture_percentage", "soil_moisture");
        m.insert("co2_ppm", "co2");
        m.insert("eco2", "co2");
        m.insert("co2eq", "co2");
        m.insert("tvoc", "voc");
        m.insert("voc_ppb", "voc");
        m.insert("air_quality_index", "air_quality");
        m.insert("aqi", "air_quality");
        m.insert("conductivity", "ec");
        m.insert("ec_ms", "ec");
        m.insert("ph_level", "ph");
        m.insert("smoke_detected", "smoke");
        m.insert("pressure_hpa", "pressure");
        m.insert("barometric_pressure", "pressure");
        m.insert("illuminance", "lux");
        m.insert("illuminance_lux", "lux");
        m.insert("light", "lux");
        m.insert("full_spectrum_lux", "full_spectrum");
        m.insert("ir", "infrared");
        m.insert("infrared_lux", "infrared");
        m.insert("vis", "visible");
        m.insert("visible_lux", "visible");
        m.insert("battery_percent", "battery");
        m.insert("battery_level", "battery");
        m.insert("linkquality_lqi", "linkquality");
        m.insert("lqi", "linkquality");
        m
    })
}

/// Normalize a vendor field name to a canonical metric (or meta key) name.
///
/// Unknown keys pass through lowercased and trimmed, so downstream stages can
/// safely ignore them instead of erroring.
pub fn get_standard_field(key: &str) -> String {
    let normalized = key.trim().to_lowercase();
    alias_table()
        .get(normalized.as_str())
        .map(|v| v.to_string())
        .unwrap_or(normalized)
}

/// Fixed unit-string table for the outbound device/dashboard payloads.
pub fn unit_for_metric(metric: &str) -> &'static str {
    match metric {
        "temperature" => "°C",
        "humidity" => "%",
        "soil_moisture" => "%",
        "pressure" => "hPa",
        "co2" => "ppm",
        "voc" => "ppb",
        "air_quality" => "",
        "lux" | "full_spectrum" | "infrared" | "visible" => "lx",
        "ec" => "mS/cm",
        "ph" => "",
        "smoke" => "",
        "vpd" => "kPa",
        "dew_point" => "°C",
        "heat_index" => "°C",
        "battery" => "%",
        "linkquality" => "lqi",
        _ => "",
    }
}
