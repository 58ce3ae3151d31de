//! C5 — Enricher: derived psychrometrics and quality score.
//!
//! Grounded on
//! `original_source/app/hardware/sensors/processors/enrichment_processor.py`
//! for the quality-score formula and overall shape; the psychrometric
//! formulas themselves are not present in `original_source/` (the referenced
//! `psychrometrics.py` was filtered out of the retrieval pack) and are
//! implemented directly from SPEC_FULL.md §4.5.

use crate::core::domain::reading::Reading;

/// Saturation vapor pressure (kPa) via the Magnus-Tetens approximation.
/// Valid roughly -45 to 60 °C.
fn saturation_vapor_pressure_kpa(temp_c: f64) -> f64 {
    0.61094 * ((17.625 * temp_c) / (temp_c + 243.04)).exp()
}

/// Vapor-pressure deficit in kPa, clamped to >= 0, rounded to 3 decimals.
pub fn vapor_pressure_deficit(temp_c: f64, rh_pct: f64) -> f64 {
    let es = saturation_vapor_pressure_kpa(temp_c);
    let ea = es * (rh_pct / 100.0);
    round_to(f64::max(es - ea, 0.0), 3)
}

/// Dew point in °C via the inverted Magnus formula, rounded to 2 decimals.
pub fn dew_point(temp_c: f64, rh_pct: f64) -> f64 {
    let rh = rh_pct.max(0.0001) / 100.0;
    let gamma = rh.ln() + (17.625 * temp_c) / (243.04 + temp_c);
    round_to(243.04 * gamma / (17.625 - gamma), 2)
}

/// Heat index in °C. Uses the NOAA Rothfusz regression when valid
/// (T >= 26 °C, RH >= 40%), else falls back to the simplified Steadman
/// approximation so a value is always available whenever temperature and
/// humidity are both present and finite.
pub fn heat_index(temp_c: f64, rh_pct: f64) -> f64 {
    let temp_f = celsius_to_fahrenheit(temp_c);
    let hi_f = if temp_c >= 26.0 && rh_pct >= 40.0 {
        rothfusz_regression(temp_f, rh_pct)
    } else {
        steadman_approximation(temp_f, rh_pct)
    };
    round_to(fahrenheit_to_celsius(hi_f), 2)
}

fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

fn steadman_approximation(temp_f: f64, rh_pct: f64) -> f64 {
    0.5 * (temp_f + 61.0 + (temp_f - 68.0) * 1.2 + rh_pct * 0.094)
}

fn rothfusz_regression(t: f64, r: f64) -> f64 {
    let mut hi = -42.379 + 2.04901523 * t + 10.14333127 * r - 0.22475541 * t * r
        - 0.00683783 * t * t
        - 0.05481717 * r * r
        + 0.00122874 * t * t * r
        + 0.00085282 * t * r * r
        - 0.00000199 * t * t * r * r;

    if r < 13.0 && (80.0..=112.0).contains(&t) {
        let adjustment = ((13.0 - r) / 4.0) * ((17.0 - (t - 95.0).abs()) / 17.0).sqrt();
        hi -= adjustment;
    } else if r > 85.0 && (80.0..=87.0).contains(&t) {
        let adjustment = ((r - 85.0) / 10.0) * ((87.0 - t) / 5.0);
        hi += adjustment;
    }
    hi
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Compute derived metrics and append them to the reading's data map in
/// place, when both `temperature` and `humidity` are present and the
/// reading is not in error. Returns the set of metric names actually added.
pub fn enrich_derived_metrics(reading: &mut Reading) -> Vec<&'static str> {
    let mut added = Vec::new();
    if reading.has_error() {
        return added;
    }
    let (Some(t), Some(rh)) = (reading.get("temperature"), reading.get("humidity")) else {
        return added;
    };
    if !t.is_finite() || !rh.is_finite() {
        return added;
    }

    reading.data.insert("vpd".to_string(), vapor_pressure_deficit(t, rh));
    added.push("vpd");
    reading.data.insert("dew_point".to_string(), dew_point(t, rh));
    added.push("dew_point");
    reading.data.insert("heat_index".to_string(), heat_index(t, rh));
    added.push("heat_index");

    added
}

/// Quality score in [0,1], per SPEC_FULL.md §4.5, rounded to 3 decimals.
pub fn quality_score(
    reading: &Reading,
    expected_field_count: usize,
    present_field_count: usize,
    battery: Option<i64>,
    linkquality: Option<i64>,
    has_error: bool,
) -> f64 {
    let mut score = 1.0;

    let completeness = if expected_field_count == 0 {
        1.0
    } else {
        present_field_count as f64 / expected_field_count as f64
    };
    score *= completeness;

    if let Some(b) = battery {
        if b < 20 {
            score *= 0.7;
        } else if b < 50 {
            score *= 0.9;
        }
    }
    if let Some(lq) = linkquality {
        if lq < 50 {
            score *= 0.7;
        } else if lq < 100 {
            score *= 0.9;
        }
    }
    if has_error || reading.has_error() {
        score *= 0.3;
    }

    round_to(score.clamp(0.0, 1.0), 3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(25.0, 60.0; "typical indoor conditions")]
    #[test_case(20.0, 40.0; "cooler drier conditions")]
    fn vpd_is_nonnegative(t: f64, rh: f64) {
        assert!(vapor_pressure_deficit(t, rh) >= 0.0);
    }

    #[test]
    fn dew_point_is_below_temperature_for_unsaturated_air() {
        let dp = dew_point(25.0, 50.0);
        assert!(dp < 25.0);
    }

    #[test]
    fn heat_index_uses_rothfusz_above_threshold() {
        // 32C/90% should trigger the full regression path and exceed actual temp.
        let hi = heat_index(32.0, 90.0);
        assert!(hi > 32.0);
    }

    #[test]
    fn heat_index_falls_back_below_threshold() {
        let hi = heat_index(15.0, 30.0);
        assert!(hi.is_finite());
    }

    #[test]
    fn quality_score_penalizes_low_battery_and_linkquality() {
        let reading = sample_reading();
        let full = quality_score(&reading, 2, 2, Some(100), Some(100), false);
        let penalized = quality_score(&reading, 2, 2, Some(10), Some(10), false);
        assert!(penalized < full);
    }

    #[test]
    fn quality_score_penalizes_error() {
        let reading = sample_reading();
        let score = quality_score(&reading, 2, 2, Some(100), Some(100), true);
        assert!((score - 0.3).abs() < 1e-9);
    }

    fn sample_reading() -> Reading {
        use crate::core::domain::reading::ReadingStatus;
        use crate::core::domain::sensor::SensorCategory;
        use std::collections::BTreeMap;
        Reading {
            sensor_id: 1,
            unit_id: 1,
            category: SensorCategory::Environmental,
            sensor_name: "s".into(),
            data: BTreeMap::new(),
            timestamp: chrono::Utc::now(),
            status: ReadingStatus::Success,
            quality_score: None,
            is_anomaly: false,
            anomaly_reason: None,
            calibration_applied: false,
        }
    }
}
