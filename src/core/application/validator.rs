//! C2 — Validator.
//!
//! Grounded on
//! `original_source/app/hardware/sensors/processors/validation_processor.py`.

use std::collections::BTreeMap;

use crate::core::domain::errors::PipelineError;
use crate::core::domain::sensor::SensorCategory;
use crate::core::domain::value::Value;

struct RangeRule {
    metric: &'static str,
    min: f64,
    max: f64,
}

const ENVIRONMENTAL_RULES: &[RangeRule] = &[
    RangeRule { metric: "temperature", min: -40.0, max: 85.0 },
    RangeRule { metric: "humidity", min: 0.0, max: 100.0 },
    RangeRule { metric: "co2", min: 0.0, max: 10_000.0 },
    RangeRule { metric: "pressure", min: 300.0, max: 1_100.0 },
    RangeRule { metric: "lux", min: 0.0, max: 200_000.0 },
];

const PLANT_RULES: &[RangeRule] = &[
    RangeRule { metric: "soil_moisture", min: 0.0, max: 100.0 },
    RangeRule { metric: "ph", min: 0.0, max: 14.0 },
    RangeRule { metric: "ec", min: 0.0, max: 20.0 },
    RangeRule { metric: "temperature", min: -40.0, max: 85.0 },
    RangeRule { metric: "humidity", min: 0.0, max: 100.0 },
];

fn rules_for(category: SensorCategory) -> &'static [RangeRule] {
    match category {
        SensorCategory::Environmental => ENVIRONMENTAL_RULES,
        SensorCategory::Plant => PLANT_RULES,
    }
}

/// Distinct metric names expected for a category, used by the enricher's
/// completeness term in the quality-score formula.
pub fn expected_fields(category: SensorCategory) -> Vec<&'static str> {
    let mut seen = Vec::new();
    for rule in rules_for(category) {
        if !seen.contains(&rule.metric) {
            seen.push(rule.metric);
        }
    }
    seen
}

/// Validate a standardized field map. Returns the first critical violation
/// as an error (halting the pipeline); non-critical range violations are
/// logged by the caller via the returned warnings list and otherwise ignored.
pub fn validate(
    data: &BTreeMap<String, Value>,
    category: SensorCategory,
    sensor_id: i64,
) -> Result<Vec<String>, PipelineError> {
    if data.contains_key("error") {
        return Err(PipelineError::DataInvalid {
            sensor_id,
            reason: "payload carries an 'error' field".into(),
        });
    }

    let mut warnings = Vec::new();
    for rule in rules_for(category) {
        if let Some(value) = data.get(rule.metric).and_then(Value::as_f64) {
            if value < rule.min || value > rule.max {
                warnings.push(format!(
                    "{} = {value} out of range [{}, {}]",
                    rule.metric, rule.min, rule.max
                ));
            }
        }
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn data(pairs: &[(&str, f64)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::Number(*v)))
            .collect()
    }

    #[test]
    fn error_field_is_always_critical() {
        let mut d = data(&[("temperature", 20.0)]);
        d.insert("error".to_string(), Value::Text("boom".into()));
        let result = validate(&d, SensorCategory::Environmental, 1);
        assert!(result.is_err());
    }

    #[rstest]
    #[case(SensorCategory::Environmental, "temperature", 999.0)]
    #[case(SensorCategory::Environmental, "humidity", -1.0)]
    #[case(SensorCategory::Plant, "soil_moisture", 200.0)]
    #[case(SensorCategory::Plant, "ph", 20.0)]
    #[case(SensorCategory::Plant, "ec", 50.0)]
    fn out_of_range_is_noncritical_warning(
        #[case] category: SensorCategory,
        #[case] metric: &str,
        #[case] value: f64,
    ) {
        let d = data(&[(metric, value)]);
        let warnings = validate(&d, category, 1).unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn missing_field_is_not_a_violation() {
        let d = data(&[("temperature", 20.0)]);
        let warnings = validate(&d, SensorCategory::Plant, 1).unwrap();
        assert!(warnings.is_empty());
    }
}
