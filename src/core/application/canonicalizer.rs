//! C1 — Field canonicalizer.
//!
//! Grounded on
//! `original_source/app/hardware/sensors/processors/transformation_processor.py::standardize_fields`.

use std::collections::{BTreeMap, HashSet};

use crate::core::domain::metrics::{get_standard_field, is_meta_key};
use crate::core::domain::value::Value;

/// Standardize field names and flatten nested payloads.
///
/// - Each key is trimmed and alias-resolved to a canonical name (or passed
///   through lowercased if unrecognized).
/// - Object leaves are flattened by extracting `value` or `<key>_value`;
///   otherwise the object is preserved for downstream stages to drop.
/// - Recognized meta keys (`battery`, `linkquality`, `report_interval`) are
///   preserved verbatim under their own (lowercase) key.
pub fn standardize_fields(
    raw: &BTreeMap<String, Value>,
    meta_keys: &HashSet<String>,
) -> BTreeMap<String, Value> {
    let mut sanitized = BTreeMap::new();

    for (k, v) in raw {
        let raw_key = k.trim().to_string();
        let normalized_key = raw_key.to_lowercase();

        if meta_keys.contains(&normalized_key) || is_meta_key(&normalized_key) {
            sanitized.insert(normalized_key, v.clone());
            continue;
        }

        let std_key = get_standard_field(&raw_key);
        match v {
            Value::Object(obj) => {
                let sub_val = obj
                    .get("value")
                    .or_else(|| obj.get(&format!("{std_key}_value")))
                    .or_else(|| obj.get(&format!("{raw_key}_value")));
                match sub_val {
                    Some(val) => {
                        sanitized.insert(std_key, val.clone());
                    }
                    None => {
                        sanitized.insert(std_key, v.clone());
                    }
                }
            }
            other => {
                sanitized.insert(std_key, other.clone());
            }
        }
    }

    sanitized
}

pub fn default_meta_keys() -> HashSet<String> {
    ["battery", "linkquality", "report_interval"]
        .into_iter()
        .map(String::from)
        .collect()
}
