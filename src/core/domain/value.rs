//! Tagged-union value type for decoded-but-not-yet-canonicalized payload leaves.
//!
//! Grounded on SPEC_FULL.md §9 ("Dynamic payload shapes"): the source uses
//! untyped dictionaries; the target represents each leaf as one of a small
//! closed set of shapes rather than an open `serde_json::Value`.

use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::collections::BTreeMap;

/// A single decoded leaf value from an inbound MQTT or hardware-read payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Text(String),
    /// Multi-channel readings (e.g. soil probes with several moisture channels).
    ListOfObject(Vec<BTreeMap<String, Value>>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Number(_))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Decode a raw JSON object into a `map<string, Value>`, dropping nothing —
/// the canonicalizer (C1) is responsible for flattening/dropping, not decode.
pub fn decode_payload(raw: &serde_json::Value) -> Option<BTreeMap<String, Value>> {
    let obj: &Map<String, serde_json::Value> = raw.as_object()?;
    let mut out = BTreeMap::new();
    for (k, v) in obj {
        out.insert(k.clone(), json_to_value(v));
    }
    Some(out)
}

fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Array(items) => {
            let objs = items
                .iter()
                .filter_map(|item| item.as_object())
                .map(|obj| {
                    obj.iter()
                        .map(|(k, v)| (k.clone(), json_to_value(v)))
                        .collect::<BTreeMap<_, _>>()
                })
                .collect();
            Value::ListOfObject(objs)
        }
        serde_json::Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), json_to_value(v)))
                .collect(),
        ),
        serde_json::Value::Null => Value::Text(String::new()),
    }
}
