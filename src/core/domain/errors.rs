//! Domain-specific error types for the sensor ingestion and arbitration pipeline.
//!
//! One variant per failure kind named in the error handling design, each carrying
//! the structured key set (`sensor_id`, `topic`, `source`, `kind`) needed for the
//! log line that reports it.

use thiserror::Error;

/// Errors raised while running the per-sensor processing pipeline (C1-C6) or
/// while resolving identity in the MQTT router (C8).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A critical validation rule failed (e.g. an `error` field present, or a
    /// range rule flagged critical).
    #[error("data invalid for sensor {sensor_id}: {reason}")]
    DataInvalid { sensor_id: i64, reason: String },

    /// Inbound MQTT identity could not be resolved to a configured sensor.
    #[error("identity unresolved for friendly name '{friendly_name}' on topic {topic}")]
    IdentityUnresolved { friendly_name: String, topic: String },

    /// A resolved sensor carries no usable unit context (`unit_id <= 0`).
    #[error("missing unit context for sensor {sensor_id}")]
    InvalidUnitContext { sensor_id: i64 },

    /// A calibration record could not be applied (missing parameters).
    #[error("calibration failed for sensor {sensor_id}, field '{field}': {reason}")]
    CalibrationFailed {
        sensor_id: i64,
        field: String,
        reason: String,
    },

    /// Payload decoding failed (non-UTF-8, non-JSON, or non-object body).
    #[error("payload decode error on topic {topic}: {reason}")]
    PayloadDecode { topic: String, reason: String },

    /// MQTT transport-level failure (disconnect, subscribe failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// Catch-all for conditions not covered by a dedicated variant.
    #[error("pipeline error: {0}")]
    Other(String),
}

impl PipelineError {
    /// Stable `kind` tag used as a structured logging/metrics key.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::DataInvalid { .. } => "data_invalid",
            PipelineError::IdentityUnresolved { .. } => "unregistered",
            PipelineError::InvalidUnitContext { .. } => "dropped_invalid_unit",
            PipelineError::CalibrationFailed { .. } => "calibration_failed",
            PipelineError::PayloadDecode { .. } => "invalid_payload",
            PipelineError::Transport(_) => "transport_error",
            PipelineError::Other(_) => "other",
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::PayloadDecode {
            topic: String::new(),
            reason: err.to_string(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_for_each_variant() {
        assert_eq!(
            PipelineError::DataInvalid {
                sensor_id: 1,
                reason: "x".into()
            }
            .kind(),
            "data_invalid"
        );
        assert_eq!(
            PipelineError::IdentityUnresolved {
                friendly_name: "a".into(),
                topic: "t".into()
            }
            .kind(),
            "unregistered"
        );
        assert_eq!(
            PipelineError::InvalidUnitContext { sensor_id: 1 }.kind(),
            "dropped_invalid_unit"
        );
    }
}
