//! Per-sensor health state, owned by the local polling engine (C9).
//!
//! Grounded on `original_source/app/domain/sensors/health_status.py` and
//! `app/services/hardware/sensor_polling_service.py`'s `SensorHealth`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Health tracking record for one locally-polled sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorHealth {
    pub status: HealthLevel,
    pub last_seen: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub backoff_until: Option<DateTime<Utc>>,
}

impl Default for SensorHealth {
    fn default() -> Self {
        Self {
            status: HealthLevel::Unknown,
            last_seen: None,
            consecutive_failures: 0,
            last_error: None,
            backoff_until: None,
        }
    }
}

/// Failures after which a sensor is considered unhealthy (§7).
pub const UNHEALTHY_FAILURE_THRESHOLD: u32 = 10;

impl SensorHealth {
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.status = HealthLevel::Healthy;
        self.last_seen = Some(now);
        self.consecutive_failures = 0;
        self.last_error = None;
        self.backoff_until = None;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>, error: String, backoff_until: DateTime<Utc>) {
        self.consecutive_failures += 1;
        self.last_error = Some(error);
        self.backoff_until = Some(backoff_until);
        self.status = if self.consecutive_failures >= UNHEALTHY_FAILURE_THRESHOLD {
            HealthLevel::Unhealthy
        } else {
            HealthLevel::Healthy
        };
    }

    pub fn is_in_backoff(&self, now: DateTime<Utc>) -> bool {
        self.backoff_until.map(|t| now < t).unwrap_or(false)
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthLevel::Healthy | HealthLevel::Unknown)
    }
}
