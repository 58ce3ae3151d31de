//! Layered application configuration.
//!
//! Grounded on the teacher's `Config::builder()` / `set_default` / `File` +
//! `Environment` layering pattern. Layering order: built-in defaults ->
//! `config/default.toml` -> `config/<SYSGROW_ENV>.toml` (if set) ->
//! `SYSGROW_`-prefixed environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::application::arbitrator::ArbitratorConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub arbitrator: ArbitratorConfig,
    pub polling: PollingConfig,
    pub logging: LoggingConfig,
}

/// MQTT broker connection and identity-resolution cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_seconds: u64,

    /// TTL for the router's resolved-identity cache.
    pub identity_cache_ttl_seconds: u64,
    /// Max entries kept in the identity cache before LRU eviction.
    pub identity_cache_max_entries: usize,
    /// Minimum gap between repeated "unknown device" log lines for the same topic.
    pub unknown_device_log_cooldown_seconds: u64,
}

/// Local hardware polling engine settings (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    pub interval_seconds: u64,
    pub base_backoff_seconds: u64,
    pub max_backoff_seconds: u64,
    pub hardware_read_timeout_seconds: u64,
    pub stop_grace_period_seconds: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from defaults, `config/default.toml`, an optional
    /// `config/<SYSGROW_ENV>.toml`, and `SYSGROW_`-prefixed env vars.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("mqtt.broker_host", "localhost")?
            .set_default("mqtt.broker_port", 1883)?
            .set_default("mqtt.client_id", "sysgrow-sensor-core")?
            .set_default("mqtt.keep_alive_seconds", 30)?
            .set_default("mqtt.identity_cache_ttl_seconds", 300)?
            .set_default("mqtt.identity_cache_max_entries", 256)?
            .set_default("mqtt.unknown_device_log_cooldown_seconds", 600)?
            .set_default("arbitrator.stale_seconds", 180)?
            .set_default("arbitrator.max_tracked_sensors", 500)?
            .set_default("polling.interval_seconds", 10)?
            .set_default("polling.base_backoff_seconds", 5)?
            .set_default("polling.max_backoff_seconds", 600)?
            .set_default("polling.hardware_read_timeout_seconds", 5)?
            .set_default("polling.stop_grace_period_seconds", 5)?
            .set_default("logging.level", "info")?
            .set_default("logging.json_format", false)?;

        if let Ok(env) = std::env::var("SYSGROW_ENV") {
            builder = builder.add_source(File::with_name(&format!("config/{env}")).required(false));
        }
        builder = builder.add_source(File::with_name("config/default").required(false));

        builder = builder.add_source(
            Environment::with_prefix("SYSGROW")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(10..=3600).contains(&self.arbitrator.stale_seconds) {
            return Err(ConfigError::Message(format!(
                "arbitrator.stale_seconds must be in [10, 3600], got {}",
                self.arbitrator.stale_seconds
            )));
        }
        if !(10..=10_000).contains(&self.arbitrator.max_tracked_sensors) {
            return Err(ConfigError::Message(format!(
                "arbitrator.max_tracked_sensors must be in [10, 10000], got {}",
                self.arbitrator.max_tracked_sensors
            )));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                broker_host: "localhost".to_string(),
                broker_port: 1883,
                client_id: "sysgrow-sensor-core".to_string(),
                username: None,
                password: None,
                keep_alive_seconds: 30,
                identity_cache_ttl_seconds: 300,
                identity_cache_max_entries: 256,
                unknown_device_log_cooldown_seconds: 600,
            },
            arbitrator: ArbitratorConfig {
                stale_seconds: 180,
                max_tracked_sensors: 500,
            },
            polling: PollingConfig {
                interval_seconds: 10,
                base_backoff_seconds: 5,
                max_backoff_seconds: 600,
                hardware_read_timeout_seconds: 5,
                stop_grace_period_seconds: 5,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json_format: false,
                log_dir: None,
            },
        }
    }
}
