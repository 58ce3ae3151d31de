use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    EnvFilter,
    layer::SubscriberExt,
    Registry,
};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use anyhow::Result;

use crate::infrastructure::config::LoggingConfig;

/// Initialize logging infrastructure: console (plain or bunyan JSON) plus an
/// optional daily-rotating file sink, gated by an `EnvFilter`.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let subscriber = Registry::default();

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE);

    let subscriber = if config.json_format {
        subscriber
            .with(JsonStorageLayer)
            .with(BunyanFormattingLayer::new("sysgrow-sensor-core".into(), std::io::stdout))
    } else {
        subscriber.with(console_layer)
    };

    let subscriber = if let Some(log_dir) = &config.log_dir {
        let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "sysgrow.log");
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(non_blocking);

        subscriber.with(file_layer)
    } else {
        subscriber
    };

    tracing::subscriber::set_global_default(subscriber.with(env_filter))?;

    Ok(())
}

/// Create a logging guard for a specific scope.
pub fn scope_guard(name: &str) -> impl Drop {
    tracing::info_span!("scope", name = name).entered()
}

/// Log periodic component counters (ingest/evictions/cache hits, etc). Never
/// exported to an external metrics backend; tracing is the only sink.
pub fn log_metrics(operation: &str, duration_ms: u64, success: bool, metadata: Option<serde_json::Value>) {
    if success {
        tracing::info!(
            operation = operation,
            duration_ms = duration_ms,
            metadata = ?metadata,
            "operation completed"
        );
    } else {
        tracing::error!(
            operation = operation,
            duration_ms = duration_ms,
            metadata = ?metadata,
            "operation failed"
        );
    }
}

/// Create a request-scoped logger for MQTT message handling.
pub fn request_logger() -> impl Fn(String) + Clone {
    |topic: String| {
        let start = std::time::Instant::now();
        let span = tracing::info_span!(
            "mqtt_message",
            topic = %topic,
            message_id = %uuid::Uuid::new_v4(),
        );
        let _enter = span.enter();

        move || {
            let duration = start.elapsed();
            tracing::info!(duration_ms = duration.as_millis() as u64, "message processed");
        }
    }
}
