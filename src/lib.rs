pub mod core;
pub mod infrastructure;

use std::sync::Arc;
use std::time::Duration;

use infrastructure::config::AppConfig;
use infrastructure::polling::HardwareReader;
use infrastructure::ServiceContainer;

/// Construct the service container and drive the MQTT router and the local
/// polling engine until `shutdown` resolves. `hardware_reader` is the
/// production gpio/i2c/adc/spi/onewire implementation; pass a no-op reader
/// when no sensor in the fleet is locally polled.
pub async fn run(hardware_reader: Arc<dyn HardwareReader>, shutdown: impl std::future::Future<Output = ()>) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    infrastructure::init_logging(&config.logging)?;
    tracing::info!("sysgrow sensor core starting");

    let stop_grace_period = Duration::from_secs(config.polling.stop_grace_period_seconds);
    let container = ServiceContainer::with_in_memory_broadcast(config, hardware_reader);

    let mqtt_client = container.mqtt_router.connect().await?;
    let polling_engine = container.polling.clone();
    let polling_handle = tokio::spawn(polling_engine.clone().run());

    shutdown.await;
    tracing::info!("shutdown requested");

    polling_engine.request_stop();
    let _ = tokio::time::timeout(stop_grace_period, polling_handle).await;
    drop(mqtt_client);

    tracing::info!("sysgrow sensor core stopped");
    Ok(())
}
