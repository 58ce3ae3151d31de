//! Infrastructure layer: configuration, logging, the MQTT router (C8), the
//! local hardware polling engine (C9), the broadcast surface (C11), and the
//! internal event bus (C12).
//!
//! `ServiceContainer` is the single construction point for the wiring
//! between the core application layer (registry/arbitrator/pipeline) and
//! these infrastructure adapters — no ad-hoc global state.

pub mod broadcast;
pub mod config;
pub mod event_bus;
pub mod logging;
pub mod mqtt_router;
pub mod polling;

use std::sync::Arc;

use crate::core::application::arbitrator::PriorityArbitrator;
use crate::core::application::registry::SensorRegistry;
use crate::core::application::Pipeline;
use broadcast::{BroadcastSink, BroadcastTransport, InMemoryTransport};
use config::AppConfig;
use event_bus::EventBus;
use mqtt_router::MqttRouter;
use polling::{HardwareReader, PollingEngine};

pub use config::AppConfig as Config;
pub use logging::{init_logging, log_metrics, request_logger, scope_guard};

/// Wires the registry, arbitrator, pipeline, and the infrastructure
/// adapters together. Constructed once at startup.
pub struct ServiceContainer {
    pub registry: Arc<SensorRegistry>,
    pub arbitrator: Arc<PriorityArbitrator>,
    pub pipeline: Arc<Pipeline>,
    pub broadcast: Arc<BroadcastSink>,
    pub event_bus: Arc<EventBus>,
    pub mqtt_router: Arc<MqttRouter>,
    pub polling: Arc<PollingEngine>,
    pub config: AppConfig,
}

impl ServiceContainer {
    pub fn new(config: AppConfig, transport: Box<dyn BroadcastTransport>, hardware_reader: Arc<dyn HardwareReader>) -> Self {
        let registry = Arc::new(SensorRegistry::new());
        let arbitrator = Arc::new(PriorityArbitrator::new(config.arbitrator, registry.clone()));
        let pipeline = Arc::new(Pipeline::new(registry.clone(), arbitrator.clone()));
        let broadcast = Arc::new(BroadcastSink::new(transport));
        let event_bus = Arc::new(EventBus::new());

        let mqtt_router = MqttRouter::new(pipeline.clone(), broadcast.clone(), event_bus.clone(), config.mqtt.clone());
        let polling = PollingEngine::new(
            pipeline.clone(),
            broadcast.clone(),
            event_bus.clone(),
            hardware_reader,
            config.polling.clone(),
        );

        Self {
            registry,
            arbitrator,
            pipeline,
            broadcast,
            event_bus,
            mqtt_router,
            polling,
            config,
        }
    }

    /// Convenience constructor for tests and the default runtime wiring:
    /// an in-memory broadcast transport with no real push destination.
    pub fn with_in_memory_broadcast(config: AppConfig, hardware_reader: Arc<dyn HardwareReader>) -> Self {
        Self::new(config, Box::new(InMemoryTransport::new()), hardware_reader)
    }
}
