//! C12 — Internal event bus.
//!
//! A synchronous, in-process pub/sub bus. Handlers run on the publisher's
//! thread; a panicking handler is caught and logged, never propagated, so
//! one misbehaving subscriber can't take down the router or polling loop.
//! Grounded on the registry's `on_event`/`listeners` pattern
//! (`core::application::registry`), generalized to a typed event enum.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::error;

use crate::core::domain::payloads::ControllerEvent;

/// Every event the bus carries. Controller events use the stable names in
/// `core::application::pipeline::event_names`; device lifecycle and bridge
/// events use the `device.*` names alongside them.
#[derive(Debug, Clone)]
pub enum Event {
    Controller(ControllerEvent),
    SensorCreated { sensor_id: i64 },
    SensorDeleted { sensor_id: i64 },
    AvailabilityChanged {
        sensor_id: i64,
        unit_id: i64,
        online: bool,
        timestamp: DateTime<Utc>,
    },
    /// `sysgrow/bridge/info` — parsed body, typically `{ devices: [...] }`.
    BridgeInfo { body: serde_json::Value, timestamp: DateTime<Utc> },
    /// `sysgrow/bridge/health` — parsed body, typically `{ status, uptime, free_heap, ... }`.
    BridgeHealth { body: serde_json::Value, timestamp: DateTime<Utc> },
    /// `sysgrow/bridge/response/<command>` — parsed body, typically `{ status, ... }`.
    BridgeResponse {
        command: String,
        body: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        use crate::core::application::pipeline::event_names;
        match self {
            Event::Controller(e) => e.name,
            Event::SensorCreated { .. } => event_names::SENSOR_CREATED,
            Event::SensorDeleted { .. } => event_names::SENSOR_DELETED,
            Event::AvailabilityChanged { .. } => event_names::AVAILABILITY_CHANGED,
            Event::BridgeInfo { .. } => event_names::BRIDGE_INFO,
            Event::BridgeHealth { .. } => event_names::BRIDGE_HEALTH,
            Event::BridgeResponse { .. } => event_names::BRIDGE_RESPONSE,
        }
    }
}

type Handler = Box<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Handler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribers.lock().unwrap().push(Box::new(handler));
    }

    /// Publish an event to every subscriber, synchronously, on this thread.
    /// A subscriber that panics is caught and logged; publishing continues.
    pub fn publish(&self, event: Event) {
        let subscribers = self.subscribers.lock().unwrap();
        for handler in subscribers.iter() {
            let result = catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if result.is_err() {
                error!(event = event.name(), "event subscriber panicked");
            }
        }
    }
}
