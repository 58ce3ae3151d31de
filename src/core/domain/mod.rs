//! Core domain layer: entities, value objects, and pure domain logic for the
//! sensor ingestion and arbitration pipeline. Independent of MQTT, polling,
//! and broadcast transports.

pub mod calibration;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod payloads;
pub mod reading;
pub mod sensor;
pub mod value;

pub use calibration::{CalibrationRecord, CalibrationType};
pub use errors::{PipelineError, PipelineResult};
pub use health::{HealthLevel, SensorHealth};
pub use payloads::{
    ControllerEvent, DashboardSnapshot, DevicePayload, PowerSource, SnapshotMetric,
    SnapshotSource, Trend, UnregisteredDevicePayload,
};
pub use reading::{Reading, ReadingStatus};
pub use sensor::{Protocol, Sensor, SensorCategory, SensorConfig};
pub use value::Value;
