//! Application layer: the per-reading processing pipeline (C1-C6), the
//! priority arbitrator (C7), and the sensor registry (C10).

pub mod arbitrator;
pub mod calibrator;
pub mod canonicalizer;
pub mod enricher;
pub mod pipeline;
pub mod registry;
pub mod transformer;
pub mod validator;

pub use arbitrator::PriorityArbitrator;
pub use pipeline::Pipeline;
pub use registry::SensorRegistry;
