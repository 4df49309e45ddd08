//! Measurement source
//!
//! Wraps the raw photoresistor read and the normalization to [0, 100].

mod ldr;

pub use ldr::IioLdr;

use ldr_shared::NodeError;

/// Produces one normalized light value per call
pub trait MeasurementSource: Send {
    /// Read and normalize; any failure is a `NodeError::SensorRead`
    fn read(&mut self) -> Result<f64, NodeError>;
}
