//! Direct store fallback: writes the light value straight to the store

use crate::transport::traits::{Delivery, DeliveryStrategy, PointWriter};
use async_trait::async_trait;
use ldr_shared::{series, Measurement, NodeError, Point};
use std::sync::Arc;

/// Used only after the confirmable push has failed
pub struct DirectStoreFallback {
    writer: Arc<dyn PointWriter>,
}

impl DirectStoreFallback {
    pub fn new(writer: Arc<dyn PointWriter>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl DeliveryStrategy for DirectStoreFallback {
    async fn attempt(&self, measurement: &Measurement) -> Result<Delivery, NodeError> {
        let point = Point::sensor(
            series::LIGHT_MEASUREMENT,
            &measurement.sensor_id,
            series::LIGHT_FIELD,
            measurement.value,
        );
        self.writer
            .write_point(&point)
            .await
            .map_err(|e| NodeError::FallbackWrite(format!("{:#}", e)))?;

        Ok(Delivery {
            channel: self.name(),
            latency: None,
        })
    }

    fn name(&self) -> &'static str {
        "direct-store"
    }
}
