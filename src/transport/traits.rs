//! Delivery abstractions: ordered strategies and a generic point writer

use anyhow::Result;
use async_trait::async_trait;
use ldr_shared::{Measurement, NodeError, Point};
use std::time::Duration;

/// Successful delivery of one measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Name of the strategy that delivered it
    pub channel: &'static str,
    /// Round-trip latency, for channels that measure one
    pub latency: Option<Duration>,
}

/// One way of getting a measurement to the collector side
///
/// Strategies are tried in order until one succeeds.
#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    /// Single attempt, no retries
    async fn attempt(&self, measurement: &Measurement) -> Result<Delivery, NodeError>;

    /// Human-readable name for this strategy
    fn name(&self) -> &'static str;
}

/// Writes single points to the time-series store
#[async_trait]
pub trait PointWriter: Send + Sync {
    /// Write one point, bounded by the writer's own timeout
    async fn write_point(&self, point: &Point) -> Result<()>;
}
