//! Network bring-up and the configuration broker session
//!
//! This module handles:
//! - Probing the wireless link before anything else runs
//! - One bounded broker session per wake (connect, subscribe, listen)
//! - Mapping broker publishes to configuration updates

mod broker;
mod link;

pub use broker::MqttConfigChannel;
pub use link::UdpRouteLink;
pub(crate) use link::unspecified_for;

use anyhow::Result;
use async_trait::async_trait;
use ldr_shared::{ConfigUpdate, NodeError};

/// The node's network link
#[async_trait]
pub trait Link: Send + Sync {
    /// Bring the link up; the caller bounds this with the link timeout
    async fn bring_up(&self) -> Result<()>;

    /// Human-readable name for this link
    fn name(&self) -> &'static str;
}

/// Source of configuration updates for one wake
#[async_trait]
pub trait ConfigSource: Send {
    /// Run one session and return the updates received, in arrival order
    async fn sync(&mut self) -> Result<Vec<ConfigUpdate>, NodeError>;
}
