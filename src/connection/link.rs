//! Link probe for hosts whose radio is managed by the OS

use super::Link;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

/// Considers the link up once the collector resolves and has a route
///
/// Connecting a UDP socket sends nothing; it only asks the kernel for a route.
pub struct UdpRouteLink {
    target: String,
}

impl UdpRouteLink {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

#[async_trait]
impl Link for UdpRouteLink {
    async fn bring_up(&self) -> Result<()> {
        let addr = lookup_host(&self.target)
            .await
            .with_context(|| format!("resolving {}", self.target))?
            .next()
            .ok_or_else(|| anyhow!("{} resolved to no addresses", self.target))?;

        let socket = UdpSocket::bind(unspecified_for(&addr)).await?;
        socket
            .connect(addr)
            .await
            .with_context(|| format!("no route to {}", addr))?;

        debug!("Link up, route to {} via {}", addr, socket.local_addr()?);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "udp-route"
    }
}

/// Wildcard bind address of the same family as `addr`
pub(crate) fn unspecified_for(addr: &SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    }
}
