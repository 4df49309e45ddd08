//! Single-point writer for the InfluxDB v2 HTTP write API

use crate::config::StoreConfig;
use crate::transport::traits::PointWriter;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use ldr_shared::Point;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Writes each point as one line-protocol request
pub struct InfluxWriter {
    agent: ureq::Agent,
    write_url: String,
    org: String,
    bucket: String,
    token: Option<String>,
    timeout: Duration,
}

impl InfluxWriter {
    pub fn new(config: &StoreConfig, write_timeout: Duration) -> Result<Self> {
        if !config.url.starts_with("http://") && !config.url.starts_with("https://") {
            bail!("store URL must start with http:// or https://: {}", config.url);
        }

        let agent = ureq::AgentBuilder::new().timeout(write_timeout).build();

        Ok(Self {
            agent,
            write_url: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            token: config.token.clone(),
            timeout: write_timeout,
        })
    }

    fn request(&self) -> ureq::Request {
        let mut request = self
            .agent
            .post(&self.write_url)
            .query("org", &self.org)
            .query("bucket", &self.bucket)
            .query("precision", "s")
            .set("Content-Type", "text/plain; charset=utf-8");
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Token {}", token));
        }
        request
    }
}

#[async_trait]
impl PointWriter for InfluxWriter {
    async fn write_point(&self, point: &Point) -> Result<()> {
        let line = point.to_line()?;
        let request = self.request();
        debug!(line = %line, "Writing point");

        // ureq is blocking; keep it off the runtime threads
        let task = tokio::task::spawn_blocking(move || request.send_string(&line));
        let result = timeout(self.timeout, task)
            .await
            .map_err(|_| anyhow!("store write timed out after {:?}", self.timeout))?
            .context("store write task failed")?;

        match result {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                bail!("store rejected point: HTTP {} {}", code, body.trim())
            }
            Err(e) => Err(anyhow!(e).context("store unreachable")),
        }
    }
}
