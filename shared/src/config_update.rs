//! Configuration updates pushed by the broker
//!
//! Two topics are subscribed per node: the sampling period (integer seconds)
//! and the free-text position. Updates are validated here and applied to the
//! retained configuration only when they pass.

use std::time::Duration;

use thiserror::Error;

use crate::retained::RetainedConfig;

/// Reasons a configuration update is discarded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateRejected {
    #[error("Sampling period is not an integer count of seconds: {0:?}")]
    InvalidPeriod(String),

    #[error(
        "Sampling period too short: {ms} ms (must exceed {} ms)",
        crate::timing::MIN_SAMPLING_INTERVAL_MS
    )]
    PeriodTooShort { ms: u64 },

    #[error("Position update is empty")]
    EmptyPosition,

    #[error("Position contains reserved payload character {0:?}")]
    ReservedCharacter(char),
}

/// Configuration topics a node subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigTopic {
    SamplingPeriod,
    Position,
}

impl ConfigTopic {
    pub const ALL: [ConfigTopic; 2] = [ConfigTopic::SamplingPeriod, ConfigTopic::Position];

    /// Broker topic name for this node
    pub fn topic_name(&self, node_id: &str) -> String {
        match self {
            ConfigTopic::SamplingPeriod => format!("home/ldr{}/sampling_period", node_id),
            ConfigTopic::Position => format!("home/ldr{}/position", node_id),
        }
    }

    /// Map a broker topic name back to a config topic
    pub fn from_topic_name(topic: &str, node_id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.topic_name(node_id) == topic)
    }
}

/// A single update received while listening
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub topic: ConfigTopic,
    pub raw_payload: String,
}

impl ConfigUpdate {
    pub fn new(topic: ConfigTopic, raw_payload: impl Into<String>) -> Self {
        Self {
            topic,
            raw_payload: raw_payload.into(),
        }
    }
}

/// Result of applying a valid update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Sampling interval replaced
    SamplingInterval(Duration),
    /// Position replaced
    Position(String),
    /// Value equal to the current one, nothing written
    Unchanged,
}

/// Validate an update and apply it to the retained configuration
pub fn apply_update(
    config: &mut RetainedConfig,
    update: &ConfigUpdate,
) -> Result<UpdateOutcome, UpdateRejected> {
    match update.topic {
        ConfigTopic::SamplingPeriod => {
            let interval = parse_period(&update.raw_payload)?;
            if config.set_sampling_interval(interval)? {
                Ok(UpdateOutcome::SamplingInterval(interval))
            } else {
                Ok(UpdateOutcome::Unchanged)
            }
        }
        ConfigTopic::Position => {
            if config.set_position(&update.raw_payload)? {
                Ok(UpdateOutcome::Position(config.position().to_string()))
            } else {
                Ok(UpdateOutcome::Unchanged)
            }
        }
    }
}

/// Parse an integer count of seconds into a duration
fn parse_period(raw: &str) -> Result<Duration, UpdateRejected> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| UpdateRejected::InvalidPeriod(raw.to_string()))?;
    let ms = secs
        .checked_mul(1000)
        .ok_or_else(|| UpdateRejected::InvalidPeriod(raw.to_string()))?;
    Ok(Duration::from_millis(ms))
}
