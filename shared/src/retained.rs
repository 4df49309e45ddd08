//! Retained State
//!
//! The only state that survives power-down: the current configuration and
//! the running delivery statistics. Persisted as a small protobuf record so
//! any backing medium (battery-backed RAM, flash page, file) can hold it.

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::config_update::UpdateRejected;
use crate::{layout, timing};

/// Errors that can occur while decoding a retained record
#[derive(Error, Debug)]
pub enum RetainedError {
    #[error("Retained record decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Retained record encode error: {0}")]
    Encode(#[from] prost::EncodeError),
}

/// Persisted layout of the retained state
#[derive(Clone, PartialEq, Message)]
pub struct RetainedRecord {
    #[prost(uint64, tag = "1")]
    pub sampling_interval_ms: u64,

    #[prost(string, tag = "2")]
    pub position: String,

    #[prost(uint64, tag = "3")]
    pub latency_sum_ms: u64,

    #[prost(uint32, tag = "4")]
    pub latency_count: u32,

    #[prost(uint32, tag = "5")]
    pub missed_tx: u32,
}

impl RetainedRecord {
    /// Encode the record into a byte buffer
    pub fn encode_to_bytes(&self) -> Result<Bytes, RetainedError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode a record from a byte buffer
    pub fn decode_from(buf: &[u8]) -> Result<Self, RetainedError> {
        Ok(Self::decode(buf)?)
    }
}

/// Configuration that survives power-down
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedConfig {
    sampling_interval: Duration,
    position: String,
}

impl Default for RetainedConfig {
    fn default() -> Self {
        Self {
            sampling_interval: Duration::from_millis(timing::DEFAULT_SAMPLING_INTERVAL_MS),
            position: layout::DEFAULT_POSITION.to_string(),
        }
    }
}

impl RetainedConfig {
    pub fn sampling_interval(&self) -> Duration {
        self.sampling_interval
    }

    pub fn position(&self) -> &str {
        &self.position
    }

    /// Set the sampling interval. Values at or below the minimum are rejected, not clamped.
    ///
    /// Returns `Ok(false)` when the value is already current.
    pub fn set_sampling_interval(&mut self, interval: Duration) -> Result<bool, UpdateRejected> {
        let ms = interval.as_millis() as u64;
        if ms <= timing::MIN_SAMPLING_INTERVAL_MS {
            return Err(UpdateRejected::PeriodTooShort { ms });
        }
        if self.sampling_interval == interval {
            return Ok(false);
        }
        self.sampling_interval = interval;
        Ok(true)
    }

    /// Set the position, truncated to the retained length.
    ///
    /// Returns `Ok(false)` when the truncated value is already current.
    pub fn set_position(&mut self, position: &str) -> Result<bool, UpdateRejected> {
        if position.is_empty() {
            return Err(UpdateRejected::EmptyPosition);
        }
        if let Some(c) = position.chars().find(|c| layout::RESERVED_POSITION_CHARS.contains(c)) {
            return Err(UpdateRejected::ReservedCharacter(c));
        }
        let truncated = truncate_position(position);
        if self.position == truncated {
            return Ok(false);
        }
        self.position = truncated;
        Ok(true)
    }
}

/// Truncate to `MAX_POSITION_LEN` bytes on a char boundary
fn truncate_position(position: &str) -> String {
    let mut end = position.len().min(layout::MAX_POSITION_LEN);
    while !position.is_char_boundary(end) {
        end -= 1;
    }
    position[..end].to_string()
}

fn is_storable_position(position: &str) -> bool {
    !position.is_empty()
        && position.len() <= layout::MAX_POSITION_LEN
        && !position.contains(&layout::RESERVED_POSITION_CHARS[..])
}

/// Running delivery statistics that survive power-down
///
/// The latency sum and count are private so they can only be reset together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetainedStats {
    latency_sum_ms: u64,
    latency_count: u32,
    missed_tx: u32,
}

impl RetainedStats {
    pub fn latency_sum_ms(&self) -> u64 {
        self.latency_sum_ms
    }

    pub fn latency_count(&self) -> u32 {
        self.latency_count
    }

    pub fn missed_tx(&self) -> u32 {
        self.missed_tx
    }

    /// Add one latency sample to the running mean
    pub fn record_latency(&mut self, latency: Duration) {
        self.latency_sum_ms = self
            .latency_sum_ms
            .saturating_add(latency.as_millis() as u64);
        self.latency_count = self.latency_count.saturating_add(1);
    }

    /// Count one missed transmission
    pub fn record_miss(&mut self) {
        self.missed_tx = self.missed_tx.saturating_add(1);
    }

    /// Mean latency in milliseconds since the last flush
    pub fn mean_latency_ms(&self) -> Option<f64> {
        if self.latency_count == 0 {
            return None;
        }
        Some(self.latency_sum_ms as f64 / self.latency_count as f64)
    }

    /// Number of samples after which statistics are flushed
    ///
    /// Derived from the interval passed in, so a configuration change alters
    /// the cadence of the window in progress.
    pub fn flush_threshold(sampling_interval: Duration) -> u32 {
        let interval_ms = (sampling_interval.as_millis() as u64).max(1);
        (timing::FLUSH_WINDOW_MS / interval_ms).clamp(1, u32::MAX as u64) as u32
    }

    /// Check if enough samples have accumulated for a flush
    pub fn flush_due(&self, sampling_interval: Duration) -> bool {
        self.latency_count >= Self::flush_threshold(sampling_interval)
    }

    /// Reset every accumulator after a successful flush
    pub fn reset_after_flush(&mut self) {
        self.latency_sum_ms = 0;
        self.latency_count = 0;
        self.missed_tx = 0;
    }
}

/// Invariant repairs applied when loading a retained record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    /// Sampling interval was at or below the minimum
    SamplingInterval,
    /// Position was empty or too long
    Position,
    /// Latency sum and count disagreed
    LatencyAccumulator,
}

impl fmt::Display for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Repair::SamplingInterval => write!(f, "sampling interval reset to default"),
            Repair::Position => write!(f, "position reset to default"),
            Repair::LatencyAccumulator => write!(f, "latency accumulator cleared"),
        }
    }
}

/// Complete retained state: configuration plus statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetainedState {
    pub config: RetainedConfig,
    pub stats: RetainedStats,
}

impl RetainedState {
    /// Build state from a persisted record, repairing violated invariants
    pub fn from_record(record: RetainedRecord) -> (Self, Vec<Repair>) {
        let mut repairs = Vec::new();
        let mut state = Self::default();

        if record.sampling_interval_ms > timing::MIN_SAMPLING_INTERVAL_MS {
            state.config.sampling_interval = Duration::from_millis(record.sampling_interval_ms);
        } else {
            repairs.push(Repair::SamplingInterval);
        }

        if is_storable_position(&record.position) {
            state.config.position = record.position;
        } else {
            repairs.push(Repair::Position);
        }

        if record.latency_count == 0 && record.latency_sum_ms != 0 {
            repairs.push(Repair::LatencyAccumulator);
        } else {
            state.stats.latency_sum_ms = record.latency_sum_ms;
            state.stats.latency_count = record.latency_count;
        }
        state.stats.missed_tx = record.missed_tx;

        (state, repairs)
    }

    /// Convert into the persisted layout
    pub fn to_record(&self) -> RetainedRecord {
        RetainedRecord {
            sampling_interval_ms: self.config.sampling_interval.as_millis() as u64,
            position: self.config.position.clone(),
            latency_sum_ms: self.stats.latency_sum_ms,
            latency_count: self.stats.latency_count,
            missed_tx: self.stats.missed_tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_boot_defaults() {
        let state = RetainedState::default();
        assert_eq!(state.config.sampling_interval(), Duration::from_secs(10));
        assert_eq!(state.config.position(), "kitchen");
        assert_eq!(state.stats.latency_sum_ms(), 0);
        assert_eq!(state.stats.latency_count(), 0);
        assert_eq!(state.stats.missed_tx(), 0);
    }

    #[test]
    fn test_sampling_interval_rejected_not_clamped() {
        let mut config = RetainedConfig::default();

        let result = config.set_sampling_interval(Duration::from_secs(1));
        assert!(matches!(result, Err(UpdateRejected::PeriodTooShort { ms: 1000 })));
        assert_eq!(config.sampling_interval(), Duration::from_secs(10));

        assert!(config.set_sampling_interval(Duration::from_secs(2)).unwrap());
        assert_eq!(config.sampling_interval(), Duration::from_secs(2));

        // Same value again is a no-op
        assert!(!config.set_sampling_interval(Duration::from_secs(2)).unwrap());
    }

    #[test]
    fn test_position_truncated_and_idempotent() {
        let mut config = RetainedConfig::default();
        let long = "x".repeat(80);

        assert!(config.set_position(&long).unwrap());
        assert_eq!(config.position().len(), layout::MAX_POSITION_LEN);

        // The truncated form compares equal, so resubmitting is a no-op
        assert!(!config.set_position(&long).unwrap());
        assert!(matches!(config.set_position(""), Err(UpdateRejected::EmptyPosition)));
    }

    #[test]
    fn test_multibyte_position_fits_byte_budget() {
        let mut config = RetainedConfig::default();

        // 80 bytes of two-byte characters
        assert!(config.set_position(&"é".repeat(40)).unwrap());
        assert_eq!(config.position(), "é".repeat(24));
        assert!(config.position().len() <= layout::MAX_POSITION_LEN);
    }

    #[test]
    fn test_payload_separators_rejected_in_position() {
        let mut config = RetainedConfig::default();

        for (raw, reserved) in [("hall&data=0", '&'), ("a=b", '=')] {
            assert_eq!(config.set_position(raw), Err(UpdateRejected::ReservedCharacter(reserved)));
        }
        assert_eq!(config.position(), layout::DEFAULT_POSITION);

        let record = RetainedRecord {
            position: "a&b".into(),
            ..RetainedState::default().to_record()
        };
        let (state, repairs) = RetainedState::from_record(record);
        assert_eq!(repairs, vec![Repair::Position]);
        assert_eq!(state.config.position(), layout::DEFAULT_POSITION);
    }

    #[test]
    fn test_running_mean() {
        let mut stats = RetainedStats::default();
        assert_eq!(stats.mean_latency_ms(), None);

        stats.record_latency(Duration::from_millis(100));
        stats.record_latency(Duration::from_millis(200));
        stats.record_latency(Duration::from_millis(600));

        assert_eq!(stats.latency_count(), 3);
        assert_eq!(stats.mean_latency_ms(), Some(300.0));
    }

    #[test]
    fn test_flush_threshold_follows_interval() {
        assert_eq!(RetainedStats::flush_threshold(Duration::from_secs(10)), 180);
        assert_eq!(RetainedStats::flush_threshold(Duration::from_secs(600)), 3);
        // Intervals longer than the window flush every sample
        assert_eq!(RetainedStats::flush_threshold(Duration::from_secs(3600)), 1);
    }

    #[test]
    fn test_reset_clears_all_accumulators() {
        let mut stats = RetainedStats::default();
        stats.record_latency(Duration::from_millis(42));
        stats.record_miss();

        stats.reset_after_flush();
        assert_eq!(stats, RetainedStats::default());
    }

    #[test]
    fn test_record_survives_encoding() {
        let mut state = RetainedState::default();
        state.config.set_position("balcony").unwrap();
        state.stats.record_latency(Duration::from_millis(35));
        state.stats.record_miss();

        let bytes = state.to_record().encode_to_bytes().expect("encode failed");
        let record = RetainedRecord::decode_from(&bytes).expect("decode failed");
        let (restored, repairs) = RetainedState::from_record(record);

        assert!(repairs.is_empty());
        assert_eq!(restored, state);
    }

    #[test]
    fn test_invalid_record_falls_back_to_defaults() {
        let record = RetainedRecord {
            sampling_interval_ms: 500,
            position: String::new(),
            latency_sum_ms: 900,
            latency_count: 0,
            missed_tx: 4,
        };

        let (state, repairs) = RetainedState::from_record(record);

        assert_eq!(
            repairs,
            vec![Repair::SamplingInterval, Repair::Position, Repair::LatencyAccumulator]
        );
        assert_eq!(state.config, RetainedConfig::default());
        assert_eq!(state.stats.latency_sum_ms(), 0);
        assert_eq!(state.stats.missed_tx(), 4);
    }
}
