//! Failure taxonomy of a wake cycle

use thiserror::Error;

/// Every way a cycle phase can fail
///
/// Only `Connectivity` aborts a cycle; the rest are absorbed by the controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("Network bring-up failed: {0}")]
    Connectivity(String),

    #[error("Config session failed: {0}")]
    ConfigSession(String),

    #[error("Sensor read failed: {0}")]
    SensorRead(String),

    #[error("Confirmable delivery failed: {0}")]
    ConfirmableDelivery(String),

    #[error("Fallback write failed: {0}")]
    FallbackWrite(String),

    #[error("Statistics flush failed: {0}")]
    StatsFlush(String),
}

impl NodeError {
    /// True if this failure counts as a missed transmission
    pub fn counts_as_miss(&self) -> bool {
        matches!(
            self,
            NodeError::Connectivity(_) | NodeError::FallbackWrite(_) | NodeError::StatsFlush(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miss_classification() {
        assert!(NodeError::Connectivity("timeout".into()).counts_as_miss());
        assert!(NodeError::FallbackWrite("500".into()).counts_as_miss());
        assert!(NodeError::StatsFlush("refused".into()).counts_as_miss());

        assert!(!NodeError::ConfigSession("unreachable".into()).counts_as_miss());
        assert!(!NodeError::SensorRead("degenerate".into()).counts_as_miss());
        // Absorbed by the fallback path
        assert!(!NodeError::ConfirmableDelivery("timeout".into()).counts_as_miss());
    }
}
