//! Light measurement and raw-reading normalization

use thiserror::Error;

/// Upper bound of the normalized scale
pub const NORMALIZED_MAX: i64 = 100;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScaleError {
    #[error("Raw input range collapses to a single point ({0})")]
    DegenerateRange(i32),
}

/// Input range of the raw ADC reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRange {
    pub min: i32,
    pub max: i32,
}

impl RawRange {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }
}

impl Default for RawRange {
    /// 12-bit ADC
    fn default() -> Self {
        Self::new(0, 4095)
    }
}

/// Rescale a raw reading to [0, 100]
///
/// Integer map-style arithmetic, so 2048 over [0, 4095] lands exactly on 50.
pub fn normalize(raw: i32, range: RawRange) -> Result<f64, ScaleError> {
    if range.min == range.max {
        return Err(ScaleError::DegenerateRange(range.min));
    }
    let span = range.max as i64 - range.min as i64;
    let scaled = (raw as i64 - range.min as i64) * NORMALIZED_MAX / span;
    Ok(scaled.clamp(0, NORMALIZED_MAX) as f64)
}

/// One light measurement, created and consumed within a single cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub sensor_id: String,
    pub position: String,
    pub value: f64,
}

impl Measurement {
    pub fn new(sensor_id: impl Into<String>, position: impl Into<String>, value: f64) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            position: position.into(),
            value,
        }
    }
}
