//! Photoresistor behind a Linux IIO ADC channel

use super::MeasurementSource;
use ldr_shared::{normalize, NodeError, RawRange};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Reads the raw count from an IIO sysfs attribute
pub struct IioLdr {
    path: PathBuf,
    range: RawRange,
}

impl IioLdr {
    pub fn new(path: impl Into<PathBuf>, range: RawRange) -> Self {
        Self {
            path: path.into(),
            range,
        }
    }

    fn read_raw(&self) -> Result<i32, NodeError> {
        let text = fs::read_to_string(&self.path).map_err(|e| {
            NodeError::SensorRead(format!("reading {}: {}", self.path.display(), e))
        })?;
        text.trim()
            .parse()
            .map_err(|_| NodeError::SensorRead(format!("not an ADC count: {:?}", text.trim())))
    }
}

impl MeasurementSource for IioLdr {
    fn read(&mut self) -> Result<f64, NodeError> {
        let raw = self.read_raw()?;
        let value = normalize(raw, self.range).map_err(|e| NodeError::SensorRead(e.to_string()))?;
        debug!(raw, value, "LDR sampled");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adc_file(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in_voltage0_raw");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_reads_and_normalizes() {
        let (_dir, path) = adc_file("2048\n");
        let mut ldr = IioLdr::new(path, RawRange::new(0, 4095));
        assert_eq!(ldr.read(), Ok(50.0));
    }

    #[test]
    fn test_degenerate_range_is_read_failure() {
        let (_dir, path) = adc_file("2048\n");
        let mut ldr = IioLdr::new(path, RawRange::new(100, 100));
        assert!(matches!(ldr.read(), Err(NodeError::SensorRead(_))));
    }

    #[test]
    fn test_garbage_and_missing_file() {
        let (_dir, path) = adc_file("n/a");
        let mut ldr = IioLdr::new(&path, RawRange::default());
        assert!(matches!(ldr.read(), Err(NodeError::SensorRead(_))));

        let mut ldr = IioLdr::new(path.with_file_name("missing"), RawRange::default());
        assert!(matches!(ldr.read(), Err(NodeError::SensorRead(_))));
    }
}
