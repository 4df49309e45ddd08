//! Wire codecs for the collector and the time-series store
//!
//! Telemetry pushes carry a flat key=value payload:
//! ```text
//! sensor_id=<id>&location=<position>&data=<value, 2 decimals>
//! ```
//!
//! Direct store writes carry one line-protocol point:
//! ```text
//! <measurement>,<tag_key>=<tag_value> <field_key>=<value>
//! ```

use thiserror::Error;

use crate::measurement::Measurement;

/// Response payload the collector sends on successful ingestion
pub const ACK_TOKEN: &[u8] = b"OK";

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Missing key in payload: {0}")]
    MissingKey(&'static str),

    #[error("Malformed pair in payload: {0:?}")]
    MalformedPair(String),

    #[error("Invalid data value: {0:?}")]
    InvalidValue(String),

    #[error("Field value is not finite: {0}")]
    NonFiniteField(f64),
}

/// Encode a measurement into the telemetry payload
pub fn encode_payload(measurement: &Measurement) -> String {
    format!(
        "sensor_id={}&location={}&data={:.2}",
        measurement.sensor_id, measurement.position, measurement.value
    )
}

/// Decode a telemetry payload back into a measurement
pub fn decode_payload(payload: &str) -> Result<Measurement, CodecError> {
    let mut sensor_id = None;
    let mut location = None;
    let mut data = None;

    for pair in payload.split('&') {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| CodecError::MalformedPair(pair.to_string()))?;
        match key {
            "sensor_id" => sensor_id = Some(value),
            "location" => location = Some(value),
            "data" => data = Some(value),
            // Unknown keys are ignored, like the collector does
            _ => {}
        }
    }

    let sensor_id = sensor_id.ok_or(CodecError::MissingKey("sensor_id"))?;
    let location = location.ok_or(CodecError::MissingKey("location"))?;
    let data = data.ok_or(CodecError::MissingKey("data"))?;
    let value: f64 = data
        .parse()
        .map_err(|_| CodecError::InvalidValue(data.to_string()))?;

    Ok(Measurement::new(sensor_id, location, value))
}

/// A single time-series point with one tag and one field
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tag_key: String,
    pub tag_value: String,
    pub field_key: String,
    pub value: f64,
}

impl Point {
    /// Create a point tagged with the node identity
    pub fn sensor(
        measurement: impl Into<String>,
        sensor_id: impl Into<String>,
        field_key: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            measurement: measurement.into(),
            tag_key: crate::series::SENSOR_TAG.to_string(),
            tag_value: sensor_id.into(),
            field_key: field_key.into(),
            value,
        }
    }

    /// Encode as a line-protocol record
    pub fn to_line(&self) -> Result<String, CodecError> {
        if !self.value.is_finite() {
            return Err(CodecError::NonFiniteField(self.value));
        }
        Ok(format!(
            "{},{}={} {}={}",
            escape(&self.measurement, &[',', ' ']),
            escape(&self.tag_key, &[',', '=', ' ']),
            escape(&self.tag_value, &[',', '=', ' ']),
            escape(&self.field_key, &[',', '=', ' ']),
            format_float(self.value),
        ))
    }
}

/// Backslash-escape the given characters
fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Floats always carry a decimal point so the store types the field as float
fn format_float(value: f64) -> String {
    let s = value.to_string();
    if s.contains('.') || s.contains('e') {
        s
    } else {
        format!("{}.0", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series;

    #[test]
    fn test_payload_format() {
        let m = Measurement::new("2", "kitchen", 50.0);
        assert_eq!(encode_payload(&m), "sensor_id=2&location=kitchen&data=50.00");

        let m = Measurement::new("7", "hall", 33.456);
        assert_eq!(encode_payload(&m), "sensor_id=7&location=hall&data=33.46");
    }

    #[test]
    fn test_decode_payload() {
        let m = decode_payload("sensor_id=2&location=kitchen&data=50.00").expect("decode failed");
        assert_eq!(m.sensor_id, "2");
        assert_eq!(m.position, "kitchen");
        assert_eq!(m.value, 50.0);
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        assert_eq!(
            decode_payload("sensor_id=2&location=kitchen"),
            Err(CodecError::MissingKey("data"))
        );
        assert!(matches!(
            decode_payload("sensor_id=2&garbage&data=1"),
            Err(CodecError::MalformedPair(_))
        ));
        assert!(matches!(
            decode_payload("sensor_id=2&location=x&data=bright"),
            Err(CodecError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_point_line() {
        let p = Point::sensor(
            series::MEAN_LATENCY_MEASUREMENT,
            "2",
            series::MEAN_LATENCY_FIELD,
            12.5,
        );
        assert_eq!(p.to_line().unwrap(), "meanLat,sensor=2 mean_lat=12.5");

        let p = Point::sensor(series::MISS_MEASUREMENT, "2", series::MISS_FIELD, 3.0);
        assert_eq!(p.to_line().unwrap(), "miss,sensor=2 miss=3.0");
    }

    #[test]
    fn test_point_escaping() {
        let p = Point::sensor("light level", "node,a=1", "ldr", 1.0);
        assert_eq!(
            p.to_line().unwrap(),
            "light\\ level,sensor=node\\,a\\=1 ldr=1.0"
        );
    }

    #[test]
    fn test_point_rejects_nan() {
        let p = Point::sensor("ldrValue", "2", "ldr", f64::NAN);
        assert!(matches!(p.to_line(), Err(CodecError::NonFiniteField(_))));
    }
}
