//! Node provisioning: endpoints, credentials, sensor range and timeouts
//!
//! Compiled-in defaults, overridable through `LDR_*` environment variables.

use ldr_shared::{layout, timing, RawRange};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Every bounded wait in a wake cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTimeouts {
    /// Wireless link bring-up
    pub link: Duration,
    /// Broker connect + subscribe
    pub session: Duration,
    /// Delay between subscription attempts
    pub subscribe_retry: Duration,
    /// Confirmable push acknowledgment wait
    pub ack: Duration,
    /// One point write to the store
    pub store_write: Duration,
}

impl Default for CycleTimeouts {
    fn default() -> Self {
        Self {
            link: Duration::from_millis(timing::LINK_TIMEOUT_MS),
            session: Duration::from_millis(timing::SESSION_TIMEOUT_MS),
            subscribe_retry: Duration::from_millis(timing::SUBSCRIBE_RETRY_DELAY_MS),
            ack: Duration::from_millis(timing::ACK_TIMEOUT_MS),
            store_write: Duration::from_millis(timing::STORE_WRITE_TIMEOUT_MS),
        }
    }
}

impl CycleTimeouts {
    /// Listen window after a successful subscription
    pub fn listen_window(&self) -> Duration {
        self.session / 2
    }

    /// Longest a cycle can take: every wait hits its limit, the fallback
    /// write runs and both flush points are written
    pub fn worst_case(&self) -> Duration {
        self.link + self.session + self.listen_window() + self.ack + self.store_write * 3
    }

    /// Check that a whole cycle fits inside one sampling interval
    pub fn fits_within(&self, sampling_interval: Duration) -> bool {
        self.worst_case() < sampling_interval
    }
}

/// Confirmable telemetry receiver
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// UDP endpoint (host:port)
    pub address: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5683".into(),
        }
    }
}

/// Configuration broker
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(5),
        }
    }
}

/// Time-series ingestion endpoint
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL, e.g. `http://127.0.0.1:8086`
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8086".into(),
            org: "iot".into(),
            bucket: "ldr".into(),
            token: None,
        }
    }
}

/// Photoresistor input
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// File exposing the raw ADC count
    pub adc_path: PathBuf,
    pub range: RawRange,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            adc_path: PathBuf::from("/sys/bus/iio/devices/iio:device0/in_voltage0_raw"),
            range: RawRange::default(),
        }
    }
}

/// Complete node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Node identity, constant for the lifetime of the device
    pub node_id: String,
    pub collector: CollectorConfig,
    pub broker: BrokerConfig,
    pub store: StoreConfig,
    pub sensor: SensorConfig,
    pub timeouts: CycleTimeouts,
    /// Backing file of the retained state
    pub retained_path: PathBuf,
    /// Exit after a single cycle instead of sleeping
    pub one_shot: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: layout::DEFAULT_NODE_ID.into(),
            collector: CollectorConfig::default(),
            broker: BrokerConfig::default(),
            store: StoreConfig::default(),
            sensor: SensorConfig::default(),
            timeouts: CycleTimeouts::default(),
            retained_path: PathBuf::from("ldr-retained.bin"),
            one_shot: false,
        }
    }
}

impl NodeConfig {
    /// Defaults overlaid with any `LDR_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        override_string("LDR_NODE_ID", &mut config.node_id);
        override_string("LDR_COLLECTOR_ADDR", &mut config.collector.address);
        override_string("LDR_BROKER_HOST", &mut config.broker.host);
        override_parsed("LDR_BROKER_PORT", &mut config.broker.port);
        override_optional("LDR_BROKER_USER", &mut config.broker.username);
        override_optional("LDR_BROKER_PASSWORD", &mut config.broker.password);
        override_string("LDR_STORE_URL", &mut config.store.url);
        override_string("LDR_STORE_ORG", &mut config.store.org);
        override_string("LDR_STORE_BUCKET", &mut config.store.bucket);
        override_optional("LDR_STORE_TOKEN", &mut config.store.token);
        override_parsed("LDR_RAW_MIN", &mut config.sensor.range.min);
        override_parsed("LDR_RAW_MAX", &mut config.sensor.range.max);

        if let Ok(path) = env::var("LDR_ADC_PATH") {
            config.sensor.adc_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("LDR_RETAINED_PATH") {
            config.retained_path = PathBuf::from(path);
        }
        config.one_shot = env::var("LDR_ONE_SHOT")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        config
    }

    /// CoAP resource the collector exposes for this node
    pub fn collector_resource(&self) -> String {
        format!("ldrData{}", self.node_id)
    }

    /// MQTT client id for this node
    pub fn broker_client_id(&self) -> String {
        format!("ldr-node-{}", self.node_id)
    }
}

fn override_string(key: &str, target: &mut String) {
    if let Ok(value) = env::var(key) {
        *target = value;
    }
}

fn override_optional(key: &str, target: &mut Option<String>) {
    if let Ok(value) = env::var(key) {
        *target = Some(value).filter(|v| !v.is_empty());
    }
}

fn override_parsed<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(value) = env::var(key) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(key, value = %value, "ignoring unparseable setting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts_fit_default_interval() {
        let timeouts = CycleTimeouts::default();
        let interval = Duration::from_millis(timing::DEFAULT_SAMPLING_INTERVAL_MS);

        assert_eq!(timeouts.listen_window(), Duration::from_secs(1));
        assert_eq!(timeouts.worst_case(), Duration::from_secs(9));
        assert!(timeouts.fits_within(interval));
    }

    #[test]
    fn test_short_interval_does_not_fit() {
        let timeouts = CycleTimeouts::default();
        assert!(!timeouts.fits_within(Duration::from_secs(2)));
        assert!(!timeouts.fits_within(timeouts.worst_case()));
    }

    #[test]
    fn test_node_names() {
        let config = NodeConfig::default();
        assert_eq!(config.node_id, "2");
        assert_eq!(config.collector_resource(), "ldrData2");
        assert_eq!(config.broker_client_id(), "ldr-node-2");
    }
}
