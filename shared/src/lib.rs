//! LDR Node Shared Types
//!
//! This crate provides the host-independent core of the light sensor node:
//! the retained state record, the wake-cycle and broker-session state
//! machines, configuration update validation and the wire codecs used to
//! talk to the collector and the time-series store.

pub mod codec;
pub mod config_update;
pub mod error;
pub mod measurement;
pub mod retained;
pub mod state_machine;

// Re-export commonly used types at crate root
pub use codec::{decode_payload, encode_payload, CodecError, Point, ACK_TOKEN};
pub use config_update::{
    apply_update, ConfigTopic, ConfigUpdate, UpdateOutcome, UpdateRejected,
};
pub use error::NodeError;
pub use measurement::{normalize, Measurement, RawRange, ScaleError};
pub use retained::{
    Repair, RetainedConfig, RetainedError, RetainedRecord, RetainedState, RetainedStats,
};

/// Timing parameters for the wake cycle
///
/// Every wait in a cycle is bounded by one of these.
pub mod timing {
    /// Sampling periods must be strictly greater than this
    pub const MIN_SAMPLING_INTERVAL_MS: u64 = 1000;

    /// Sampling period used on first boot
    pub const DEFAULT_SAMPLING_INTERVAL_MS: u64 = 10_000;

    /// Wall-clock window over which latency and miss statistics are flushed
    pub const FLUSH_WINDOW_MS: u64 = 30 * 60 * 1000;

    /// Wireless link bring-up timeout
    pub const LINK_TIMEOUT_MS: u64 = 2000;

    /// Broker connect + subscribe timeout; the listen window is half of it
    pub const SESSION_TIMEOUT_MS: u64 = 2000;

    /// Delay between subscription attempts
    pub const SUBSCRIBE_RETRY_DELAY_MS: u64 = 200;

    /// Confirmable push acknowledgment timeout
    pub const ACK_TIMEOUT_MS: u64 = 1000;

    /// Timeout for a single point write to the store
    pub const STORE_WRITE_TIMEOUT_MS: u64 = 1000;
}

/// Retained layout limits and first-boot defaults
pub mod layout {
    /// Position used on first boot
    pub const DEFAULT_POSITION: &str = "kitchen";

    /// Maximum retained position length in bytes, excluding the terminator
    pub const MAX_POSITION_LEN: usize = 49;

    /// Characters that would split the `key=value&...` telemetry payload
    pub const RESERVED_POSITION_CHARS: [char; 2] = ['&', '='];

    /// Node identity compiled into the firmware
    pub const DEFAULT_NODE_ID: &str = "2";
}

/// Time-series measurement and field names
pub mod series {
    /// Light value written by the fallback path
    pub const LIGHT_MEASUREMENT: &str = "ldrValue";
    pub const LIGHT_FIELD: &str = "ldr";

    /// Periodic mean latency report
    pub const MEAN_LATENCY_MEASUREMENT: &str = "meanLat";
    pub const MEAN_LATENCY_FIELD: &str = "mean_lat";

    /// Periodic miss count report
    pub const MISS_MEASUREMENT: &str = "miss";
    pub const MISS_FIELD: &str = "miss";

    /// Tag key carrying the node identity
    pub const SENSOR_TAG: &str = "sensor";
}
