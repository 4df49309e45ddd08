//! Wake cycle orchestration
//!
//! Drives one cycle from boot to sleep against the retained state:
//! - Link bring-up, exiting early on failure
//! - Configuration sync and validation
//! - Measurement and ordered delivery
//! - Latency and miss accounting with the periodic flush

mod controller;

pub use controller::{CycleController, CycleReport};
