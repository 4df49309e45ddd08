pub mod coap;
pub mod fallback;
pub mod influx;
pub mod traits;

pub use coap::CoapPush;
pub use fallback::DirectStoreFallback;
pub use influx::InfluxWriter;
pub use traits::{Delivery, DeliveryStrategy, PointWriter};
