//! HRV Relay - on-wearable HRV sampling with relay to a paired phone
//!
//! The wearable samples heart data in fixed windows, computes RMSSD and average
//! heart rate per window, and sends each result to the paired phone as a single
//! datagram. The phone persists every received result into its health-record
//! store and serves read-only queries over that store to the application layer.
//!
//! ## Modules
//!
//! - **Wearable**: `window`, `hrv`, `sensor`, `sampler`, `transport`
//! - **Host**: `receiver`, `store`, `query`, `capability`, `bridge`

pub mod bridge;
pub mod capability;
pub mod config;
pub mod error;
pub mod hrv;
pub mod observer;
pub mod query;
pub mod receiver;
pub mod sampler;
pub mod sensor;
pub mod store;
pub mod transport;
pub mod types;
pub mod window;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use bridge::{MethodBridge, MethodCall, MethodResponse};
pub use config::RelayConfig;
pub use error::RelayError;
pub use hrv::HrvCalculator;
pub use observer::{Observers, RelayEvent, RelayObserver};
pub use query::HealthQueries;
pub use receiver::HostReceiver;
pub use sampler::{Sampler, SamplerHandle, SamplerState};
pub use types::{
    HealthSnapshot, HrvDatagram, HrvEntry, HrvReceipt, HrvResult, HrvSample, TimeRange,
};
pub use window::{MeasurementWindow, SensorReading};

/// Library version
pub const RELAY_VERSION: &str = env!("CARGO_PKG_VERSION");
