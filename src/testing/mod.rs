//! Testing utilities: scripted in-memory capture devices for offline
//! testing without hardware.

pub mod synthetic;

pub use synthetic::{CapabilitySpec, DeviceJournal, SyntheticDeviceConfig, SyntheticProvider};
