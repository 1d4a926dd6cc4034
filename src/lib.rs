//! ScopeCam: UVC capture-mode cataloging and capture session management
//!
//! This crate provides the core of a camera viewer application: it turns a
//! device's raw capability list into a stable, user-facing mode catalog and
//! manages the capture session around it.
//!
//! # Features
//! - Device-reported capability discovery, filtering, and ranking
//! - Deterministic mode labels (`1280 x 720  MJPG  30.00 fps`)
//! - Session state machine with safe mode switching while live
//! - Continuous preview frames plus one-shot photo capture
//! - Ordered event delivery with bounded, latency-free frame queueing
//! - Synthetic in-memory devices for offline testing
//!
//! # Usage
//! ```rust,no_run
//! use scopecam::{CaptureController, SessionConfig};
//! use scopecam::platform::UvcProvider;
//!
//! let controller = CaptureController::new(
//!     Box::new(UvcProvider::new()),
//!     SessionConfig::default(),
//! );
//! let events = controller.events();
//! let devices = controller.list_devices().expect("enumeration failed");
//! if let Some(device) = devices.first() {
//!     controller.attach(device).expect("attach failed");
//! }
//! ```
pub mod catalog;
pub mod config;
pub mod device;
pub mod errors;
pub mod events;
pub mod platform;
pub mod session;
pub mod testing;
pub mod types;

// Re-exports for convenience
pub use catalog::{ModeCatalog, ModeDescriptor};
pub use config::{ScopecamConfig, SessionConfig, StillConfig};
pub use errors::{CaptureError, CaptureErrorKind};
pub use events::{EventReceiver, SessionEvent};
pub use session::CaptureController;
pub use types::{
    CapabilityDescriptor, CapabilityId, DeviceDescriptor, FourCc, FrameRateRange, PhotoCapture,
    PreviewFrame, SessionState,
};

/// Initialize logging for the capture system
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "scopecam=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}
