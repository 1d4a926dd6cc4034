//! Device seam consumed by the session controller.
//!
//! The controller owns at most one [`CaptureDevice`] at a time and drives it
//! exclusively through these traits, so backends (UVC hardware, synthetic
//! test devices) are interchangeable.

use crate::errors::CaptureError;
use crate::types::{CapabilityDescriptor, DeviceDescriptor, RawFrame, StillImage};

/// Enumerates capture devices and opens them.
pub trait DeviceProvider: Send + Sync {
    /// Snapshot of currently present devices. Descriptors from a previous
    /// enumeration are stale once the hardware set changes.
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, CaptureError>;

    /// Open a device for exclusive use.
    ///
    /// Fails with [`CaptureError::DeviceUnavailable`] when the device
    /// vanished or cannot be opened, [`CaptureError::DeviceBusy`] when it is
    /// claimed elsewhere.
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}

/// One open capture device. Dropping the value releases the device.
///
/// All mutation goes through `&mut self`; combined with the session's device
/// lock this forms the exclusive configuration window required for safe
/// capability changes.
pub trait CaptureDevice: Send {
    fn descriptor(&self) -> &DeviceDescriptor;

    /// The device's raw capability list. Capability identities are stable
    /// for the lifetime of this open handle.
    fn capabilities(&mut self) -> Result<Vec<CapabilityDescriptor>, CaptureError>;

    /// The capability the device is currently operating in.
    fn active_capability(&mut self) -> Result<CapabilityDescriptor, CaptureError>;

    /// Switch the device to the given capability. The stream must be stopped
    /// first. On [`CaptureError::FormatRejected`] the previously active
    /// capability remains in effect.
    fn apply_capability(&mut self, capability: &CapabilityDescriptor) -> Result<(), CaptureError>;

    /// Pin both minimum and maximum frame intervals to `1 / fps` seconds,
    /// preventing drivers that report a rate range from drifting.
    fn pin_frame_rate(&mut self, fps: f64) -> Result<(), CaptureError>;

    fn start_stream(&mut self) -> Result<(), CaptureError>;

    fn stop_stream(&mut self) -> Result<(), CaptureError>;

    fn is_streaming(&self) -> bool;

    /// Block until the next frame is available and return it.
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError>;

    /// Whether this device exposes a still-image output path.
    fn has_still_output(&self) -> bool;

    /// Capture one still image. Errors are reported as
    /// [`CaptureError::PhotoCaptureFailed`].
    fn capture_still(&mut self) -> Result<StillImage, CaptureError>;
}
