use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discriminant for [`CaptureError`], used by consumers that route errors
/// by kind (e.g. an `on_error(kind, message)` surface) without matching on
/// the message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureErrorKind {
    DeviceUnavailable,
    DeviceBusy,
    FormatRejected,
    NoActiveDevice,
    PhotoCaptureFailed,
}

impl CaptureErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureErrorKind::DeviceUnavailable => "device_unavailable",
            CaptureErrorKind::DeviceBusy => "device_busy",
            CaptureErrorKind::FormatRejected => "format_rejected",
            CaptureErrorKind::NoActiveDevice => "no_active_device",
            CaptureErrorKind::PhotoCaptureFailed => "photo_capture_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CaptureError {
    /// Device vanished, failed to open, or stopped delivering frames.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    /// Device exists but is claimed by another process or session.
    #[error("device busy: {0}")]
    DeviceBusy(String),
    /// Driver refused the requested capability.
    #[error("format rejected: {0}")]
    FormatRejected(String),
    /// Command issued while no device is bound and running.
    #[error("no active device: {0}")]
    NoActiveDevice(String),
    /// Driver-reported still capture failure or missing payload.
    #[error("photo capture failed: {0}")]
    PhotoCaptureFailed(String),
}

impl CaptureError {
    pub fn kind(&self) -> CaptureErrorKind {
        match self {
            CaptureError::DeviceUnavailable(_) => CaptureErrorKind::DeviceUnavailable,
            CaptureError::DeviceBusy(_) => CaptureErrorKind::DeviceBusy,
            CaptureError::FormatRejected(_) => CaptureErrorKind::FormatRejected,
            CaptureError::NoActiveDevice(_) => CaptureErrorKind::NoActiveDevice,
            CaptureError::PhotoCaptureFailed(_) => CaptureErrorKind::PhotoCaptureFailed,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CaptureError::DeviceUnavailable(msg)
            | CaptureError::DeviceBusy(msg)
            | CaptureError::FormatRejected(msg)
            | CaptureError::NoActiveDevice(msg)
            | CaptureError::PhotoCaptureFailed(msg) => msg,
        }
    }
}
