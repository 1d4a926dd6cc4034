//! Shared data model: device descriptors, raw capture capabilities, and
//! frame/photo payloads exchanged between the device layer, the session
//! controller, and consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A four-character pixel encoding tag, packed big-endian.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FourCc(pub u32);

impl FourCc {
    /// MJPEG-over-OpenDML codec tag as reported by AVFoundation-class drivers.
    pub const JPEG_OPENDML: FourCc = FourCc::from_bytes(*b"dmb1");
    /// Motion-JPEG tag as reported by UVC hardware directly.
    pub const MJPG: FourCc = FourCc::from_bytes(*b"MJPG");
    /// YUV 4:2:2, Cb-Y0-Cr-Y1 byte order.
    pub const YUV422_2VUY: FourCc = FourCc::from_bytes(*b"2vuy");
    /// YUV 4:2:2, Y0-Cb-Y1-Cr byte order.
    pub const YUV422_YUVS: FourCc = FourCc::from_bytes(*b"yuvs");
    /// YUV 4:2:2 tag as reported by UVC hardware directly.
    pub const YUY2: FourCc = FourCc::from_bytes(*b"YUY2");

    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        FourCc(u32::from_be_bytes(bytes))
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Whether this tag belongs to the MJPEG encoding family.
    pub fn is_mjpeg(self) -> bool {
        self == Self::JPEG_OPENDML || self == Self::MJPG
    }

    /// Whether this tag belongs to the YUV 4:2:2 encoding family.
    pub fn is_yuv422(self) -> bool {
        self == Self::YUV422_2VUY || self == Self::YUV422_YUVS || self == Self::YUY2
    }

    /// Whether this encoding family is supported for preview/catalog purposes.
    pub fn is_supported_family(self) -> bool {
        self.is_mjpeg() || self.is_yuv422()
    }

    /// Canonical 4-character label for display: MJPEG variants render as
    /// `MJPG`, YUV 4:2:2 variants as `YUY2`, anything else as its literal
    /// ASCII characters, or `????` when the bytes are not printable ASCII.
    pub fn canonical_label(self) -> String {
        if self.is_mjpeg() {
            return "MJPG".to_string();
        }
        if self.is_yuv422() {
            return "YUY2".to_string();
        }
        let bytes = self.to_bytes();
        if bytes.iter().all(|b| (b' '..=b'~').contains(b)) {
            bytes.iter().map(|&b| b as char).collect()
        } else {
            "????".to_string()
        }
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_label())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        if bytes.iter().all(|b| (b' '..=b'~').contains(b)) {
            write!(
                f,
                "FourCc({}{}{}{})",
                bytes[0] as char, bytes[1] as char, bytes[2] as char, bytes[3] as char
            )
        } else {
            write!(f, "FourCc({:#010x})", self.0)
        }
    }
}

/// Handle and display name for a capture device, as returned by enumeration.
///
/// Descriptors are snapshots: a descriptor becomes stale when the underlying
/// hardware is removed, and a fresh enumeration replaces the whole set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Opaque identity of one device-reported capability.
///
/// Assigned by the device layer at enumeration time and never reused within
/// a provider, so matching a live capability against a catalog is a pure
/// handle comparison rather than a value comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityId(pub u64);

/// A supported frame-rate interval in frames per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameRateRange {
    pub min: f64,
    pub max: f64,
}

impl FrameRateRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// A degenerate range for hardware that reports a single discrete rate.
    pub fn fixed(fps: f64) -> Self {
        Self { min: fps, max: fps }
    }
}

/// One raw, device-native capture capability: resolution, pixel encoding,
/// and the frame-rate ranges the device supports for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub id: CapabilityId,
    pub width: u32,
    pub height: u32,
    pub pixel_format: FourCc,
    pub frame_rates: Vec<FrameRateRange>,
}

impl CapabilityDescriptor {
    pub fn new(id: CapabilityId, width: u32, height: u32, pixel_format: FourCc) -> Self {
        Self {
            id,
            width,
            height,
            pixel_format,
            frame_rates: Vec::new(),
        }
    }

    pub fn with_frame_rate(mut self, range: FrameRateRange) -> Self {
        self.frame_rates.push(range);
        self
    }

    /// The device's preferred frame-rate range for this capability.
    pub fn best_frame_rate(&self) -> Option<&FrameRateRange> {
        self.frame_rates.first()
    }
}

/// Capture session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Attaching,
    Running,
    Reconfiguring,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Attaching => "attaching",
            SessionState::Running => "running",
            SessionState::Reconfiguring => "reconfiguring",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A frame as produced by the device layer, before session normalization.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
    pub device_id: String,
    pub captured_at: DateTime<Utc>,
}

impl RawFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, device_id: String) -> Self {
        Self {
            data,
            width,
            height,
            pixel_format: String::new(),
            device_id,
            captured_at: Utc::now(),
        }
    }

    pub fn with_pixel_format(mut self, pixel_format: impl Into<String>) -> Self {
        self.pixel_format = pixel_format.into();
        self
    }
}

/// A preview frame delivered to the consumer, stamped with a session
/// sequence number and a monotonic timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewFrame {
    pub id: Uuid,
    pub sequence: u64,
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
    pub device_id: String,
    pub data: Vec<u8>,
}

/// Result of a one-shot still capture at the device layer.
///
/// `width`/`height` are the resolved output dimensions of the still path,
/// which may differ from the preview mode.
#[derive(Debug, Clone)]
pub struct StillImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A completed photo capture delivered to the consumer.
#[derive(Debug, Clone, Serialize)]
pub struct PhotoCapture {
    pub id: Uuid,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub device_name: String,
    pub captured_at: DateTime<Utc>,
}
