//! UVC hardware backend built on nokhwa.
//!
//! nokhwa reports formats as (resolution, frame format, fps) tuples; they
//! are mapped to [`CapabilityDescriptor`]s with stable [`CapabilityId`]s so
//! the session controller can match live state against a catalog by handle.

use crate::config::StillConfig;
use crate::device::{CaptureDevice, DeviceProvider};
use crate::errors::CaptureError;
use crate::types::{
    CapabilityDescriptor, CapabilityId, DeviceDescriptor, FourCc, FrameRateRange, RawFrame,
    StillImage,
};
use image::codecs::jpeg::JpegEncoder;
use nokhwa::{
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution},
    Camera,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Enumerates and opens UVC capture devices.
///
/// Capability identities are allocated from one provider-wide counter, so a
/// descriptor from a previous open never aliases one from a later open.
#[derive(Clone)]
pub struct UvcProvider {
    capability_ids: Arc<AtomicU64>,
    jpeg_quality: u8,
}

impl UvcProvider {
    pub fn new() -> Self {
        Self::with_still_config(&StillConfig { jpeg_quality: 95 })
    }

    pub fn with_still_config(config: &StillConfig) -> Self {
        Self {
            capability_ids: Arc::new(AtomicU64::new(1)),
            jpeg_quality: config.jpeg_quality,
        }
    }
}

impl Default for UvcProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for UvcProvider {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        let cameras = query(ApiBackend::Auto)
            .map_err(|e| CaptureError::DeviceUnavailable(format!("Failed to query cameras: {}", e)))?;

        let devices = cameras
            .into_iter()
            .map(|info| DeviceDescriptor::new(info.index().to_string(), info.human_name()))
            .collect::<Vec<_>>();
        log::debug!("Enumerated {} capture devices", devices.len());
        Ok(devices)
    }

    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        let index = descriptor
            .id
            .parse::<u32>()
            .map_err(|_| CaptureError::DeviceUnavailable(format!("Invalid device id: {}", descriptor.id)))?;

        // Open with the device's own default format; attach must not
        // renegotiate the active capability.
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::None);
        let mut camera =
            Camera::new(CameraIndex::Index(index), requested).map_err(map_open_error)?;

        let formats = camera.compatible_camera_formats().map_err(|e| {
            CaptureError::DeviceUnavailable(format!("Failed to read device formats: {}", e))
        })?;

        let capabilities = formats
            .iter()
            .map(|format| {
                CapabilityDescriptor::new(
                    CapabilityId(self.capability_ids.fetch_add(1, Ordering::Relaxed)),
                    format.resolution().width_x,
                    format.resolution().height_y,
                    fourcc_for(format.format()),
                )
                .with_frame_rate(FrameRateRange::fixed(format.frame_rate() as f64))
            })
            .collect::<Vec<_>>();
        log::debug!(
            "Device {} reports {} native formats",
            descriptor.id,
            capabilities.len()
        );

        let label = fourcc_for(camera.camera_format().format()).canonical_label();
        Ok(Box::new(UvcDevice {
            descriptor: descriptor.clone(),
            camera,
            capabilities,
            capability_ids: self.capability_ids.clone(),
            active: None,
            format_label: label,
            jpeg_quality: self.jpeg_quality,
        }))
    }
}

/// One open UVC device.
pub struct UvcDevice {
    descriptor: DeviceDescriptor,
    camera: Camera,
    capabilities: Vec<CapabilityDescriptor>,
    capability_ids: Arc<AtomicU64>,
    /// Capability last applied through this handle, if any.
    active: Option<CapabilityId>,
    format_label: String,
    jpeg_quality: u8,
}

impl CaptureDevice for UvcDevice {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn capabilities(&mut self) -> Result<Vec<CapabilityDescriptor>, CaptureError> {
        Ok(self.capabilities.clone())
    }

    fn active_capability(&mut self) -> Result<CapabilityDescriptor, CaptureError> {
        let current = self.camera.camera_format();

        // Prefer the capability we last applied while it still matches.
        if let Some(active) = self
            .active
            .and_then(|id| self.capabilities.iter().find(|cap| cap.id == id))
        {
            if format_matches(active, &current) {
                return Ok(active.clone());
            }
        }
        if let Some(cap) = self
            .capabilities
            .iter()
            .find(|cap| format_matches(cap, &current))
        {
            return Ok(cap.clone());
        }

        // The device is operating outside its enumerated set; synthesize a
        // descriptor with a fresh identity so it matches no catalog entry.
        Ok(CapabilityDescriptor::new(
            CapabilityId(self.capability_ids.fetch_add(1, Ordering::Relaxed)),
            current.resolution().width_x,
            current.resolution().height_y,
            fourcc_for(current.format()),
        )
        .with_frame_rate(FrameRateRange::fixed(current.frame_rate() as f64)))
    }

    fn apply_capability(&mut self, capability: &CapabilityDescriptor) -> Result<(), CaptureError> {
        let frame_format = frame_format_for(capability.pixel_format).ok_or_else(|| {
            CaptureError::FormatRejected(format!(
                "unsupported pixel format {}",
                capability.pixel_format
            ))
        })?;
        let fps = capability
            .best_frame_rate()
            .map(|range| range.max.round() as u32)
            .unwrap_or(30);

        let target = nokhwa::utils::CameraFormat::new(
            Resolution::new(capability.width, capability.height),
            frame_format,
            fps,
        );
        self.camera
            .set_camera_requset(RequestedFormat::new::<RgbFormat>(RequestedFormatType::Exact(
                target,
            )))
            .map_err(|e| CaptureError::FormatRejected(format!("Driver refused format: {}", e)))?;

        self.active = Some(capability.id);
        self.format_label = capability.pixel_format.canonical_label();
        Ok(())
    }

    fn pin_frame_rate(&mut self, fps: f64) -> Result<(), CaptureError> {
        let current = self.camera.camera_format();
        let pinned = nokhwa::utils::CameraFormat::new(
            current.resolution(),
            current.format(),
            fps.round() as u32,
        );
        self.camera
            .set_camera_requset(RequestedFormat::new::<RgbFormat>(RequestedFormatType::Exact(
                pinned,
            )))
            .map_err(|e| CaptureError::FormatRejected(format!("Failed to pin frame rate: {}", e)))?;
        Ok(())
    }

    fn start_stream(&mut self) -> Result<(), CaptureError> {
        self.camera
            .open_stream()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("Failed to start stream: {}", e)))
    }

    fn stop_stream(&mut self) -> Result<(), CaptureError> {
        self.camera
            .stop_stream()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("Failed to stop stream: {}", e)))
    }

    fn is_streaming(&self) -> bool {
        self.camera.is_stream_open()
    }

    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        let frame = self
            .camera
            .frame()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("Failed to capture frame: {}", e)))?;

        let resolution = frame.resolution();
        Ok(RawFrame::new(
            frame.buffer_bytes().to_vec(),
            resolution.width_x,
            resolution.height_y,
            self.descriptor.id.clone(),
        )
        .with_pixel_format(self.format_label.clone()))
    }

    fn has_still_output(&self) -> bool {
        true
    }

    /// Grab one frame through the still path and deliver encoded JPEG
    /// bytes. MJPEG payloads pass through untouched; anything else is
    /// treated as RGB24 and encoded here. Dimensions are resolved from the
    /// still payload itself, not assumed from the preview mode.
    fn capture_still(&mut self) -> Result<StillImage, CaptureError> {
        let frame = self
            .camera
            .frame()
            .map_err(|e| CaptureError::PhotoCaptureFailed(format!("Failed to capture still: {}", e)))?;

        let bytes = frame.buffer_bytes().to_vec();
        if bytes.is_empty() {
            return Err(CaptureError::PhotoCaptureFailed(
                "Driver returned an empty still payload".to_string(),
            ));
        }

        if is_jpeg(&bytes) {
            let image = image::load_from_memory(&bytes).map_err(|e| {
                CaptureError::PhotoCaptureFailed(format!("Failed to parse still payload: {}", e))
            })?;
            return Ok(StillImage {
                width: image.width(),
                height: image.height(),
                data: bytes,
            });
        }

        let resolution = frame.resolution();
        let (width, height) = (resolution.width_x, resolution.height_y);
        if bytes.len() != (width as usize * height as usize * 3) {
            return Err(CaptureError::PhotoCaptureFailed(format!(
                "Unexpected still payload size: {} bytes for {}x{}",
                bytes.len(),
                width,
                height
            )));
        }

        let mut encoded = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut encoded, self.jpeg_quality);
        encoder
            .encode(&bytes, width, height, image::ExtendedColorType::Rgb8)
            .map_err(|e| CaptureError::PhotoCaptureFailed(format!("JPEG encode failed: {}", e)))?;

        Ok(StillImage {
            data: encoded,
            width,
            height,
        })
    }
}

fn map_open_error(e: nokhwa::NokhwaError) -> CaptureError {
    let message = e.to_string();
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("busy") || lowered.contains("in use") {
        CaptureError::DeviceBusy(message)
    } else {
        CaptureError::DeviceUnavailable(message)
    }
}

fn fourcc_for(format: FrameFormat) -> FourCc {
    match format {
        FrameFormat::MJPEG => FourCc::MJPG,
        FrameFormat::YUYV => FourCc::YUY2,
        FrameFormat::NV12 => FourCc::from_bytes(*b"NV12"),
        FrameFormat::GRAY => FourCc::from_bytes(*b"GREY"),
        _ => FourCc::from_bytes(*b"RGB3"),
    }
}

fn frame_format_for(tag: FourCc) -> Option<FrameFormat> {
    if tag.is_mjpeg() {
        Some(FrameFormat::MJPEG)
    } else if tag.is_yuv422() {
        Some(FrameFormat::YUYV)
    } else {
        None
    }
}

fn format_matches(cap: &CapabilityDescriptor, format: &nokhwa::utils::CameraFormat) -> bool {
    cap.width == format.resolution().width_x
        && cap.height == format.resolution().height_y
        && cap.pixel_format == fourcc_for(format.format())
        && cap
            .best_frame_rate()
            .is_some_and(|range| range.max.round() as u32 == format.frame_rate())
}

fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 3 && bytes[0] == 0xFF && bytes[1] == 0xD8 && bytes[2] == 0xFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_format_mapping_covers_supported_families() {
        assert_eq!(frame_format_for(FourCc::MJPG), Some(FrameFormat::MJPEG));
        assert_eq!(frame_format_for(FourCc::JPEG_OPENDML), Some(FrameFormat::MJPEG));
        assert_eq!(frame_format_for(FourCc::YUY2), Some(FrameFormat::YUYV));
        assert_eq!(frame_format_for(FourCc::YUV422_2VUY), Some(FrameFormat::YUYV));
        assert_eq!(frame_format_for(FourCc::from_bytes(*b"NV12")), None);
    }

    #[test]
    fn jpeg_sniffing() {
        assert!(is_jpeg(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(!is_jpeg(&[0x00, 0x01, 0x02]));
        assert!(!is_jpeg(&[]));
    }
}
