//! Scripted synthetic capture devices.
//!
//! These devices behave like UVC hardware — capability lists, stream
//! lifecycle, frame pacing, still capture — but run entirely in memory and
//! can be scripted to fail at specific points. A shared [`DeviceJournal`]
//! records every state-changing call so tests can assert ordering
//! invariants (e.g. the stream is stopped before a capability is applied).

use crate::device::{CaptureDevice, DeviceProvider};
use crate::errors::CaptureError;
use crate::types::{
    CapabilityDescriptor, CapabilityId, DeviceDescriptor, FourCc, FrameRateRange, RawFrame,
    StillImage,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted capability: resolution, encoding tag, frame-rate range.
#[derive(Debug, Clone)]
pub struct CapabilitySpec {
    pub width: u32,
    pub height: u32,
    pub pixel_format: FourCc,
    pub min_fps: f64,
    pub max_fps: f64,
}

impl CapabilitySpec {
    pub fn fixed(width: u32, height: u32, pixel_format: FourCc, fps: f64) -> Self {
        Self {
            width,
            height,
            pixel_format,
            min_fps: fps,
            max_fps: fps,
        }
    }

    pub fn range(width: u32, height: u32, pixel_format: FourCc, min_fps: f64, max_fps: f64) -> Self {
        Self {
            width,
            height,
            pixel_format,
            min_fps,
            max_fps,
        }
    }
}

/// Script for one synthetic device.
#[derive(Debug, Clone)]
pub struct SyntheticDeviceConfig {
    pub descriptor: DeviceDescriptor,
    pub capabilities: Vec<CapabilitySpec>,
    /// Index into `capabilities` the device starts out in.
    pub default_capability: usize,
    pub has_still_output: bool,
    /// Refuse every `apply_capability` with `FormatRejected`.
    pub reject_apply: bool,
    /// Fail every `capture_still` with `PhotoCaptureFailed`.
    pub fail_still: bool,
    /// Fail `open` with this error.
    pub fail_open: Option<CaptureError>,
    /// Simulate device loss: `read_frame` fails after this many frames.
    pub fail_frames_after: Option<u64>,
    /// Pacing between generated frames.
    pub frame_interval: Duration,
    /// Resolved dimensions of the still path (may differ from preview).
    pub still_dimensions: (u32, u32),
    /// Latency of the still path.
    pub still_delay: Duration,
}

impl SyntheticDeviceConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            descriptor: DeviceDescriptor::new(id, name),
            capabilities: Vec::new(),
            default_capability: 0,
            has_still_output: true,
            reject_apply: false,
            fail_still: false,
            fail_open: None,
            fail_frames_after: None,
            frame_interval: Duration::from_millis(2),
            still_dimensions: (1600, 1200),
            still_delay: Duration::ZERO,
        }
    }

    pub fn with_capability(mut self, spec: CapabilitySpec) -> Self {
        self.capabilities.push(spec);
        self
    }

    pub fn with_default_capability(mut self, index: usize) -> Self {
        self.default_capability = index;
        self
    }

    pub fn without_still_output(mut self) -> Self {
        self.has_still_output = false;
        self
    }

    pub fn with_reject_apply(mut self) -> Self {
        self.reject_apply = true;
        self
    }

    pub fn with_fail_still(mut self) -> Self {
        self.fail_still = true;
        self
    }

    pub fn with_fail_open(mut self, error: CaptureError) -> Self {
        self.fail_open = Some(error);
        self
    }

    pub fn with_fail_frames_after(mut self, frames: u64) -> Self {
        self.fail_frames_after = Some(frames);
        self
    }

    pub fn with_still_delay(mut self, delay: Duration) -> Self {
        self.still_delay = delay;
        self
    }

    pub fn with_still_dimensions(mut self, width: u32, height: u32) -> Self {
        self.still_dimensions = (width, height);
        self
    }
}

/// Observation log shared by a provider and all devices it opens.
#[derive(Default)]
pub struct DeviceJournal {
    ops: Mutex<Vec<String>>,
    opens: AtomicUsize,
    concurrent_open: AtomicUsize,
    peak_concurrent_open: AtomicUsize,
}

impl DeviceJournal {
    fn record(&self, device_id: &str, op: &str) {
        self.ops
            .lock()
            .expect("lock poisoned")
            .push(format!("{}:{}", device_id, op));
    }

    /// Every recorded operation, in call order, as `"<device_id>:<op>"`.
    pub fn operations(&self) -> Vec<String> {
        self.ops.lock().expect("lock poisoned").clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }

    pub fn concurrent_open(&self) -> usize {
        self.concurrent_open.load(Ordering::Relaxed)
    }

    /// Highest number of simultaneously open devices ever observed.
    pub fn peak_concurrent_open(&self) -> usize {
        self.peak_concurrent_open.load(Ordering::Relaxed)
    }
}

struct ProviderState {
    devices: Mutex<Vec<SyntheticDeviceConfig>>,
    capability_ids: AtomicU64,
    journal: Arc<DeviceJournal>,
}

/// In-memory [`DeviceProvider`] over scripted devices.
#[derive(Clone)]
pub struct SyntheticProvider {
    state: Arc<ProviderState>,
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self {
            state: Arc::new(ProviderState {
                devices: Mutex::new(Vec::new()),
                capability_ids: AtomicU64::new(1),
                journal: Arc::new(DeviceJournal::default()),
            }),
        }
    }

    pub fn add_device(&self, config: SyntheticDeviceConfig) {
        self.state.devices.lock().expect("lock poisoned").push(config);
    }

    pub fn journal(&self) -> Arc<DeviceJournal> {
        self.state.journal.clone()
    }
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for SyntheticProvider {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        Ok(self
            .state
            .devices
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|config| config.descriptor.clone())
            .collect())
    }

    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        let config = {
            let devices = self.state.devices.lock().expect("lock poisoned");
            devices
                .iter()
                .find(|config| config.descriptor.id == descriptor.id)
                .cloned()
        }
        .ok_or_else(|| {
            CaptureError::DeviceUnavailable(format!("No such device: {}", descriptor.id))
        })?;

        if let Some(error) = &config.fail_open {
            return Err(error.clone());
        }

        // Fresh capability identities on every open: descriptors from a
        // previous open (a stale catalog) must never match.
        let capabilities = config
            .capabilities
            .iter()
            .map(|spec| {
                CapabilityDescriptor::new(
                    CapabilityId(self.state.capability_ids.fetch_add(1, Ordering::Relaxed)),
                    spec.width,
                    spec.height,
                    spec.pixel_format,
                )
                .with_frame_rate(FrameRateRange::new(spec.min_fps, spec.max_fps))
            })
            .collect::<Vec<_>>();

        let journal = self.state.journal.clone();
        journal.record(&config.descriptor.id, "open");
        journal.opens.fetch_add(1, Ordering::Relaxed);
        let now_open = journal.concurrent_open.fetch_add(1, Ordering::Relaxed) + 1;
        journal.peak_concurrent_open.fetch_max(now_open, Ordering::Relaxed);

        let active = config.default_capability.min(capabilities.len().saturating_sub(1));
        Ok(Box::new(SyntheticDevice {
            descriptor: config.descriptor.clone(),
            capabilities,
            active,
            streaming: false,
            frames_read: 0,
            config,
            journal,
        }))
    }
}

struct SyntheticDevice {
    descriptor: DeviceDescriptor,
    capabilities: Vec<CapabilityDescriptor>,
    active: usize,
    streaming: bool,
    frames_read: u64,
    config: SyntheticDeviceConfig,
    journal: Arc<DeviceJournal>,
}

impl SyntheticDevice {
    fn active_descriptor(&self) -> Result<&CapabilityDescriptor, CaptureError> {
        self.capabilities.get(self.active).ok_or_else(|| {
            CaptureError::DeviceUnavailable("synthetic device has no capabilities".to_string())
        })
    }
}

impl CaptureDevice for SyntheticDevice {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn capabilities(&mut self) -> Result<Vec<CapabilityDescriptor>, CaptureError> {
        Ok(self.capabilities.clone())
    }

    fn active_capability(&mut self) -> Result<CapabilityDescriptor, CaptureError> {
        self.active_descriptor().cloned()
    }

    fn apply_capability(&mut self, capability: &CapabilityDescriptor) -> Result<(), CaptureError> {
        self.journal.record(&self.descriptor.id, "apply_capability");
        if self.streaming {
            // Contract violation by the caller; surface it loudly.
            return Err(CaptureError::FormatRejected(
                "capability applied while the stream is open".to_string(),
            ));
        }
        if self.config.reject_apply {
            return Err(CaptureError::FormatRejected(
                "synthetic device rejects capability changes".to_string(),
            ));
        }
        match self
            .capabilities
            .iter()
            .position(|cap| cap.id == capability.id)
        {
            Some(index) => {
                self.active = index;
                Ok(())
            }
            None => Err(CaptureError::FormatRejected(
                "capability does not belong to this device".to_string(),
            )),
        }
    }

    fn pin_frame_rate(&mut self, fps: f64) -> Result<(), CaptureError> {
        self.journal
            .record(&self.descriptor.id, &format!("pin_frame_rate {:.2}", fps));
        Ok(())
    }

    fn start_stream(&mut self) -> Result<(), CaptureError> {
        self.journal.record(&self.descriptor.id, "start_stream");
        self.streaming = true;
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), CaptureError> {
        self.journal.record(&self.descriptor.id, "stop_stream");
        self.streaming = false;
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        if !self.streaming {
            return Err(CaptureError::DeviceUnavailable(
                "stream is not open".to_string(),
            ));
        }
        if let Some(limit) = self.config.fail_frames_after {
            if self.frames_read >= limit {
                return Err(CaptureError::DeviceUnavailable(
                    "synthetic device unplugged".to_string(),
                ));
            }
        }
        std::thread::sleep(self.config.frame_interval);
        self.frames_read += 1;

        let cap = self.active_descriptor()?.clone();
        Ok(synthetic_raw_frame(
            self.frames_read,
            &cap,
            &self.descriptor.id,
        ))
    }

    fn has_still_output(&self) -> bool {
        self.config.has_still_output
    }

    fn capture_still(&mut self) -> Result<StillImage, CaptureError> {
        self.journal.record(&self.descriptor.id, "capture_still");
        if !self.config.still_delay.is_zero() {
            std::thread::sleep(self.config.still_delay);
        }
        if self.config.fail_still {
            return Err(CaptureError::PhotoCaptureFailed(
                "synthetic still path failure".to_string(),
            ));
        }
        let (width, height) = self.config.still_dimensions;
        // JPEG-looking opaque payload; consumers treat it as raw bytes.
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
        data.extend((0..64).map(|i| (i * 3) as u8));
        data.extend([0xFF, 0xD9]);
        Ok(StillImage {
            data,
            width,
            height,
        })
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        self.journal.record(&self.descriptor.id, "close");
        self.journal.concurrent_open.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Generate a gradient frame with content that varies per frame number.
fn synthetic_raw_frame(frame_number: u64, cap: &CapabilityDescriptor, device_id: &str) -> RawFrame {
    let (width, height) = (cap.width.min(64), cap.height.min(48));
    let mut data = vec![0u8; (width * height * 3) as usize];
    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }
    RawFrame::new(data, cap.width, cap.height, device_id.to_string())
        .with_pixel_format(cap.pixel_format.canonical_label())
}
