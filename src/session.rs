//! Capture session controller.
//!
//! Owns the lifecycle of exactly one device: attach/detach, safe mode
//! switching while the pipeline is live, and coordination between
//! continuous frame delivery and one-shot photo capture.
//!
//! State machine: `Idle → Attaching → Running`,
//! `Running → Reconfiguring → Running`, any state `→ Failed` on
//! unrecoverable error, any state `→ Idle` on explicit detach.

use crate::catalog::{ModeCatalog, ModeDescriptor};
use crate::config::SessionConfig;
use crate::device::{CaptureDevice, DeviceProvider};
use crate::errors::CaptureError;
use crate::events::{EventChannel, EventReceiver, SessionEvent};
use crate::types::{DeviceDescriptor, PhotoCapture, PreviewFrame, RawFrame, SessionState};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Frame-rate band in which the frame interval is pinned to exactly 1/30 s
/// after a capability change. Hardware frequently reports a rate range even
/// when only one discrete rate is meaningful.
const PIN_BAND_LOW: f64 = 29.0;
const PIN_BAND_HIGH: f64 = 31.0;
const PIN_TARGET_FPS: f64 = 30.0;

struct Inner {
    state: Mutex<SessionState>,
    device: Mutex<Option<Box<dyn CaptureDevice>>>,
    catalog: Mutex<ModeCatalog>,
    events: Arc<EventChannel>,
    stop_flag: AtomicBool,
    paused: AtomicBool,
    /// Bumped on every detach; photo completions from an older epoch are
    /// dropped instead of delivered.
    epoch: AtomicU64,
    next_sequence: AtomicU64,
    started: Instant,
    config: SessionConfig,
    worker: Mutex<Option<JoinHandle<()>>>,
    starter: Mutex<Option<JoinHandle<()>>>,
}

/// Controller for one capture session.
///
/// Explicitly constructed and explicitly owned; there is no ambient global
/// instance. All state-changing commands are expected from a single
/// coordination context, while frames and photo completions arrive on
/// worker threads and are marshaled through one ordered event channel.
pub struct CaptureController {
    inner: Arc<Inner>,
    provider: Box<dyn DeviceProvider>,
}

impl CaptureController {
    pub fn new(provider: Box<dyn DeviceProvider>, config: SessionConfig) -> Self {
        let events = EventChannel::new(config.frame_queue_capacity);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState::Idle),
                device: Mutex::new(None),
                catalog: Mutex::new(ModeCatalog::empty()),
                events,
                stop_flag: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                next_sequence: AtomicU64::new(1),
                started: Instant::now(),
                config,
                worker: Mutex::new(None),
                starter: Mutex::new(None),
            }),
            provider,
        }
    }

    /// Consumer handle for the session's ordered event stream.
    pub fn events(&self) -> EventReceiver {
        EventReceiver::new(self.inner.events.clone())
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock().expect("lock poisoned")
    }

    /// Currently present capture devices.
    pub fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        self.provider.enumerate()
    }

    /// Display name of the attached device, if any.
    pub fn device_name(&self) -> Option<String> {
        let guard = self.inner.device.lock().expect("lock poisoned");
        guard.as_ref().map(|dev| dev.descriptor().name.clone())
    }

    /// Bind a device as the session's sole input and start capture.
    ///
    /// Any prior binding is fully detached first; no two devices are ever
    /// concurrently open. Open/bind failures surface synchronously and move
    /// the session to `Failed` with no partial input attached. The stream
    /// start runs on a background thread; `Running` becomes observable only
    /// once the backend acknowledges activation.
    ///
    /// Attach never applies a mode: the device keeps its own default
    /// capability until the user explicitly selects one.
    pub fn attach(&self, descriptor: &DeviceDescriptor) -> Result<(), CaptureError> {
        self.detach();

        log::info!("Attaching device {} ({})", descriptor.id, descriptor.name);
        let mut device = match self.provider.open(descriptor) {
            Ok(device) => device,
            Err(e) => {
                log::error!("Failed to open device {}: {}", descriptor.id, e);
                set_state(&self.inner, SessionState::Failed);
                return Err(e);
            }
        };

        let capabilities = match device.capabilities() {
            Ok(capabilities) => capabilities,
            Err(e) => {
                log::error!("Failed to read capabilities of {}: {}", descriptor.id, e);
                set_state(&self.inner, SessionState::Failed);
                return Err(e);
            }
        };
        let catalog = ModeCatalog::enumerate(&capabilities);
        log::info!(
            "Device {} reports {} capabilities, {} selectable modes",
            descriptor.id,
            capabilities.len(),
            catalog.len()
        );

        *self.inner.catalog.lock().expect("lock poisoned") = catalog;
        *self.inner.device.lock().expect("lock poisoned") = Some(device);
        self.inner.stop_flag.store(false, Ordering::Relaxed);
        self.inner.paused.store(false, Ordering::Relaxed);
        set_state(&self.inner, SessionState::Attaching);

        // Stream start can be slow on real hardware; keep it off the
        // caller's thread. Completion is observable via StateChanged.
        let inner = self.inner.clone();
        let handle = std::thread::Builder::new()
            .name("scopecam-session-start".to_string())
            .spawn(move || start_session(inner))
            .map_err(|e| {
                set_state(&self.inner, SessionState::Failed);
                CaptureError::DeviceUnavailable(format!("Failed to spawn session start: {}", e))
            })?;
        *self.inner.starter.lock().expect("lock poisoned") = Some(handle);
        Ok(())
    }

    /// Stop capture, unbind the device, and return to `Idle`.
    ///
    /// Safe from every state: a no-op in `Idle`, clears `Failed`, and drops
    /// any in-flight photo completion instead of delivering it.
    pub fn detach(&self) {
        self.inner.epoch.fetch_add(1, Ordering::Relaxed);
        self.inner.stop_flag.store(true, Ordering::Relaxed);
        self.inner.paused.store(false, Ordering::Relaxed);

        let join_timeout = Duration::from_millis(self.inner.config.worker_join_timeout_ms);
        let starter = self.inner.starter.lock().expect("lock poisoned").take();
        if let Some(handle) = starter {
            join_with_timeout(handle, join_timeout, "session start");
        }
        let worker = self.inner.worker.lock().expect("lock poisoned").take();
        if let Some(handle) = worker {
            join_with_timeout(handle, join_timeout, "frame worker");
        }

        {
            let mut guard = self.inner.device.lock().expect("lock poisoned");
            if let Some(mut device) = guard.take() {
                if device.is_streaming() {
                    if let Err(e) = device.stop_stream() {
                        log::warn!("Failed to stop stream during detach: {}", e);
                    }
                }
                log::info!("Released device {}", device.descriptor().id);
            }
        }

        // Stale catalogs are discarded wholesale, never patched.
        *self.inner.catalog.lock().expect("lock poisoned") = ModeCatalog::empty();

        set_state(&self.inner, SessionState::Idle);
    }

    /// The selectable modes of the attached device, best first.
    pub fn list_modes(&self) -> Vec<ModeDescriptor> {
        self.inner
            .catalog
            .lock()
            .expect("lock poisoned")
            .modes()
            .to_vec()
    }

    /// Catalog index of the device's currently active capability, falling
    /// back to the best-ranked entry when the active capability was
    /// filtered out of the catalog. `None` only when the catalog is empty.
    ///
    /// The fallback is a selection hint; it never forces a mode change on
    /// the device.
    pub fn current_mode_index(&self) -> Option<usize> {
        let active = {
            let mut guard = self.inner.device.lock().expect("lock poisoned");
            guard.as_mut().and_then(|dev| dev.active_capability().ok())
        };
        let catalog = self.inner.catalog.lock().expect("lock poisoned");
        catalog.selection_index(active.as_ref())
    }

    /// Switch the device to `mode`.
    ///
    /// Only valid while `Running`, with a mode from the current catalog.
    /// Frame delivery is quiesced for the whole reconfiguration window; a
    /// rejected format leaves the previously active mode in effect and the
    /// session `Running`.
    pub fn apply_mode(&self, mode: &ModeDescriptor) -> Result<(), CaptureError> {
        {
            let state = self.inner.state.lock().expect("lock poisoned");
            if *state != SessionState::Running {
                return Err(CaptureError::NoActiveDevice(format!(
                    "mode apply requires a running session (state: {})",
                    state
                )));
            }
        }
        {
            let catalog = self.inner.catalog.lock().expect("lock poisoned");
            if catalog.find_by_id(mode.capability_id()).is_none() {
                return Err(CaptureError::FormatRejected(format!(
                    "mode '{}' does not belong to the current device's catalog",
                    mode.display_label
                )));
            }
        }

        // Quiesce frame delivery first: mode changes must never race active
        // frame reads. The worker checks the pause flag under the device
        // lock, so once we hold the lock no frame event can interleave.
        self.inner.paused.store(true, Ordering::Relaxed);
        let mut guard = self.inner.device.lock().expect("lock poisoned");
        let Some(device) = guard.as_mut() else {
            self.inner.paused.store(false, Ordering::Relaxed);
            return Err(CaptureError::NoActiveDevice(
                "device was detached during mode apply".to_string(),
            ));
        };

        set_state(&self.inner, SessionState::Reconfiguring);

        let was_streaming = device.is_streaming();
        if was_streaming {
            if let Err(e) = device.stop_stream() {
                log::warn!("Failed to stop stream before reconfigure: {}", e);
            }
        }

        let applied = device.apply_capability(mode.capability());
        if applied.is_ok() {
            let upper = mode
                .capability()
                .best_frame_rate()
                .map(|range| range.max)
                .unwrap_or(mode.fps);
            if upper > PIN_BAND_LOW && upper < PIN_BAND_HIGH {
                if let Err(e) = device.pin_frame_rate(PIN_TARGET_FPS) {
                    log::warn!("Failed to pin frame rate: {}", e);
                }
            }
            log::info!("Applied mode {}", mode.display_label);
        } else if let Err(e) = &applied {
            log::warn!("Device rejected capability for '{}': {}", mode.display_label, e);
        }

        // Resume regardless of the apply outcome: a rejected format leaves
        // the previously active capability untouched.
        if was_streaming {
            if let Err(e) = device.start_stream() {
                log::error!("Failed to restart stream after reconfigure: {}", e);
                self.inner.stop_flag.store(true, Ordering::Relaxed);
                drop(guard);
                self.inner.paused.store(false, Ordering::Relaxed);
                self.inner.events.send(SessionEvent::Error(e.clone()));
                set_state(&self.inner, SessionState::Failed);
                return Err(e);
            }
        }
        drop(guard);
        self.inner.paused.store(false, Ordering::Relaxed);
        set_state(&self.inner, SessionState::Running);
        applied
    }

    /// Switch to the catalog entry at `index`.
    pub fn select_mode(&self, index: usize) -> Result<(), CaptureError> {
        let mode = {
            let catalog = self.inner.catalog.lock().expect("lock poisoned");
            catalog.get(index).cloned()
        };
        match mode {
            Some(mode) => self.apply_mode(&mode),
            None => Err(CaptureError::FormatRejected(format!(
                "no mode at index {}",
                index
            ))),
        }
    }

    /// Request one still photo.
    ///
    /// A no-op outside `Running` or when the device has no still output —
    /// a stale UI trigger must not crash and must not emit an error event.
    /// Otherwise exactly one terminal event follows asynchronously: a
    /// [`SessionEvent::Photo`] or a [`SessionEvent::Error`]. Concurrent
    /// requests are not coalesced; preventing them is the caller's job.
    pub fn take_photo(&self) {
        {
            let state = self.inner.state.lock().expect("lock poisoned");
            if *state != SessionState::Running {
                log::debug!("Photo request ignored (state: {})", state);
                return;
            }
        }
        {
            let guard = self.inner.device.lock().expect("lock poisoned");
            match guard.as_ref() {
                Some(device) if device.has_still_output() => {}
                _ => {
                    log::debug!("Photo request ignored (no still output)");
                    return;
                }
            }
        }

        let epoch = self.inner.epoch.load(Ordering::Relaxed);
        let inner = self.inner.clone();
        let spawned = std::thread::Builder::new()
            .name("scopecam-still-capture".to_string())
            .spawn(move || capture_still(inner, epoch));
        if let Err(e) = spawned {
            self.inner
                .events
                .send(SessionEvent::Error(CaptureError::PhotoCaptureFailed(
                    format!("Failed to spawn still capture: {}", e),
                )));
        }
    }

    /// `selectDevice` command surface: alias for [`Self::attach`].
    pub fn select_device(&self, descriptor: &DeviceDescriptor) -> Result<(), CaptureError> {
        self.attach(descriptor)
    }

    /// `stop` command surface: alias for [`Self::detach`].
    pub fn stop(&self) {
        self.detach();
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        // Unwind to Idle so the device is released before the process exits.
        self.detach();
        self.inner.events.close();
    }
}

fn set_state(inner: &Inner, state: SessionState) {
    let mut guard = inner.state.lock().expect("lock poisoned");
    if *guard == state {
        return;
    }
    log::debug!("Session state {} -> {}", guard, state);
    *guard = state;
    inner.events.send(SessionEvent::StateChanged(state));
}

/// Background half of attach: acknowledge stream activation, then bring up
/// the frame worker and make `Running` observable.
fn start_session(inner: Arc<Inner>) {
    let started = {
        let mut guard = inner.device.lock().expect("lock poisoned");
        match guard.as_mut() {
            // Detached while the start was queued.
            None => return,
            Some(device) => device.start_stream(),
        }
    };

    match started {
        Ok(()) => {
            if inner.stop_flag.load(Ordering::Relaxed) {
                return;
            }
            // Activation is acknowledged; make Running observable before the
            // worker starts so a worker failure can only move Running -> Failed.
            set_state(&inner, SessionState::Running);
            let worker_inner = inner.clone();
            let handle = std::thread::Builder::new()
                .name("scopecam-frame-worker".to_string())
                .spawn(move || frame_loop(worker_inner));
            match handle {
                Ok(handle) => {
                    *inner.worker.lock().expect("lock poisoned") = Some(handle);
                }
                Err(e) => {
                    log::error!("Failed to spawn frame worker: {}", e);
                    inner
                        .events
                        .send(SessionEvent::Error(CaptureError::DeviceUnavailable(
                            format!("Failed to spawn frame worker: {}", e),
                        )));
                    set_state(&inner, SessionState::Failed);
                }
            }
        }
        Err(e) => {
            log::error!("Stream start failed: {}", e);
            // No partial binding survives a failed start.
            *inner.device.lock().expect("lock poisoned") = None;
            inner.events.send(SessionEvent::Error(e));
            set_state(&inner, SessionState::Failed);
        }
    }
}

/// Dedicated frame delivery loop. Frames are read and published under the
/// device lock so a reconfigure that holds the lock is guaranteed quiet.
fn frame_loop(inner: Arc<Inner>) {
    log::debug!("Frame worker started");
    loop {
        if inner.stop_flag.load(Ordering::Relaxed) {
            break;
        }
        if inner.paused.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(inner.config.pause_poll_ms));
            continue;
        }

        let mut failure: Option<CaptureError> = None;
        let mut detached = false;
        {
            let mut guard = inner.device.lock().expect("lock poisoned");
            // Re-check under the lock; a reconfigure or detach may have
            // started since the flag checks above.
            if !inner.stop_flag.load(Ordering::Relaxed) && !inner.paused.load(Ordering::Relaxed) {
                match guard.as_mut() {
                    None => detached = true,
                    Some(device) => match device.read_frame() {
                        Ok(raw) => {
                            let frame = normalize_frame(&inner, raw);
                            inner.events.send_frame(frame);
                        }
                        Err(e) => {
                            inner.events.send(SessionEvent::Error(e.clone()));
                            failure = Some(e);
                        }
                    },
                }
            }
        }

        if detached {
            break;
        }
        if let Some(e) = failure {
            // Device loss while running is unrecoverable; only an explicit
            // detach leaves Failed.
            log::error!("Frame delivery failed: {}", e);
            if !inner.stop_flag.load(Ordering::Relaxed) {
                set_state(&inner, SessionState::Failed);
            }
            break;
        }
    }
    log::debug!("Frame worker exited");
}

/// One-shot still capture. The epoch snapshot drops completions that
/// outlive their session: a detach mid-capture produces no event.
fn capture_still(inner: Arc<Inner>, epoch: u64) {
    let outcome = {
        let mut guard = inner.device.lock().expect("lock poisoned");
        match guard.as_mut() {
            None => None,
            Some(device) => {
                let device_name = device.descriptor().name.clone();
                Some((device.capture_still(), device_name))
            }
        }
    };
    let Some((result, device_name)) = outcome else {
        return;
    };
    if inner.epoch.load(Ordering::Relaxed) != epoch {
        log::debug!("Dropping stale photo completion");
        return;
    }
    match result {
        Ok(still) => {
            log::info!(
                "Captured still {}x{} ({} bytes)",
                still.width,
                still.height,
                still.data.len()
            );
            inner.events.send(SessionEvent::Photo(PhotoCapture {
                id: Uuid::new_v4(),
                data: still.data,
                width: still.width,
                height: still.height,
                device_name,
                captured_at: Utc::now(),
            }));
        }
        Err(e) => {
            log::error!("Still capture failed: {}", e);
            inner.events.send(SessionEvent::Error(e));
        }
    }
}

fn normalize_frame(inner: &Inner, raw: RawFrame) -> PreviewFrame {
    let sequence = inner.next_sequence.fetch_add(1, Ordering::Relaxed);
    let timestamp_us = inner.started.elapsed().as_micros() as u64;
    PreviewFrame {
        id: Uuid::new_v4(),
        sequence,
        timestamp_us,
        width: raw.width,
        height: raw.height,
        pixel_format: raw.pixel_format,
        device_id: raw.device_id,
        data: raw.data,
    }
}

fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) {
    let start = Instant::now();
    let mut handle = Some(handle);
    loop {
        if handle.as_ref().is_some_and(|h| h.is_finished()) {
            let _ = handle.take().expect("handle present").join();
            return;
        }
        if start.elapsed() >= timeout {
            // Best-effort: do not hang the coordination context. The thread
            // exits on its next stop-flag check.
            log::warn!("Timed out joining {} thread", name);
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
