//! Mode catalog: turns a device's raw capability list into a filtered,
//! normalized, best-first list of user-selectable modes.
//!
//! The catalog is rebuilt in full whenever the attached device changes and
//! never mutated afterwards; a stale catalog is discarded wholesale.

use crate::types::{CapabilityDescriptor, CapabilityId};
use serde::Serialize;
use std::cmp::Ordering;

/// Upper bound on admitted frame rates. The 0.1 tolerance admits ~30 fps
/// rounding artifacts reported by hardware.
pub const MAX_MODE_FPS: f64 = 30.1;

const FPS_SNAP_LOW: f64 = 29.9;
const FPS_SNAP_HIGH: f64 = 30.1;

/// Snap rates in the open interval (29.9, 30.1) to exactly 30.0, absorbing
/// the common 29.97-vs-30 hardware discrepancy.
pub fn normalize_fps(fps: f64) -> f64 {
    if fps > FPS_SNAP_LOW && fps < FPS_SNAP_HIGH {
        30.0
    } else {
        fps
    }
}

/// One user-selectable capture mode derived from a raw capability.
///
/// Immutable once built. Retains the originating [`CapabilityDescriptor`]
/// so the mode can later be applied to the device; identity of that
/// back-reference (its [`CapabilityId`]) is what `find_active` matches on.
#[derive(Debug, Clone, Serialize)]
pub struct ModeDescriptor {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Canonical 4-character pixel format tag, e.g. `MJPG` or `YUY2`.
    pub pixel_format: String,
    /// Deterministic label: `"<W> x <H>  <TAG>  <FPS .2> fps"`.
    pub display_label: String,
    capability: CapabilityDescriptor,
}

impl ModeDescriptor {
    fn from_capability(capability: &CapabilityDescriptor) -> Option<Self> {
        let range = capability.best_frame_rate()?;
        let fps = normalize_fps(range.max);
        let pixel_format = capability.pixel_format.canonical_label();
        let display_label = format!(
            "{} x {}  {}  {:.2} fps",
            capability.width, capability.height, pixel_format, fps
        );
        Some(Self {
            width: capability.width,
            height: capability.height,
            fps,
            pixel_format,
            display_label,
            capability: capability.clone(),
        })
    }

    /// The originating device capability, for later application.
    pub fn capability(&self) -> &CapabilityDescriptor {
        &self.capability
    }

    pub fn capability_id(&self) -> CapabilityId {
        self.capability.id
    }
}

/// Ordered, immutable list of selectable modes for one device.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModeCatalog {
    modes: Vec<ModeDescriptor>,
}

impl ModeCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the catalog from a device's raw capability list.
    ///
    /// Keeps capabilities whose pixel encoding family is MJPEG or YUV 4:2:2
    /// and whose best frame-rate range tops out at [`MAX_MODE_FPS`] or below,
    /// then sorts best-first: width desc, height desc, fps desc, tag asc.
    pub fn enumerate(capabilities: &[CapabilityDescriptor]) -> Self {
        let mut modes: Vec<ModeDescriptor> = capabilities
            .iter()
            .filter(|cap| cap.pixel_format.is_supported_family())
            .filter(|cap| {
                cap.best_frame_rate()
                    .is_some_and(|range| range.max <= MAX_MODE_FPS)
            })
            .filter_map(ModeDescriptor::from_capability)
            .collect();
        modes.sort_by(compare_modes);
        Self { modes }
    }

    pub fn modes(&self) -> &[ModeDescriptor] {
        &self.modes
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ModeDescriptor> {
        self.modes.get(index)
    }

    /// Index of the catalog entry whose back-referenced capability is
    /// identity-equal to `current`. `None` when the device is operating in
    /// a capability that was filtered out of the catalog.
    pub fn find_active(&self, current: &CapabilityDescriptor) -> Option<usize> {
        self.find_by_id(current.id)
    }

    pub fn find_by_id(&self, id: CapabilityId) -> Option<usize> {
        self.modes.iter().position(|mode| mode.capability.id == id)
    }

    /// Selection index for a UI: the active mode when it is in the catalog,
    /// otherwise the best-ranked entry. The fallback is a selection hint
    /// only; it must not be used to force a mode change on the device.
    pub fn selection_index(&self, current: Option<&CapabilityDescriptor>) -> Option<usize> {
        if self.modes.is_empty() {
            return None;
        }
        current.and_then(|cap| self.find_active(cap)).or(Some(0))
    }
}

fn compare_modes(a: &ModeDescriptor, b: &ModeDescriptor) -> Ordering {
    b.width
        .cmp(&a.width)
        .then_with(|| b.height.cmp(&a.height))
        .then_with(|| b.fps.total_cmp(&a.fps))
        .then_with(|| a.pixel_format.cmp(&b.pixel_format))
}
