//! Capture backends.
//!
//! The UVC backend speaks to real hardware through nokhwa's native inputs
//! (AVFoundation, Media Foundation, V4L2). Synthetic devices for offline
//! testing live in [`crate::testing`].

pub mod uvc;

pub use uvc::{UvcDevice, UvcProvider};
