//! Configuration management for ScopeCam.
//!
//! Operational knobs only: queue sizing, worker timing, and still-image
//! encoding. Catalog filter thresholds are part of the domain contract and
//! are deliberately not configurable.

use crate::errors::CaptureError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopecamConfig {
    pub session: SessionConfig,
    pub still: StillConfig,
}

/// Session controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum preview frames queued for the consumer before new frames are
    /// dropped at the source.
    pub frame_queue_capacity: usize,
    /// How long detach waits for the frame worker to exit.
    pub worker_join_timeout_ms: u64,
    /// Worker sleep while frame delivery is paused for a reconfigure.
    pub pause_poll_ms: u64,
}

/// Still-image capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StillConfig {
    /// JPEG quality (1-100) for stills encoded by the backend.
    pub jpeg_quality: u8,
}

impl Default for ScopecamConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            still: StillConfig { jpeg_quality: 95 },
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_queue_capacity: 2,
            worker_join_timeout_ms: 1000,
            pause_poll_ms: 2,
        }
    }
}

impl ScopecamConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            CaptureError::DeviceUnavailable(format!("Failed to read config file: {}", e))
        })?;

        let config: ScopecamConfig = toml::from_str(&contents).map_err(|e| {
            CaptureError::DeviceUnavailable(format!("Failed to parse config file: {}", e))
        })?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CaptureError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CaptureError::DeviceUnavailable(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            CaptureError::DeviceUnavailable(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string).map_err(|e| {
            CaptureError::DeviceUnavailable(format!("Failed to write config file: {}", e))
        })?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        PathBuf::from("scopecam.toml")
    }

    /// Load from the default location, or fall back to defaults.
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.session.frame_queue_capacity == 0 {
            return Err("Frame queue capacity must be at least 1".to_string());
        }
        if self.session.frame_queue_capacity > 64 {
            return Err("Frame queue capacity must be 64 or less".to_string());
        }
        if self.session.worker_join_timeout_ms == 0 {
            return Err("Worker join timeout must be non-zero".to_string());
        }
        if self.still.jpeg_quality == 0 || self.still.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }
        Ok(())
    }
}
