// SPDX-License-Identifier: GPL-3.0-only

//! Persistent scanner settings
//!
//! Stored as JSON in `<config dir>/camera-scanner/config.json`. A missing
//! file yields defaults; an unreadable one is logged and ignored.

use crate::backends::camera::types::{CameraBackendType, FacingMode};
use crate::constants::{DEFAULT_MAX_DECODE_DIMENSION, timing};
use crate::errors::AppResult;
use crate::frame_processor::{Symbology, SymbologyFilter};
use crate::session::SettlePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const APP_DIR: &str = "camera-scanner";
const FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera backend to use (V4L2 or still images)
    pub backend: CameraBackendType,
    /// Last camera that produced a successful scan
    pub last_camera_path: Option<String>,
    /// Preferred camera direction when no camera is named
    pub facing: FacingMode,
    /// Accepted code formats; empty means the conservative default set
    pub symbologies: Vec<Symbology>,
    /// Decode at full resolution
    pub thorough: bool,
    pub settle_delay_ms: u64,
    pub release_poll_interval_ms: u64,
    pub release_timeout_ms: u64,
    pub decode_interval_ms: u64,
    /// Frames are downscaled to this before decoding unless thorough
    pub max_decode_dimension: u32,
    /// Images served by the virtual camera backend
    pub virtual_images: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: CameraBackendType::default(),
            last_camera_path: None,
            facing: FacingMode::default(),
            symbologies: Vec::new(),
            thorough: false,
            settle_delay_ms: timing::SETTLE_DELAY.as_millis() as u64,
            release_poll_interval_ms: timing::RELEASE_POLL_INTERVAL.as_millis() as u64,
            release_timeout_ms: timing::RELEASE_TIMEOUT.as_millis() as u64,
            decode_interval_ms: timing::DECODE_INTERVAL.as_millis() as u64,
            max_decode_dimension: DEFAULT_MAX_DECODE_DIMENSION,
            virtual_images: Vec::new(),
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(FILE_NAME))
    }

    /// Load from the default location
    pub fn load() -> Self {
        match Self::path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config directory available, using defaults");
                Self::default()
            }
        }
    }

    /// Load from `path`, falling back to defaults if it is missing or corrupt
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(config) => {
                debug!(path = %path.display(), "Config loaded");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt config, using defaults");
                Self::default()
            }
        }
    }

    /// Save to the default location
    pub fn save(&self) -> AppResult<()> {
        let path = Self::path().ok_or("No config directory available")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    pub fn symbology_filter(&self) -> SymbologyFilter {
        SymbologyFilter::only(self.symbologies.iter().copied())
    }

    pub fn settle_policy(&self) -> SettlePolicy {
        SettlePolicy {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            poll_interval: Duration::from_millis(self.release_poll_interval_ms.max(1)),
            release_timeout: Duration::from_millis(self.release_timeout_ms),
        }
    }

    pub fn decode_interval(&self) -> Duration {
        Duration::from_millis(self.decode_interval_ms)
    }
}
