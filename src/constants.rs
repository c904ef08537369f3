// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use crate::frame_processor::{Symbology, SymbologyFilter};
use serde::{Deserialize, Serialize};

/// Session timing defaults
pub mod timing {
    use std::time::Duration;

    /// Wait between releasing a camera and re-opening another one when the
    /// backend cannot confirm the release. Some backends report a device as
    /// busy if it is re-requested right after being closed.
    pub const SETTLE_DELAY: Duration = Duration::from_millis(250);

    /// Poll interval for backends that can confirm a device was released
    pub const RELEASE_POLL_INTERVAL: Duration = Duration::from_millis(25);

    /// Upper bound on release polling before acquiring anyway
    pub const RELEASE_TIMEOUT: Duration = Duration::from_millis(1500);

    /// How often the decoder looks at the sink for a new frame
    pub const DECODE_INTERVAL: Duration = Duration::from_millis(40);
}

/// Frames are downscaled to this size before QR detection unless the
/// decoder runs in thorough mode
pub const DEFAULT_MAX_DECODE_DIMENSION: u32 = 640;

/// Label fragments used to guess where a camera points
///
/// Matched as substrings of the lowercased label, so only words that do not
/// occur inside common UVC product names belong here ("user" and "face"
/// would hit "USB Video Interface" style labels).
pub mod camera_labels {
    /// Labels that suggest a rear / environment-facing camera
    pub const REAR_KEYWORDS: [&str; 3] = ["back", "rear", "environment"];

    /// Labels that suggest a front camera
    pub const FRONT_KEYWORDS: [&str; 1] = ["front"];
}

/// Still image formats the virtual camera accepts
pub mod file_formats {
    pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "gif", "webp"];

    pub fn is_image_extension(ext: &str) -> bool {
        IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
    }
}

/// Resolution and frame rate requested from the camera
///
/// Linear (1D) barcodes need horizontal resolution to resolve thin bars;
/// dense 2D symbols need detail more than speed; QR alone is happy at VGA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureProfile {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

impl CaptureProfile {
    pub const VGA: CaptureProfile = CaptureProfile {
        width: 640,
        height: 480,
        framerate: 30,
    };

    pub const HD: CaptureProfile = CaptureProfile {
        width: 1280,
        height: 720,
        framerate: 30,
    };

    pub const FULL_HD: CaptureProfile = CaptureProfile {
        width: 1920,
        height: 1080,
        framerate: 15,
    };

    /// Pick the capture profile for a set of allowed symbologies
    pub fn for_symbologies(filter: &SymbologyFilter) -> Self {
        let symbologies: Vec<Symbology> = filter.iter().collect();

        if symbologies.iter().any(|s| s.is_dense_2d()) {
            Self::FULL_HD
        } else if symbologies.iter().any(|s| s.is_linear()) {
            Self::HD
        } else {
            Self::VGA
        }
    }
}

impl std::fmt::Display for CaptureProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} @ {}fps", self.width, self.height, self.framerate)
    }
}
