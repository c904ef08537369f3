// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for camera backends

use crate::constants::camera_labels::{FRONT_KEYWORDS, REAR_KEYWORDS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Camera backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackendType {
    /// Video4Linux2 capture devices
    #[default]
    V4l2,
    /// Still images replayed as a camera
    Virtual,
}

impl std::fmt::Display for CameraBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraBackendType::V4l2 => write!(f, "V4L2"),
            CameraBackendType::Virtual => write!(f, "virtual"),
        }
    }
}

/// Device information from V4L2 capability
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Name of the device (V4L2 card)
    pub card: String,
    /// Driver name (V4L2 driver)
    pub driver: String,
    /// Device path (e.g., /dev/video0)
    pub path: String,
    /// Real device path (resolved symlinks)
    pub real_path: String,
}

/// Which way a camera points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Rear / world-facing camera, the usual choice for scanning
    #[default]
    Environment,
    /// Front / user-facing camera
    User,
}

impl std::fmt::Display for FacingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FacingMode::Environment => write!(f, "environment"),
            FacingMode::User => write!(f, "user"),
        }
    }
}

impl std::str::FromStr for FacingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "environment" | "back" | "rear" => Ok(FacingMode::Environment),
            "user" | "front" => Ok(FacingMode::User),
            other => Err(format!("Unknown facing mode: {}", other)),
        }
    }
}

/// Represents a camera device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    pub name: String,
    pub path: String,                    // Stable device id (e.g. /dev/video0, virtual:0)
    pub device_info: Option<DeviceInfo>, // V4L2 device information (card, driver, path, real_path)
    pub camera_location: Option<String>, // Camera location: "front", "back", or "external"
}

impl CameraDevice {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            device_info: None,
            camera_location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.camera_location = Some(location.into());
        self
    }

    /// Identifier used to request this device again
    pub fn id(&self) -> &str {
        &self.path
    }

    /// Best-effort guess at which way the camera points
    ///
    /// Uses the reported location when there is one, otherwise looks for
    /// hints in the label. Many webcams report neither.
    pub fn facing_hint(&self) -> Option<FacingMode> {
        if let Some(location) = self.camera_location.as_deref() {
            match location {
                "back" => return Some(FacingMode::Environment),
                "front" => return Some(FacingMode::User),
                _ => {}
            }
        }

        let label = self.name.to_lowercase();
        if REAR_KEYWORDS.iter().any(|k| label.contains(k)) {
            Some(FacingMode::Environment)
        } else if FRONT_KEYWORDS.iter().any(|k| label.contains(k)) {
            Some(FacingMode::User)
        } else {
            None
        }
    }
}

/// Framerate as a fraction (numerator/denominator)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

impl Framerate {
    /// Create a new framerate from numerator and denominator
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num,
            denom: if denom == 0 { 1 } else { denom },
        }
    }

    /// Create a framerate from an integer (e.g., 30 becomes 30/1)
    pub fn from_int(fps: u32) -> Self {
        Self { num: fps, denom: 1 }
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }

    /// Time between two frames
    pub fn frame_interval(&self) -> std::time::Duration {
        if self.num == 0 {
            return std::time::Duration::from_millis(100);
        }
        std::time::Duration::from_secs_f64(self.denom as f64 / self.num as f64)
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.denom != 1 {
            write!(f, "{:.2}", self.as_f64())
        } else {
            write!(f, "{}", self.num)
        }
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self { num: 30, denom: 1 }
    }
}

/// How the session picks a camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// A specific device id as reported by enumeration
    Device(String),
    /// Any camera pointing this way, falling back to the first one
    Facing(FacingMode),
}

impl Default for DeviceSelector {
    fn default() -> Self {
        DeviceSelector::Facing(FacingMode::Environment)
    }
}

impl DeviceSelector {
    pub fn facing(&self) -> FacingMode {
        match self {
            DeviceSelector::Facing(facing) => *facing,
            DeviceSelector::Device(_) => FacingMode::Environment,
        }
    }
}

/// Everything a provider needs to open one capture stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub device: CameraDevice,
    pub width: u32,
    pub height: u32,
    pub framerate: Framerate,
    pub facing: FacingMode,
}

impl std::fmt::Display for StreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}x{} @ {}fps",
            self.device.path, self.width, self.height, self.framerate
        )
    }
}

/// Process-unique identity of an opened capture stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        StreamId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Pixel layout of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// RGBA - 32-bit with alpha (4 bytes per pixel)
    RGBA,
    /// Gray8 - 8-bit grayscale (single channel)
    Gray8,
    /// YUYV - Packed 4:2:2 (Y0 U Y1 V interleaved)
    YUYV,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::RGBA => 4,
            PixelFormat::Gray8 => 1,
            PixelFormat::YUYV => 2,
        }
    }
}

/// A single frame from the camera
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
    pub format: PixelFormat,
    /// Row stride in bytes (may include padding)
    pub stride: u32,
    /// Frame counter within the producing stream
    pub sequence: u64,
    /// Timestamp when frame was captured (for latency diagnostics)
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Build a tightly packed frame (stride = width * bytes per pixel)
    pub fn packed(width: u32, height: u32, format: PixelFormat, data: Arc<[u8]>) -> Self {
        Self {
            width,
            height,
            stride: width * format.bytes_per_pixel(),
            data,
            format,
            sequence: 0,
            captured_at: Instant::now(),
        }
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Backend is not available on this system
    NotAvailable(String),
    /// Access to the device was refused
    PermissionDenied(String),
    /// Camera device not found
    DeviceNotFound(String),
    /// Device exists but is held by someone else
    DeviceBusy(String),
    /// Format not supported
    FormatNotSupported(String),
    /// The sink a stream was attached to is gone
    SinkDetached,
    /// General I/O error
    IoError(String),
    /// Other errors
    Other(String),
}

impl BackendError {
    /// Classify an I/O error raised while touching `path`
    pub fn from_io(err: &std::io::Error, path: &str) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            return BackendError::PermissionDenied(format!("{}: {}", path, err));
        }

        match err.raw_os_error() {
            Some(libc::EACCES) | Some(libc::EPERM) => {
                BackendError::PermissionDenied(format!("{}: {}", path, err))
            }
            Some(libc::EBUSY) => BackendError::DeviceBusy(path.to_string()),
            Some(libc::ENOENT) | Some(libc::ENODEV) | Some(libc::ENXIO) => {
                BackendError::DeviceNotFound(path.to_string())
            }
            _ => BackendError::IoError(format!("{}: {}", path, err)),
        }
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::DeviceBusy(msg) => write!(f, "Device busy: {}", msg),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::SinkDetached => write!(f, "Sink detached"),
            BackendError::IoError(msg) => write!(f, "I/O error: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::IoError(err.to_string())
    }
}
