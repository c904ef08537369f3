// SPDX-License-Identifier: MPL-2.0

//! Error types for the scanner
//!
//! [`ScanError`] is what a session host sees. Only permission and device
//! failures ever reach the host; sink detachment and per-frame decode noise
//! exist so the controller can name them, then swallow them.

use crate::backends::camera::types::BackendError;
use crate::frame_processor::DecoderError;
use serde::Serialize;
use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Failure of a scan session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum ScanError {
    /// The user declined camera access. Terminal until the host retries.
    PermissionDenied(String),
    /// No camera, or the selected camera is gone or busy.
    DeviceUnavailable(String),
    /// The host surface went away while acquiring. Treated as cancellation.
    SinkDetached,
    /// A single frame failed to decode.
    TransientDecodeNoise,
}

/// Discriminant of [`ScanError`] without the detail message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScanErrorKind {
    PermissionDenied,
    DeviceUnavailable,
    SinkDetached,
    TransientDecodeNoise,
}

impl ScanError {
    pub fn kind(&self) -> ScanErrorKind {
        match self {
            ScanError::PermissionDenied(_) => ScanErrorKind::PermissionDenied,
            ScanError::DeviceUnavailable(_) => ScanErrorKind::DeviceUnavailable,
            ScanError::SinkDetached => ScanErrorKind::SinkDetached,
            ScanError::TransientDecodeNoise => ScanErrorKind::TransientDecodeNoise,
        }
    }

    /// Whether the host should render this error and offer a retry
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            ScanError::PermissionDenied(_) | ScanError::DeviceUnavailable(_)
        )
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::PermissionDenied(msg) => write!(f, "Camera permission denied: {}", msg),
            ScanError::DeviceUnavailable(msg) => write!(f, "Camera unavailable: {}", msg),
            ScanError::SinkDetached => write!(f, "Preview surface detached"),
            ScanError::TransientDecodeNoise => write!(f, "Frame could not be decoded"),
        }
    }
}

impl std::error::Error for ScanError {}

impl From<BackendError> for ScanError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::PermissionDenied(msg) => ScanError::PermissionDenied(msg),
            BackendError::SinkDetached => ScanError::SinkDetached,
            other => ScanError::DeviceUnavailable(other.to_string()),
        }
    }
}

impl From<DecoderError> for ScanError {
    fn from(err: DecoderError) -> Self {
        match err {
            DecoderError::SinkUnattached => ScanError::SinkDetached,
            DecoderError::Failed(msg) => ScanError::DeviceUnavailable(msg),
        }
    }
}

/// Top-level error for the command line front end
#[derive(Debug)]
pub enum AppError {
    /// Scan session failed
    Scan(ScanError),
    /// Camera backend failed outside a session (e.g. listing)
    Backend(BackendError),
    /// Configuration could not be read or written
    Config(String),
    /// I/O errors
    Io(std::io::Error),
    /// Generic error with message
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Scan(e) => write!(f, "Scan error: {}", e),
            AppError::Backend(e) => write!(f, "Camera error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Io(e) => write!(f, "I/O error: {}", e),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Scan(e) => Some(e),
            AppError::Backend(e) => Some(e),
            AppError::Io(e) => Some(e),
            AppError::Config(_) | AppError::Other(_) => None,
        }
    }
}

impl From<ScanError> for AppError {
    fn from(err: ScanError) -> Self {
        AppError::Scan(err)
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        AppError::Backend(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}
