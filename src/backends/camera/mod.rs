// SPDX-License-Identifier: MPL-2.0
// Camera backend with trait-based abstraction over capture providers

//! Camera backend abstraction
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │  ScanSessionController   │  ← Lifecycle, activation ids, teardown
//! └────────────┬─────────────┘
//!              │
//!              ▼
//! ┌──────────────────────────┐
//! │ CaptureDeviceProvider    │  ← Enumeration, stream opening
//! └────────────┬─────────────┘
//!              │ opens
//!              ▼
//! ┌──────────────────────────┐
//! │     CaptureStream        │  ← Owned by the session, released once
//! └──────────────────────────┘
//!       ┌──────┴──────┐
//!    ┌──────┐    ┌─────────┐
//!    │ V4L2 │    │ Virtual │
//!    └──────┘    └─────────┘
//! ```

pub mod frame_loop;
pub mod selection;
pub mod types;
pub mod v4l2;
pub mod virtual_camera;

pub use selection::select_device;
pub use types::*;
pub use v4l2::V4l2Provider;
pub use virtual_camera::VirtualCameraProvider;

use crate::config::Config;
use crate::session::sink::FrameSink;
use async_trait::async_trait;
use std::sync::Arc;

/// Source of capture devices and streams
///
/// Providers are shared between the controller and the tasks it spawns,
/// so all methods take `&self`.
#[async_trait]
pub trait CaptureDeviceProvider: Send + Sync {
    // ===== Enumeration =====

    /// Enumerate available cameras, in a stable order
    async fn list_devices(&self) -> BackendResult<Vec<CameraDevice>>;

    // ===== Streams =====

    /// Open a capture stream for `request.device`
    ///
    /// # Returns
    /// * `Ok(stream)` - Stream is capturing but not attached to any sink
    /// * `Err(BackendError::PermissionDenied)` - Access refused
    /// * `Err(BackendError::DeviceNotFound | DeviceBusy)` - Device unusable
    async fn open_stream(&self, request: &StreamRequest) -> BackendResult<Box<dyn CaptureStream>>;

    // ===== Release =====

    /// Whether [`CaptureDeviceProvider::is_released`] reports real state
    fn supports_release_probe(&self) -> bool {
        false
    }

    /// Whether the device has no open stream left and may be re-opened
    async fn is_released(&self, _device_id: &str) -> bool {
        true
    }

    fn backend_type(&self) -> CameraBackendType;
}

/// One open capture stream
///
/// The stream keeps capturing until [`CaptureStream::stop_tracks`] or
/// [`CaptureStream::release`]. Frames only reach a sink between
/// [`CaptureStream::attach`] and [`CaptureStream::detach`].
pub trait CaptureStream: Send {
    fn id(&self) -> StreamId;

    /// Id of the device this stream was opened on
    fn device_id(&self) -> &str;

    /// Make this stream the sink's source
    fn attach(&mut self, sink: &FrameSink) -> BackendResult<()>;

    /// Stop publishing to the sink. Idempotent.
    fn detach(&mut self) -> BackendResult<()>;

    /// Stop capturing. The capture thread has exited when this returns.
    /// Idempotent.
    fn stop_tracks(&mut self) -> BackendResult<()>;

    /// Give the device back
    fn release(self: Box<Self>) -> BackendResult<()>;
}

/// Build the provider configured for this run
pub fn provider_for(config: &Config) -> Arc<dyn CaptureDeviceProvider> {
    match config.backend {
        CameraBackendType::V4l2 => Arc::new(V4l2Provider::new()),
        CameraBackendType::Virtual => {
            Arc::new(VirtualCameraProvider::new(config.virtual_images.clone()))
        }
    }
}
