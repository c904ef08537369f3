// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera backed by still images
//!
//! Each image file shows up as one camera. Opening it replays the image at
//! the requested frame rate, which is enough to drive a full scan session
//! without hardware.

use super::frame_loop::{CaptureLoopController, FrameTarget, LoopAction, sleep_unless_stopped};
use super::types::{
    BackendError, BackendResult, CameraBackendType, CameraDevice, CameraFrame, PixelFormat,
    StreamId, StreamRequest,
};
use super::{CaptureDeviceProvider, CaptureStream};
use crate::constants::file_formats;
use crate::session::sink::FrameSink;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

const DEVICE_PREFIX: &str = "virtual:";

type OpenDevices = Arc<Mutex<HashSet<String>>>;

fn lock_open(open: &OpenDevices) -> std::sync::MutexGuard<'_, HashSet<String>> {
    open.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Provider exposing one camera per image file
pub struct VirtualCameraProvider {
    images: Vec<PathBuf>,
    open: OpenDevices,
}

impl VirtualCameraProvider {
    pub fn new(images: Vec<PathBuf>) -> Self {
        Self {
            images,
            open: Arc::default(),
        }
    }

    fn device_for(index: usize, path: &Path) -> CameraDevice {
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        CameraDevice::new(
            format!("Virtual camera ({})", label),
            format!("{}{}", DEVICE_PREFIX, index),
        )
        .with_location("external")
    }

    fn image_for(&self, device_id: &str) -> Option<&PathBuf> {
        let index: usize = device_id.strip_prefix(DEVICE_PREFIX)?.parse().ok()?;
        self.images.get(index)
    }

    /// Ids of devices with an open stream
    pub fn open_devices(&self) -> Vec<String> {
        lock_open(&self.open).iter().cloned().collect()
    }
}

#[async_trait]
impl CaptureDeviceProvider for VirtualCameraProvider {
    async fn list_devices(&self) -> BackendResult<Vec<CameraDevice>> {
        let devices: Vec<CameraDevice> = self
            .images
            .iter()
            .enumerate()
            .filter(|(_, path)| {
                let supported = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(file_formats::is_image_extension);
                if !supported {
                    warn!(path = %path.display(), "Skipping unsupported image file");
                }
                supported
            })
            .map(|(index, path)| Self::device_for(index, path))
            .collect();

        debug!(count = devices.len(), "Enumerated virtual cameras");
        Ok(devices)
    }

    async fn open_stream(&self, request: &StreamRequest) -> BackendResult<Box<dyn CaptureStream>> {
        let device_id = request.device.id().to_string();
        let path = self
            .image_for(&device_id)
            .cloned()
            .ok_or_else(|| BackendError::DeviceNotFound(device_id.clone()))?;

        if !lock_open(&self.open).insert(device_id.clone()) {
            return Err(BackendError::DeviceBusy(device_id));
        }

        let id = StreamId::next();
        let target = FrameTarget::default();
        let loop_target = target.clone();
        let halt = Arc::new(AtomicBool::new(false));
        let loop_halt = Arc::clone(&halt);
        let interval = request.framerate.frame_interval();

        let started = CaptureLoopController::start_with_init(
            &format!("virtual-{}", id),
            move || load_image_as_frame(&path),
            move |frame: &mut CameraFrame| {
                frame.sequence += 1;
                frame.captured_at = Instant::now();
                loop_target.deliver(id, frame.clone());
                if sleep_unless_stopped(&loop_halt, interval) {
                    LoopAction::Continue
                } else {
                    LoopAction::Stop
                }
            },
        )
        .await;

        let controller = match started {
            Ok(controller) => controller,
            Err(e) => {
                lock_open(&self.open).remove(&device_id);
                return Err(e);
            }
        };

        info!(%id, device = %device_id, "Virtual camera stream opened");

        Ok(Box::new(VirtualStream {
            id,
            device_id,
            target,
            controller: Some(controller),
            halt,
            open: Arc::clone(&self.open),
        }))
    }

    fn supports_release_probe(&self) -> bool {
        true
    }

    async fn is_released(&self, device_id: &str) -> bool {
        !lock_open(&self.open).contains(device_id)
    }

    fn backend_type(&self) -> CameraBackendType {
        CameraBackendType::Virtual
    }
}

struct VirtualStream {
    id: StreamId,
    device_id: String,
    target: FrameTarget,
    controller: Option<CaptureLoopController>,
    halt: Arc<AtomicBool>,
    open: OpenDevices,
}

impl CaptureStream for VirtualStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn attach(&mut self, sink: &FrameSink) -> BackendResult<()> {
        if self.controller.is_none() {
            return Err(BackendError::Other(format!("{} already stopped", self.id)));
        }
        sink.set_source(self.id)?;
        self.target.attach(sink.clone());
        Ok(())
    }

    fn detach(&mut self) -> BackendResult<()> {
        self.target.detach();
        Ok(())
    }

    fn stop_tracks(&mut self) -> BackendResult<()> {
        self.halt.store(true, Ordering::SeqCst);
        if let Some(mut controller) = self.controller.take() {
            controller.stop();
        }
        Ok(())
    }

    fn release(mut self: Box<Self>) -> BackendResult<()> {
        self.stop_tracks()
    }
}

impl Drop for VirtualStream {
    fn drop(&mut self) {
        let _ = self.stop_tracks();
        lock_open(&self.open).remove(&self.device_id);
        debug!(id = %self.id, device = %self.device_id, "Virtual camera released");
    }
}

/// Load an image file as an RGBA frame
pub fn load_image_as_frame(path: &Path) -> BackendResult<CameraFrame> {
    info!(path = %path.display(), "Loading image file");

    let img = image::open(path).map_err(|e| match e {
        image::ImageError::IoError(io) => BackendError::from_io(&io, &path.display().to_string()),
        other => BackendError::FormatNotSupported(format!(
            "Failed to load image '{}': {}",
            path.display(),
            other
        )),
    })?;

    let rgba = img.to_rgba8();
    let width = rgba.width();
    let height = rgba.height();

    info!(width, height, "Image loaded successfully");

    Ok(CameraFrame::packed(
        width,
        height,
        PixelFormat::RGBA,
        Arc::from(rgba.into_raw().into_boxed_slice()),
    ))
}
