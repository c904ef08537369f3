// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 capture provider
//!
//! Enumerates `/dev/video*` capture nodes and streams frames from them with
//! memory-mapped buffers. YUYV and GREY are passed through as-is; MJPEG is
//! decoded to greyscale since the decoders only look at luma.

use super::frame_loop::{CaptureLoopController, FrameTarget, LoopAction};
use super::types::{
    BackendError, BackendResult, CameraBackendType, CameraDevice, CameraFrame, DeviceInfo,
    PixelFormat, StreamId, StreamRequest,
};
use super::{CaptureDeviceProvider, CaptureStream};
use crate::session::sink::FrameSink;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as _;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::video::capture::Parameters;
use v4l::{Format, FourCC};

/// How long a single dequeue may block before the loop checks its stop flag
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

/// Consecutive capture errors before the loop gives up on the device
const MAX_CONSECUTIVE_ERRORS: u32 = 30;

/// Formats the capture loop can turn into frames, in order of preference
const PREFERRED_FOURCCS: [&[u8; 4]; 3] = [b"YUYV", b"MJPG", b"GREY"];

/// Provider for Video4Linux2 capture devices
#[derive(Debug, Default)]
pub struct V4l2Provider;

impl V4l2Provider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CaptureDeviceProvider for V4l2Provider {
    async fn list_devices(&self) -> BackendResult<Vec<CameraDevice>> {
        tokio::task::spawn_blocking(enumerate_devices)
            .await
            .map_err(|e| BackendError::Other(format!("enumeration task failed: {}", e)))?
    }

    async fn open_stream(&self, request: &StreamRequest) -> BackendResult<Box<dyn CaptureStream>> {
        let id = StreamId::next();
        let device_id = request.device.id().to_string();
        let target = FrameTarget::default();
        let loop_target = target.clone();
        let init_request = request.clone();

        info!(%id, request = %request, "Opening V4L2 stream");

        let controller = CaptureLoopController::start_with_init(
            &format!("v4l2-{}", id),
            move || V4l2Capture::open(&init_request),
            move |capture: &mut V4l2Capture| capture.step(id, &loop_target),
        )
        .await?;

        Ok(Box::new(V4l2Stream {
            id,
            device_id,
            target,
            controller: Some(controller),
        }))
    }

    fn backend_type(&self) -> CameraBackendType {
        CameraBackendType::V4l2
    }
}

/// List video capture nodes, sorted by index
///
/// Nodes that cannot be opened are skipped. If every node was refused for
/// lack of permission the whole enumeration fails with
/// [`BackendError::PermissionDenied`].
fn enumerate_devices() -> BackendResult<Vec<CameraDevice>> {
    let mut nodes = v4l::context::enum_devices();
    nodes.sort_by_key(|node| node.index());

    let mut cameras = Vec::new();
    let mut denied = Vec::new();

    for node in nodes {
        let path = node.path().to_string_lossy().into_owned();

        let dev = match Device::with_path(node.path()) {
            Ok(dev) => dev,
            Err(e) => {
                match BackendError::from_io(&e, &path) {
                    BackendError::PermissionDenied(msg) => denied.push(msg),
                    other => debug!(path = %path, error = %other, "Skipping unopenable node"),
                }
                continue;
            }
        };

        let caps = match dev.query_caps() {
            Ok(caps) => caps,
            Err(e) => {
                debug!(path = %path, error = %e, "Failed to query capabilities");
                continue;
            }
        };

        // Metadata nodes share the card name but cannot capture
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            trace!(path = %path, "Not a capture node");
            continue;
        }

        let real_path = std::fs::canonicalize(node.path())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| path.clone());

        debug!(path = %path, card = %caps.card, driver = %caps.driver, "Found V4L2 camera");

        cameras.push(CameraDevice {
            name: caps.card.clone(),
            path: path.clone(),
            device_info: Some(DeviceInfo {
                card: caps.card,
                driver: caps.driver,
                path,
                real_path,
            }),
            camera_location: None,
        });
    }

    if cameras.is_empty() && !denied.is_empty() {
        return Err(BackendError::PermissionDenied(denied.join("; ")));
    }

    info!(count = cameras.len(), "Enumerated V4L2 cameras");
    Ok(cameras)
}

/// Device and buffer state owned by the capture thread
struct V4l2Capture {
    path: String,
    stream: Stream<'static>,
    width: u32,
    height: u32,
    stride: u32,
    fourcc: FourCC,
    sequence: u64,
    consecutive_errors: u32,
}

impl V4l2Capture {
    fn open(request: &StreamRequest) -> BackendResult<Self> {
        let path = request.device.id().to_string();
        let dev = Device::with_path(&path).map_err(|e| BackendError::from_io(&e, &path))?;

        let mut negotiated = None;
        for fourcc in PREFERRED_FOURCCS.map(FourCC::new) {
            let wanted = Format::new(request.width, request.height, fourcc);
            match dev.set_format(&wanted) {
                Ok(actual) if actual.fourcc == fourcc => {
                    negotiated = Some(actual);
                    break;
                }
                Ok(actual) => {
                    debug!(path = %path, wanted = %fourcc, got = %actual.fourcc, "Format not accepted");
                }
                Err(e) => return Err(BackendError::from_io(&e, &path)),
            }
        }

        let format = negotiated.ok_or_else(|| {
            BackendError::FormatNotSupported(format!("{}: no YUYV, MJPG or GREY mode", path))
        })?;

        if let Err(e) = dev.set_params(&Parameters::with_fps(request.framerate.num)) {
            warn!(path = %path, error = %e, "Could not set frame rate, using device default");
        }

        let mut stream = Stream::with_buffers(&dev, Type::VideoCapture, 4)
            .map_err(|e| BackendError::from_io(&e, &path))?;
        stream.set_timeout(DEQUEUE_TIMEOUT);

        info!(
            path = %path,
            width = format.width,
            height = format.height,
            fourcc = %format.fourcc,
            "V4L2 format configured"
        );

        Ok(Self {
            path,
            stream,
            width: format.width,
            height: format.height,
            stride: format.stride,
            fourcc: format.fourcc,
            sequence: 0,
            consecutive_errors: 0,
        })
    }

    /// Capture one frame and hand it to the sink
    fn step(&mut self, id: StreamId, target: &FrameTarget) -> LoopAction {
        let (buf, meta) = match self.stream.next() {
            Ok(frame) => frame,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return LoopAction::Continue,
            Err(e) => {
                self.consecutive_errors += 1;
                warn!(path = %self.path, error = %e, "Failed to capture frame");
                if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    warn!(path = %self.path, "Too many capture errors, stopping stream");
                    return LoopAction::Stop;
                }
                return LoopAction::Continue;
            }
        };
        self.consecutive_errors = 0;

        let used = (meta.bytesused as usize).min(buf.len());
        let data = if used > 0 { &buf[..used] } else { buf };

        let frame = if self.fourcc == FourCC::new(b"MJPG") {
            match image::load_from_memory(data) {
                Ok(img) => {
                    let luma = img.to_luma8();
                    CameraFrame::packed(
                        luma.width(),
                        luma.height(),
                        PixelFormat::Gray8,
                        Arc::from(luma.into_raw().into_boxed_slice()),
                    )
                }
                Err(e) => {
                    trace!(path = %self.path, error = %e, "Dropping undecodable MJPEG frame");
                    return LoopAction::Continue;
                }
            }
        } else {
            let format = if self.fourcc == FourCC::new(b"GREY") {
                PixelFormat::Gray8
            } else {
                PixelFormat::YUYV
            };
            let stride = if self.stride > 0 {
                self.stride
            } else {
                self.width * format.bytes_per_pixel()
            };
            CameraFrame {
                width: self.width,
                height: self.height,
                data: Arc::from(data),
                format,
                stride,
                sequence: 0,
                captured_at: Instant::now(),
            }
        };

        self.sequence += 1;
        target.deliver(
            id,
            CameraFrame {
                sequence: self.sequence,
                ..frame
            },
        );
        LoopAction::Continue
    }
}

struct V4l2Stream {
    id: StreamId,
    device_id: String,
    target: FrameTarget,
    controller: Option<CaptureLoopController>,
}

impl CaptureStream for V4l2Stream {
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
        if let Some(mut controller) = self.controller.take() {
            // Buffers are unmapped and the fd closed when the loop state drops
            controller.stop();
            debug!(id = %self.id, device = %self.device_id, "V4L2 capture stopped");
        }
        Ok(())
    }

    fn release(mut self: Box<Self>) -> BackendResult<()> {
        self.stop_tracks()
    }
}
