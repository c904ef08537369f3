// SPDX-License-Identifier: GPL-3.0-only

//! QR code detection task
//!
//! This module implements QR code detection using the rqrr crate.
//! It converts camera frames to grayscale and searches for QR codes,
//! returning their positions and decoded content.

use crate::backends::camera::frame_loop::{CaptureLoopController, LoopAction, sleep_unless_stopped};
use crate::backends::camera::types::{CameraFrame, PixelFormat};
use crate::constants::{DEFAULT_MAX_DECODE_DIMENSION, timing};
use crate::frame_processor::decoder::{DecodeHandle, DecoderError, FrameCallback, FrameDecoder};
use crate::frame_processor::types::{
    DecodeOptions, Decoded, FrameOutcome, FrameRegion, Symbology, SymbologyFilter,
};
use crate::session::sink::FrameSink;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// QR code detector
///
/// Analyzes camera frames to detect and decode QR codes.
/// Optimized for real-time processing with frame downscaling.
#[derive(Debug, Clone, Copy)]
pub struct QrDetector {
    /// Maximum dimension for processing (frames are downscaled to this)
    max_dimension: u32,
}

impl Default for QrDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl QrDetector {
    /// Create a new QR detector with default settings
    pub fn new() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DECODE_DIMENSION,
        }
    }

    /// Create a QR detector with custom max dimension
    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
        }
    }

    /// Detect QR codes in a camera frame
    ///
    /// The frame is converted to grayscale and, unless `thorough` is set,
    /// downscaled to the detector's max dimension first.
    pub fn detect(&self, frame: &CameraFrame, thorough: bool) -> Vec<Decoded> {
        let start = std::time::Instant::now();

        let grey = to_greyscale(frame);
        let (image, scale) = if !thorough
            && (grey.width > self.max_dimension || grey.height > self.max_dimension)
        {
            let scale = (grey.width as f32 / self.max_dimension as f32)
                .max(grey.height as f32 / self.max_dimension as f32);
            let new_width = ((grey.width as f32 / scale) as u32).max(1);
            let new_height = ((grey.height as f32 / scale) as u32).max(1);
            (downscale_grey(&grey, new_width, new_height), scale)
        } else {
            (grey, 1.0)
        };

        trace!(
            proc_width = image.width,
            proc_height = image.height,
            scale,
            conversion_ms = start.elapsed().as_millis(),
            "Prepared greyscale image for processing"
        );

        let width = image.width as usize;
        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width, image.height as usize, |x, y| {
                image.data[y * width + x]
            });
        let grids = prepared.detect_grids();

        let mut detections = Vec::with_capacity(grids.len());
        for grid in grids {
            let content = match grid.decode() {
                Ok((_meta, content)) => content,
                Err(e) => {
                    debug!(error = ?e, "Failed to decode QR code");
                    continue;
                }
            };

            let xs = grid.bounds.iter().map(|p| p.x.max(0) as f32);
            let ys = grid.bounds.iter().map(|p| p.y.max(0) as f32);
            let min_x = xs.clone().fold(f32::MAX, f32::min);
            let max_x = xs.fold(0.0, f32::max);
            let min_y = ys.clone().fold(f32::MAX, f32::min);
            let max_y = ys.fold(0.0, f32::max);

            // Scale back to original frame coordinates
            let region = FrameRegion::from_pixels(
                (min_x * scale) as u32,
                (min_y * scale) as u32,
                ((max_x - min_x) * scale) as u32,
                ((max_y - min_y) * scale) as u32,
                frame.width,
                frame.height,
            );

            debug!(
                content = %content,
                x = region.x,
                y = region.y,
                "Detected QR code"
            );

            detections.push(Decoded {
                text: content,
                symbology: Symbology::QrCode,
                bounds: Some(region),
            });
        }

        if !detections.is_empty() {
            debug!(
                count = detections.len(),
                total_ms = start.elapsed().as_millis(),
                "QR detection found codes"
            );
        }

        detections
    }

    /// Inspect one frame and report the first code found
    pub fn inspect(&self, frame: &CameraFrame, thorough: bool) -> FrameOutcome {
        match self.detect(frame, thorough).into_iter().next() {
            Some(decoded) => FrameOutcome::Decoded(decoded),
            None => FrameOutcome::NotFound,
        }
    }
}

/// [`FrameDecoder`] that runs [`QrDetector`] over the sink on its own thread
pub struct QrDecoder {
    detector: QrDetector,
    symbologies: SymbologyFilter,
    options: DecodeOptions,
    interval: Duration,
}

impl Default for QrDecoder {
    fn default() -> Self {
        Self::new(QrDetector::new(), timing::DECODE_INTERVAL)
    }
}

impl QrDecoder {
    pub fn new(detector: QrDetector, interval: Duration) -> Self {
        Self {
            detector,
            symbologies: SymbologyFilter::default(),
            options: DecodeOptions::default(),
            interval,
        }
    }
}

impl FrameDecoder for QrDecoder {
    fn configure(&mut self, symbologies: &SymbologyFilter, options: DecodeOptions) {
        if !symbologies.allows(Symbology::QrCode) {
            warn!(%symbologies, "QR decoder configured without QR_CODE; no codes will be reported");
        }
        self.symbologies = symbologies.clone();
        self.options = options;
    }

    fn start(
        &self,
        sink: &FrameSink,
        mut on_frame: FrameCallback,
    ) -> Result<Box<dyn DecodeHandle>, DecoderError> {
        if sink.source().is_none() {
            return Err(DecoderError::SinkUnattached);
        }

        let detector = self.detector;
        let thorough = self.options.thorough;
        let wants_qr = self.symbologies.allows(Symbology::QrCode);
        let interval = self.interval;
        let halt = Arc::new(AtomicBool::new(false));
        let loop_halt = Arc::clone(&halt);
        let mut frames = sink.subscribe();

        let controller = CaptureLoopController::start("qr-decoder", move || {
            if !sleep_unless_stopped(&loop_halt, interval) {
                return LoopAction::Stop;
            }

            match frames.has_changed() {
                Ok(true) => {}
                Ok(false) => return LoopAction::Continue,
                Err(_) => return LoopAction::Stop,
            }

            let latest = frames.borrow_and_update().clone();
            let Some(latest) = latest else {
                return LoopAction::Continue;
            };

            let outcome = if wants_qr {
                detector.inspect(&latest.frame, thorough)
            } else {
                FrameOutcome::NotFound
            };
            on_frame(outcome);
            LoopAction::Continue
        });

        Ok(Box::new(QrDecodeHandle { controller, halt }))
    }
}

struct QrDecodeHandle {
    controller: CaptureLoopController,
    halt: Arc<AtomicBool>,
}

impl DecodeHandle for QrDecodeHandle {
    fn stop(&mut self) {
        self.halt.store(true, Ordering::SeqCst);
        self.controller.stop();
    }

    fn is_stopped(&self) -> bool {
        !self.controller.is_running()
    }
}

/// Tightly packed 8-bit luma image
#[derive(Debug, Clone, PartialEq, Eq)]
struct GreyImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

/// Extract luma from a frame, dropping stride padding
fn to_greyscale(frame: &CameraFrame) -> GreyImage {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let stride = frame.stride as usize;
    let bpp = frame.format.bytes_per_pixel() as usize;

    let mut data = Vec::with_capacity(width * height);

    for y in 0..height {
        let row_start = y * stride;
        let row_end = row_start + width * bpp;
        let Some(row) = frame.data.get(row_start..row_end) else {
            // Truncated buffer; pad with black so dimensions stay valid
            data.resize((y + 1) * width, 0);
            continue;
        };

        match frame.format {
            PixelFormat::Gray8 => data.extend_from_slice(row),
            // Y0 U Y1 V: luma sits on every even byte
            PixelFormat::YUYV => data.extend(row.iter().step_by(2).copied()),
            PixelFormat::RGBA => data.extend(row.chunks_exact(4).map(|px| {
                ((px[0] as u32 * 77 + px[1] as u32 * 150 + px[2] as u32 * 29) >> 8) as u8
            })),
        }
    }

    GreyImage {
        width: frame.width,
        height: frame.height,
        data,
    }
}

/// Downscale a greyscale image using bilinear interpolation
fn downscale_grey(src: &GreyImage, dst_width: u32, dst_height: u32) -> GreyImage {
    let src_width = src.width as usize;
    let src_height = src.height as usize;

    let mut data = Vec::with_capacity((dst_width * dst_height) as usize);

    let x_ratio = src_width as f32 / dst_width as f32;
    let y_ratio = src_height as f32 / dst_height as f32;

    let pixel = |px: usize, py: usize| -> f32 {
        src.data.get(py * src_width + px).copied().unwrap_or(0) as f32
    };

    for y in 0..dst_height {
        for x in 0..dst_width {
            let src_x = x as f32 * x_ratio;
            let src_y = y as f32 * y_ratio;

            let x0 = src_x as usize;
            let y0 = src_y as usize;
            let x1 = (x0 + 1).min(src_width.saturating_sub(1));
            let y1 = (y0 + 1).min(src_height.saturating_sub(1));

            let x_frac = src_x - x0 as f32;
            let y_frac = src_y - y0 as f32;

            let value = pixel(x0, y0) * (1.0 - x_frac) * (1.0 - y_frac)
                + pixel(x1, y0) * x_frac * (1.0 - y_frac)
                + pixel(x0, y1) * (1.0 - x_frac) * y_frac
                + pixel(x1, y1) * x_frac * y_frac;

            data.push(value as u8);
        }
    }

    GreyImage {
        width: dst_width,
        height: dst_height,
        data,
    }
}
