// SPDX-License-Identifier: MPL-2.0

//! Frame processing for code detection
//!
//! Decoders sample the most recent sink frame at an interval and report
//! what they found. Currently implements QR code detection.

pub mod decoder;
pub mod tasks;
pub mod types;

pub use decoder::{DecodeHandle, DecoderError, FrameCallback, FrameDecoder};
pub use tasks::qr_detector::{QrDecoder, QrDetector};
pub use types::{DecodeOptions, Decoded, FrameOutcome, FrameRegion, Symbology, SymbologyFilter};
