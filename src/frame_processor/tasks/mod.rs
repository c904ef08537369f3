// SPDX-License-Identifier: GPL-3.0-only

//! Frame processing tasks
//!
//! Concrete detectors that turn camera frames into decoded codes.

pub mod qr_detector;

pub use qr_detector::{QrDecoder, QrDetector};
