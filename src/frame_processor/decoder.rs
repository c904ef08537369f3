// SPDX-License-Identifier: MPL-2.0

//! Decoder abstraction used by the scan session
//!
//! A decoder watches a [`FrameSink`] and reports one [`FrameOutcome`] per
//! inspected frame until its [`DecodeHandle`] is stopped.

use super::types::{DecodeOptions, FrameOutcome, SymbologyFilter};
use crate::session::sink::FrameSink;
use std::fmt;

/// Called from the decoder's thread for every inspected frame
pub type FrameCallback = Box<dyn FnMut(FrameOutcome) + Send>;

/// Why a decoder could not start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderError {
    /// The sink has no source to read frames from
    SinkUnattached,
    /// The decoder failed for another reason
    Failed(String),
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderError::SinkUnattached => write!(f, "Sink has no attached source"),
            DecoderError::Failed(msg) => write!(f, "Decoder failed: {}", msg),
        }
    }
}

impl std::error::Error for DecoderError {}

/// A running decode loop
pub trait DecodeHandle: Send {
    /// Stop the loop. No callback fires after this returns. Idempotent.
    fn stop(&mut self);

    fn is_stopped(&self) -> bool;
}

/// Turns sink frames into decoded payloads
pub trait FrameDecoder: Send + Sync {
    /// Set the accepted formats and tuning for the next [`FrameDecoder::start`]
    fn configure(&mut self, symbologies: &SymbologyFilter, options: DecodeOptions);

    /// Start inspecting frames from `sink`
    ///
    /// # Returns
    /// * `Ok(handle)` - Loop running; stop it through the handle
    /// * `Err(DecoderError::SinkUnattached)` - The sink has no source
    fn start(
        &self,
        sink: &FrameSink,
        on_frame: FrameCallback,
    ) -> Result<Box<dyn DecodeHandle>, DecoderError>;
}
