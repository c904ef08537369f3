// SPDX-License-Identifier: GPL-3.0-only

//! Hardware resources held by a session
//!
//! The session owns at most one capture stream and one decode loop. Teardown
//! runs the same ordered steps on every exit path; each step tolerates the
//! previous ones having failed, and running it twice is harmless.

use super::sink::FrameSink;
use crate::backends::camera::CaptureStream;
use crate::backends::camera::types::BackendResult;
use crate::frame_processor::DecodeHandle;
use tracing::{debug, error, warn};

pub struct SessionResources {
    sink: FrameSink,
    stream: Option<Box<dyn CaptureStream>>,
    decode: Option<Box<dyn DecodeHandle>>,
}

impl SessionResources {
    pub fn new(sink: FrameSink) -> Self {
        Self {
            sink,
            stream: None,
            decode: None,
        }
    }

    pub fn sink(&self) -> &FrameSink {
        &self.sink
    }

    pub fn holds_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub fn holds_decoder(&self) -> bool {
        self.decode.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_none() && self.decode.is_none()
    }

    /// Take ownership of a freshly opened stream
    pub fn adopt_stream(&mut self, stream: Box<dyn CaptureStream>) {
        if let Some(previous) = self.stream.take() {
            error!(
                previous = %previous.id(),
                incoming = %stream.id(),
                "Adopting a stream while another is held; releasing the old one"
            );
            self.stop_decoder();
            release_detached(previous);
        }
        self.stream = Some(stream);
    }

    pub fn adopt_decoder(&mut self, handle: Box<dyn DecodeHandle>) {
        if let Some(mut previous) = self.decode.take() {
            error!("Adopting a decode loop while another is running; stopping the old one");
            previous.stop();
        }
        self.decode = Some(handle);
    }

    /// Make the held stream the sink's source
    pub fn attach(&mut self) -> BackendResult<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.attach(&self.sink),
            None => Err(crate::backends::camera::types::BackendError::Other(
                "no stream to attach".into(),
            )),
        }
    }

    fn stop_decoder(&mut self) {
        if let Some(handle) = self.decode.as_mut()
            && !handle.is_stopped()
        {
            handle.stop();
            debug!("Decode loop stopped");
        }
    }

    /// Release everything, in order:
    /// decoder, tracks, sink detach, sink source, handles
    pub fn teardown(&mut self) {
        if self.is_empty() && self.sink.source().is_none() {
            return;
        }

        self.stop_decoder();

        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.stop_tracks() {
                warn!(stream = %stream.id(), error = %e, "Failed to stop tracks");
            }
            if let Err(e) = stream.detach() {
                debug!(stream = %stream.id(), error = %e, "Failed to detach stream");
            }
        }
        self.sink.pause();
        self.sink.clear_source();

        self.decode = None;
        if let Some(stream) = self.stream.take() {
            let id = stream.id();
            match stream.release() {
                Ok(()) => debug!(stream = %id, "Stream released"),
                Err(e) => warn!(stream = %id, error = %e, "Failed to release stream"),
            }
        }
    }
}

impl Drop for SessionResources {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Release a stream that was never attached, or whose session is gone
pub fn release_detached(mut stream: Box<dyn CaptureStream>) {
    let id = stream.id();
    if let Err(e) = stream.stop_tracks() {
        warn!(stream = %id, error = %e, "Failed to stop tracks of stale stream");
    }
    if let Err(e) = stream.detach() {
        debug!(stream = %id, error = %e, "Failed to detach stale stream");
    }
    match stream.release() {
        Ok(()) => debug!(stream = %id, "Stale stream released"),
        Err(e) => warn!(stream = %id, error = %e, "Failed to release stale stream"),
    }
}
