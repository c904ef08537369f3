// SPDX-License-Identifier: GPL-3.0-only

//! The live surface a capture stream renders into
//!
//! A [`FrameSink`] stands in for the host's preview element. Exactly one
//! stream may be its source at a time; frames from any other stream are
//! dropped. Decoders read the most recent frame through a `watch` channel.

use crate::backends::camera::types::{BackendError, BackendResult, CameraFrame, StreamId};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, trace};

/// A frame as seen by the sink, tagged with the stream that produced it
#[derive(Debug, Clone)]
pub struct SinkFrame {
    pub source: StreamId,
    pub frame: Arc<CameraFrame>,
}

#[derive(Debug, Default)]
struct SinkState {
    mounted: bool,
    source: Option<StreamId>,
    paused: bool,
    playing: bool,
}

struct SinkInner {
    state: Mutex<SinkState>,
    frames: watch::Sender<Option<SinkFrame>>,
}

/// Shared handle to the preview surface
///
/// Cloning is cheap; all clones refer to the same surface.
#[derive(Clone)]
pub struct FrameSink {
    inner: Arc<SinkInner>,
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink")
            .field("state", &*self.state())
            .finish()
    }
}

impl Default for FrameSink {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink {
    /// Create a mounted sink with no source
    pub fn new() -> Self {
        let (frames, _) = watch::channel(None);
        Self {
            inner: Arc::new(SinkInner {
                state: Mutex::new(SinkState {
                    mounted: true,
                    ..SinkState::default()
                }),
                frames,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the surface available again after [`FrameSink::unmount`]
    pub fn mount(&self) {
        self.state().mounted = true;
    }

    /// The host surface went away. Any pending [`FrameSink::play`] fails
    /// with [`BackendError::SinkDetached`].
    pub fn unmount(&self) {
        let mut state = self.state();
        debug!(source = ?state.source, "Sink unmounted");
        state.mounted = false;
        state.source = None;
        state.playing = false;
        self.inner.frames.send_replace(None);
    }

    pub fn is_mounted(&self) -> bool {
        self.state().mounted
    }

    /// Route frames from `source` to this surface, replacing any previous
    /// source
    pub fn set_source(&self, source: StreamId) -> BackendResult<()> {
        let mut state = self.state();
        if !state.mounted {
            return Err(BackendError::SinkDetached);
        }
        if state.source != Some(source) {
            state.playing = false;
            self.inner.frames.send_replace(None);
        }
        state.source = Some(source);
        state.paused = false;
        Ok(())
    }

    /// Current source stream, if any
    pub fn source(&self) -> Option<StreamId> {
        self.state().source
    }

    /// Drop the current source. Pending [`FrameSink::play`] calls fail.
    pub fn clear_source(&self) {
        let mut state = self.state();
        if state.source.take().is_some() {
            debug!("Sink source cleared");
        }
        state.playing = false;
        self.inner.frames.send_replace(None);
    }

    /// Stop showing new frames while keeping the source
    pub fn pause(&self) {
        let mut state = self.state();
        state.paused = true;
        state.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.state().playing
    }

    /// Offer a frame from `source`
    ///
    /// Returns `false` when the frame was dropped because `source` is not
    /// the current source or the sink is paused or unmounted.
    pub fn publish(&self, source: StreamId, frame: Arc<CameraFrame>) -> bool {
        let state = self.state();
        if !state.mounted || state.paused || state.source != Some(source) {
            trace!(%source, "Dropping frame from inactive source");
            return false;
        }
        // Sent under the lock so a frame cannot land after clear_source
        self.inner
            .frames
            .send_replace(Some(SinkFrame { source, frame }));
        true
    }

    /// Resolve once the current source has delivered a frame
    ///
    /// Fails with [`BackendError::SinkDetached`] if the sink is unmounted,
    /// has no source, or the source changes before a frame arrives.
    pub async fn play(&self) -> BackendResult<()> {
        let mut rx = self.inner.frames.subscribe();
        let expected = match self.source() {
            Some(source) => source,
            None => return Err(BackendError::SinkDetached),
        };

        loop {
            {
                let mut state = self.state();
                if !state.mounted || state.source != Some(expected) {
                    return Err(BackendError::SinkDetached);
                }
                let arrived = rx
                    .borrow_and_update()
                    .as_ref()
                    .is_some_and(|f| f.source == expected);
                if arrived {
                    state.playing = true;
                    debug!(source = %expected, "Sink playing");
                    return Ok(());
                }
            }

            if rx.changed().await.is_err() {
                return Err(BackendError::SinkDetached);
            }
        }
    }

    /// Receiver for the most recent frame
    pub fn subscribe(&self) -> watch::Receiver<Option<SinkFrame>> {
        self.inner.frames.subscribe()
    }

    pub fn latest_frame(&self) -> Option<SinkFrame> {
        self.inner.frames.borrow().clone()
    }
}
