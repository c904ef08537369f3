// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for capture and decode loops
//!
//! Capture backends and frame decoders both run a blocking loop on a
//! dedicated thread. This module gives them one way to start that thread,
//! learn whether its setup worked, and stop it exactly once.

use super::types::{CameraFrame, StreamId};
use crate::session::sink::FrameSink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a loop running on its own thread
///
/// Dropping the controller stops the loop and joins the thread.
pub struct CaptureLoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl CaptureLoopController {
    /// Start a loop that calls `loop_fn` until it returns [`LoopAction::Stop`]
    /// or [`CaptureLoopController::stop`] is called.
    pub fn start<F>(name: &str, mut loop_fn: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        info!(name = %name, "Starting loop thread");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                run_loop(&thread_name, &thread_stop, || loop_fn());
            })
            .map_err(|e| warn!(name = %name, error = %e, "Failed to spawn loop thread"))
            .ok();

        Self {
            thread_handle,
            stop_signal,
            name: name.to_string(),
        }
    }

    /// Start a loop whose state is built on the loop thread itself
    ///
    /// `init_fn` runs first on the new thread (device handles that must not
    /// cross threads are created there). The returned future resolves once
    /// initialization has finished: `Ok` with a running controller, or the
    /// init error after the thread has exited.
    pub async fn start_with_init<S, E, I, F>(name: &str, init_fn: I, mut loop_fn: F) -> Result<Self, E>
    where
        S: 'static,
        E: From<std::io::Error> + Send + 'static,
        I: FnOnce() -> Result<S, E> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();
        let (init_tx, init_rx) = tokio::sync::oneshot::channel::<Result<(), E>>();

        info!(name = %name, "Starting loop thread with initialization");

        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            debug!(name = %thread_name, "Loop thread started, initializing");

            let mut state = match init_fn() {
                Ok(state) => {
                    if init_tx.send(Ok(())).is_err() {
                        // Nobody is waiting for this loop anymore
                        debug!(name = %thread_name, "Starter went away, loop thread exiting");
                        return;
                    }
                    state
                }
                Err(e) => {
                    debug!(name = %thread_name, "Initialization failed, loop thread exiting");
                    let _ = init_tx.send(Err(e));
                    return;
                }
            };

            run_loop(&thread_name, &thread_stop, || loop_fn(&mut state));
        });

        let thread_handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                warn!(name = %name, error = %e, "Failed to spawn loop thread");
                return Err(E::from(e));
            }
        };

        let mut controller = Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        };

        match init_rx.await {
            Ok(Ok(())) => Ok(controller),
            Ok(Err(e)) => {
                controller.join();
                Err(e)
            }
            Err(_) => {
                // Init panicked; the sender was dropped during unwinding
                warn!(name = %name, "Loop thread died during initialization");
                controller.join();
                Err(E::from(std::io::Error::other(
                    "loop thread died during initialization",
                )))
            }
        }
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Shared stop flag, for work inside an iteration that wants to bail early
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    /// Signal the loop to stop without waiting for it
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish. Idempotent.
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending the stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                // Stopped from inside its own loop; the loop exits on its own
                return;
            }
            debug!(name = %self.name, "Waiting for loop thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Loop thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            self.stop();
        }
    }
}

fn run_loop(name: &str, stop: &AtomicBool, mut iteration: impl FnMut() -> LoopAction) {
    loop {
        if stop.load(Ordering::SeqCst) {
            debug!(name = %name, "Stop signal received");
            break;
        }

        if iteration() == LoopAction::Stop {
            debug!(name = %name, "Loop requested stop");
            break;
        }
    }

    info!(name = %name, "Loop thread exiting");
}

/// Sleep for `total` in short slices, returning early once `stop` is set
///
/// Returns `true` if the full duration elapsed.
pub fn sleep_unless_stopped(stop: &AtomicBool, total: Duration) -> bool {
    const SLICE: Duration = Duration::from_millis(5);

    let mut remaining = total;
    while !remaining.is_zero() {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(SLICE);
        thread::sleep(step);
        remaining -= step;
    }
    !stop.load(Ordering::SeqCst)
}

/// Where a capture loop delivers its frames
///
/// Shared between a stream handle and its loop thread; the handle attaches
/// and detaches the sink, the loop publishes into whatever is attached.
#[derive(Clone, Default)]
pub struct FrameTarget {
    sink: Arc<Mutex<Option<FrameSink>>>,
}

impl FrameTarget {
    pub fn attach(&self, sink: FrameSink) {
        *self.lock() = Some(sink);
    }

    pub fn detach(&self) -> Option<FrameSink> {
        self.lock().take()
    }

    pub fn is_attached(&self) -> bool {
        self.lock().is_some()
    }

    /// Publish `frame` as coming from `source`. Returns `false` if nothing
    /// is attached or the sink dropped the frame.
    pub fn deliver(&self, source: StreamId, frame: CameraFrame) -> bool {
        let guard = self.lock();
        match guard.as_ref() {
            Some(sink) => sink.publish(source, Arc::new(frame)),
            None => {
                trace!(%source, "No sink attached, frame discarded");
                false
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<FrameSink>> {
        self.sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
