// SPDX-License-Identifier: GPL-3.0-only

//! Scan session controller
//!
//! The controller is a tokio task that owns the [`SessionMachine`], the
//! session's resources and the decoder. Host calls on
//! [`ScanSessionController`] become commands on one channel; spawned work
//! (enumeration, stream opening, sink playback, settle waits, decoded
//! frames) reports back on another. Only the task mutates session state.
//!
//! ```text
//!  host ──commands──▶ ┌──────────────┐ ──effects──▶ provider / sink / decoder
//!                     │ SessionActor │
//!  tasks ─completions▶└──────────────┘ ──snapshot──▶ watch subscribers
//! ```

use super::host::SessionHost;
use super::machine::{Effect, Input, MachineConfig, SessionMachine};
use super::resources::{SessionResources, release_detached};
use super::sink::FrameSink;
use super::state::{Activation, SessionSnapshot};
use super::switcher::{SettlePolicy, wait_for_settle};
use crate::backends::camera::types::{CameraDevice, DeviceSelector};
use crate::backends::camera::{CaptureDeviceProvider, CaptureStream};
use crate::config::Config;
use crate::errors::ScanError;
use crate::frame_processor::{DecodeOptions, FrameDecoder, FrameOutcome, SymbologyFilter};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Settings for one controller
#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    pub machine: MachineConfig,
    pub settle: SettlePolicy,
}

impl From<&Config> for ControllerConfig {
    fn from(config: &Config) -> Self {
        Self {
            machine: MachineConfig {
                default_facing: config.facing,
                symbologies: config.symbology_filter(),
                options: DecodeOptions {
                    thorough: config.thorough,
                },
                remembered_device: config.last_camera_path.clone(),
            },
            settle: config.settle_policy(),
        }
    }
}

impl ControllerConfig {
    pub fn with_symbologies(mut self, symbologies: SymbologyFilter) -> Self {
        self.machine.symbologies = symbologies;
        self
    }
}

enum Command {
    Open(Option<DeviceSelector>),
    Close,
    Retry,
    SwitchCamera,
    Shutdown(oneshot::Sender<()>),
}

enum Completion {
    DevicesListed {
        activation: Activation,
        result: Result<Vec<CameraDevice>, ScanError>,
    },
    StreamOpened {
        activation: Activation,
        result: Result<Box<dyn CaptureStream>, ScanError>,
    },
    SinkPlaying {
        activation: Activation,
        result: Result<(), ScanError>,
    },
    Frame {
        activation: Activation,
        outcome: FrameOutcome,
    },
    Settled {
        activation: Activation,
    },
}

/// Host-side handle to a running scan session controller
///
/// Dropping the handle tears the session down and ends the controller task.
pub struct ScanSessionController {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl ScanSessionController {
    /// Start the controller task on the current tokio runtime
    pub fn spawn(
        provider: Arc<dyn CaptureDeviceProvider>,
        decoder: Box<dyn FrameDecoder>,
        sink: FrameSink,
        host: Arc<dyn SessionHost>,
        config: ControllerConfig,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (completions, completion_rx) = mpsc::unbounded_channel();
        let machine = SessionMachine::new(config.machine);
        let (snapshot_tx, snapshot) = watch::channel(machine.snapshot());

        info!(backend = %provider.backend_type(), "Starting scan session controller");

        let actor = SessionActor {
            machine,
            resources: SessionResources::new(sink),
            provider,
            decoder,
            host,
            settle: config.settle,
            completions,
            snapshot: snapshot_tx,
            incoming: None,
        };
        let task = tokio::spawn(actor.run(command_rx, completion_rx));

        Self {
            commands,
            snapshot,
            task: Some(task),
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Controller task has stopped, command dropped");
        }
    }

    /// Start a session. No-op while one is acquiring, decoding or switching.
    pub fn open(&self, selector: Option<DeviceSelector>) {
        self.send(Command::Open(selector));
    }

    /// End the session from any state. No-op while idle.
    pub fn close(&self) {
        self.send(Command::Close);
    }

    /// Re-attempt after a failure
    pub fn retry(&self) {
        self.send(Command::Retry);
    }

    /// Move to the next known camera. No-op with fewer than two.
    pub fn switch_camera(&self) {
        self.send(Command::SwitchCamera);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Tear the session down and wait for the controller task to finish
    pub async fn shutdown(mut self) {
        let (ack, done) = oneshot::channel();
        self.send(Command::Shutdown(ack));
        let _ = done.await;
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "Controller task ended abnormally");
        }
    }
}

struct SessionActor {
    machine: SessionMachine,
    resources: SessionResources,
    provider: Arc<dyn CaptureDeviceProvider>,
    decoder: Box<dyn FrameDecoder>,
    host: Arc<dyn SessionHost>,
    settle: SettlePolicy,
    completions: mpsc::UnboundedSender<Completion>,
    snapshot: watch::Sender<SessionSnapshot>,
    /// Opened stream waiting for the machine to adopt it
    incoming: Option<Box<dyn CaptureStream>>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Open(selector)) => self.apply(Input::Open(selector)),
                    Some(Command::Close) => self.apply(Input::Close),
                    Some(Command::Retry) => self.apply(Input::Retry),
                    Some(Command::SwitchCamera) => self.apply(Input::SwitchCamera),
                    Some(Command::Shutdown(ack)) => {
                        self.apply(Input::Teardown);
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        debug!("All controller handles dropped");
                        self.apply(Input::Teardown);
                        break;
                    }
                },

                Some(completion) = completions.recv() => self.complete(completion),
            }
        }

        info!("Scan session controller stopped");
    }

    fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::DevicesListed { activation, result } => {
                self.apply(Input::DevicesListed { activation, result })
            }
            Completion::StreamOpened { activation, result } => {
                let result = result.map(|stream| {
                    self.incoming = Some(stream);
                });
                self.apply(Input::StreamOpened { activation, result });

                if let Some(stream) = self.incoming.take() {
                    debug!(%activation, stream = %stream.id(), "Releasing stream from superseded activation");
                    release_detached(stream);
                }
            }
            Completion::SinkPlaying { activation, result } => {
                self.apply(Input::SinkPlaying { activation, result })
            }
            Completion::Frame {
                activation,
                outcome,
            } => self.apply(Input::Frame {
                activation,
                outcome,
            }),
            Completion::Settled { activation } => self.apply(Input::Settled { activation }),
        }
    }

    /// Run an input through the machine and carry out its effects, feeding
    /// synchronous follow-ups back in
    fn apply(&mut self, input: Input) {
        let mut queue = VecDeque::from([input]);

        while let Some(input) = queue.pop_front() {
            let step = self.machine.step(input);

            for transition in &step.transitions {
                info!(
                    activation = %self.machine.activation(),
                    session_id = ?self.machine.session_id(),
                    from = %transition.from,
                    to = %transition.to,
                    "Session state changed"
                );
            }

            // Published before any host callback so the host never observes
            // a state older than the outcome it is told about
            let snapshot = self.machine.snapshot();
            self.snapshot.send_if_modified(|current| {
                if *current == snapshot {
                    false
                } else {
                    *current = snapshot;
                    true
                }
            });

            for effect in step.effects {
                if let Some(follow_up) = self.execute(effect) {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    fn execute(&mut self, effect: Effect) -> Option<Input> {
        match effect {
            Effect::ListDevices { activation } => {
                let provider = Arc::clone(&self.provider);
                let completions = self.completions.clone();
                tokio::spawn(async move {
                    let result = provider.list_devices().await.map_err(ScanError::from);
                    let _ = completions.send(Completion::DevicesListed { activation, result });
                });
                None
            }

            Effect::OpenStream {
                activation,
                request,
            } => {
                info!(%activation, device = %request.device.path, "Opening camera");
                let provider = Arc::clone(&self.provider);
                let completions = self.completions.clone();
                tokio::spawn(async move {
                    let result = provider.open_stream(&request).await.map_err(ScanError::from);
                    if let Err(mpsc::error::SendError(Completion::StreamOpened {
                        result: Ok(stream),
                        ..
                    })) = completions.send(Completion::StreamOpened { activation, result })
                    {
                        // Controller already gone
                        release_detached(stream);
                    }
                });
                None
            }

            Effect::AdoptStream => {
                match self.incoming.take() {
                    Some(stream) => {
                        debug!(stream = %stream.id(), device = stream.device_id(), "Adopting stream");
                        self.resources.adopt_stream(stream);
                    }
                    None => warn!("Asked to adopt a stream but none is pending"),
                }
                None
            }

            Effect::AttachSink { activation } => {
                if let Err(e) = self.resources.attach() {
                    return Some(Input::SinkPlaying {
                        activation,
                        result: Err(e.into()),
                    });
                }

                let sink = self.resources.sink().clone();
                let completions = self.completions.clone();
                tokio::spawn(async move {
                    let result = sink.play().await.map_err(ScanError::from);
                    let _ = completions.send(Completion::SinkPlaying { activation, result });
                });
                None
            }

            Effect::StartDecoder {
                activation,
                symbologies,
                options,
            } => {
                self.decoder.configure(&symbologies, options);

                let completions = self.completions.clone();
                let on_frame = Box::new(move |outcome: FrameOutcome| {
                    if outcome == FrameOutcome::NotFound {
                        return;
                    }
                    let _ = completions.send(Completion::Frame {
                        activation,
                        outcome,
                    });
                });

                let result = match self.decoder.start(self.resources.sink(), on_frame) {
                    Ok(handle) => {
                        self.resources.adopt_decoder(handle);
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                };
                Some(Input::DecoderStarted { activation, result })
            }

            Effect::Teardown => {
                self.resources.teardown();
                None
            }

            Effect::AwaitSettle {
                activation,
                released_device,
            } => {
                let provider = Arc::clone(&self.provider);
                let completions = self.completions.clone();
                let policy = self.settle;
                tokio::spawn(async move {
                    wait_for_settle(&*provider, released_device.as_deref(), policy, activation)
                        .await;
                    let _ = completions.send(Completion::Settled { activation });
                });
                None
            }

            Effect::DeliverResult(result) => {
                info!(
                    session_id = %result.session_id,
                    symbology = %result.symbology,
                    "Delivering scan result"
                );
                self.host.on_result(result);
                None
            }

            Effect::ReportError(error) => {
                warn!(error = %error, "Scan session failed");
                self.host.on_error(error);
                None
            }
        }
    }
}
