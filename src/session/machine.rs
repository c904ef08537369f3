// SPDX-License-Identifier: GPL-3.0-only

//! Pure scan session state machine
//!
//! [`SessionMachine::step`] consumes one [`Input`] and returns the effects the
//! controller must carry out, in order. The machine never touches devices or
//! the runtime, so every transition can be exercised synchronously.
//!
//! Every asynchronous request carries the [`Activation`] current when it was
//! issued. Completions for any other activation, or arriving in a phase that
//! no longer expects them, produce no effects; the controller then releases
//! whatever resource the completion carried.

use super::state::{AcquirePhase, Activation, ScanResult, SessionId, SessionSnapshot, SessionState};
use super::switcher::SwitchCoordinator;
use crate::backends::camera::selection::select_device;
use crate::backends::camera::types::{
    CameraDevice, DeviceSelector, FacingMode, Framerate, StreamRequest,
};
use crate::constants::CaptureProfile;
use crate::errors::ScanError;
use crate::frame_processor::{DecodeOptions, FrameOutcome, SymbologyFilter};
use chrono::Local;
use tracing::{debug, trace};

/// Something that happened to the session
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Host asked for a session, optionally naming the camera
    Open(Option<DeviceSelector>),
    Close,
    Retry,
    SwitchCamera,
    /// The controller is going away
    Teardown,
    DevicesListed {
        activation: Activation,
        result: Result<Vec<CameraDevice>, ScanError>,
    },
    /// The stream itself stays with the controller until adopted
    StreamOpened {
        activation: Activation,
        result: Result<(), ScanError>,
    },
    SinkPlaying {
        activation: Activation,
        result: Result<(), ScanError>,
    },
    DecoderStarted {
        activation: Activation,
        result: Result<(), ScanError>,
    },
    Frame {
        activation: Activation,
        outcome: FrameOutcome,
    },
    /// The settle wait after releasing a device finished
    Settled { activation: Activation },
}

/// Work the controller performs on behalf of the machine
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ListDevices {
        activation: Activation,
    },
    OpenStream {
        activation: Activation,
        request: StreamRequest,
    },
    /// Move the just-opened stream into the session's slot
    AdoptStream,
    AttachSink {
        activation: Activation,
    },
    StartDecoder {
        activation: Activation,
        symbologies: SymbologyFilter,
        options: DecodeOptions,
    },
    /// Release everything the session holds, in order
    Teardown,
    AwaitSettle {
        activation: Activation,
        released_device: Option<String>,
    },
    DeliverResult(ScanResult),
    ReportError(ScanError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}

/// Output of one [`SessionMachine::step`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Step {
    pub effects: Vec<Effect>,
    pub transitions: Vec<Transition>,
}

impl Step {
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty() && self.transitions.is_empty()
    }
}

/// Settings that outlive individual sessions
#[derive(Debug, Clone, Default)]
pub struct MachineConfig {
    pub default_facing: FacingMode,
    pub symbologies: SymbologyFilter,
    pub options: DecodeOptions,
    /// Camera to prefer until the user picks another one
    pub remembered_device: Option<String>,
}

pub struct SessionMachine {
    state: SessionState,
    phase: Option<AcquirePhase>,
    activation: Activation,
    session_id: Option<SessionId>,
    selector: DeviceSelector,
    default_facing: FacingMode,
    symbologies: SymbologyFilter,
    options: DecodeOptions,
    cameras: Vec<CameraDevice>,
    current_index: Option<usize>,
    remembered: Option<String>,
    /// Device that failed the previous attempt, skipped by a retry
    avoid: Option<String>,
    last_error: Option<ScanError>,
    switcher: SwitchCoordinator,
}

impl SessionMachine {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            state: SessionState::Idle,
            phase: None,
            activation: Activation::default(),
            session_id: None,
            selector: DeviceSelector::Facing(config.default_facing),
            default_facing: config.default_facing,
            symbologies: config.symbologies,
            options: config.options,
            cameras: Vec::new(),
            current_index: None,
            remembered: config.remembered_device,
            avoid: None,
            last_error: None,
            switcher: SwitchCoordinator::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn phase(&self) -> Option<AcquirePhase> {
        self.phase
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn cameras(&self) -> &[CameraDevice] {
        &self.cameras
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current_camera(&self) -> Option<&CameraDevice> {
        self.current_index.and_then(|i| self.cameras.get(i))
    }

    pub fn remembered_device(&self) -> Option<&str> {
        self.remembered.as_deref()
    }

    pub fn last_error(&self) -> Option<&ScanError> {
        self.last_error.as_ref()
    }

    pub fn switcher(&self) -> SwitchCoordinator {
        self.switcher
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            session_id: self.session_id,
            available_camera_count: self.cameras.len(),
            current_camera_label: self.current_camera().map(|c| c.name.clone()),
            last_error: self.last_error.clone(),
        }
    }

    /// Apply one input
    pub fn step(&mut self, input: Input) -> Step {
        let mut step = Step::default();

        match input {
            Input::Open(selector) => {
                let selector = selector.unwrap_or(DeviceSelector::Facing(self.default_facing));
                self.start_session(selector, None, &mut step);
            }
            Input::Retry => {
                if self.state.is_active() {
                    debug!(state = %self.state, "Session already running, ignoring retry");
                } else {
                    let (selector, avoid) = self.retry_target();
                    self.start_session(selector, avoid, &mut step);
                }
            }
            Input::Close => self.close(false, &mut step),
            Input::Teardown => self.close(true, &mut step),
            Input::SwitchCamera => self.switch_requested(&mut step),
            Input::DevicesListed { activation, result } => {
                if self.expects(activation, AcquirePhase::ListingDevices) {
                    match result {
                        Ok(devices) => self.devices_listed(devices, &mut step),
                        Err(e) => {
                            self.current_index = None;
                            self.fail(e, &mut step);
                        }
                    }
                }
            }
            Input::StreamOpened { activation, result } => {
                if self.expects(activation, AcquirePhase::OpeningStream) {
                    match result {
                        Ok(()) => {
                            self.phase = Some(AcquirePhase::AttachingSink);
                            step.effects.push(Effect::AdoptStream);
                            step.effects.push(Effect::AttachSink { activation });
                        }
                        Err(e) => self.fail(e, &mut step),
                    }
                }
            }
            Input::SinkPlaying { activation, result } => {
                if self.expects(activation, AcquirePhase::AttachingSink) {
                    match result {
                        Ok(()) => {
                            self.phase = Some(AcquirePhase::StartingDecoder);
                            step.effects.push(Effect::StartDecoder {
                                activation,
                                symbologies: self.symbologies.clone(),
                                options: self.options,
                            });
                        }
                        Err(e) => self.fail(e, &mut step),
                    }
                }
            }
            Input::DecoderStarted { activation, result } => {
                if self.expects(activation, AcquirePhase::StartingDecoder) {
                    match result {
                        Ok(()) => self.reach_decoding(&mut step),
                        Err(e) => self.fail(e, &mut step),
                    }
                }
            }
            Input::Frame {
                activation,
                outcome,
            } => self.frame(activation, outcome, &mut step),
            Input::Settled { activation } => {
                if activation == self.activation && self.state == SessionState::SwitchingDevice {
                    self.begin_acquire(&mut step);
                } else {
                    trace!(%activation, current = %self.activation, "Ignoring stale settle");
                }
            }
        }

        step
    }

    fn set_state(&mut self, to: SessionState, step: &mut Step) {
        if self.state != to {
            step.transitions.push(Transition {
                from: self.state,
                to,
            });
            self.state = to;
        }
    }

    fn expects(&self, activation: Activation, phase: AcquirePhase) -> bool {
        let current = activation == self.activation
            && self.state == SessionState::Acquiring
            && self.phase == Some(phase);
        if !current {
            trace!(
                %activation,
                current = %self.activation,
                state = %self.state,
                ?phase,
                "Discarding stale completion"
            );
        }
        current
    }

    /// Selector for a retry, plus the device it should stay away from
    ///
    /// After `DeviceUnavailable` the failed camera is neither remembered nor
    /// picked again while another one is enumerated.
    fn retry_target(&mut self) -> (DeviceSelector, Option<String>) {
        if !matches!(self.last_error, Some(ScanError::DeviceUnavailable(_))) {
            return (self.selector.clone(), None);
        }

        let failed = match &self.selector {
            DeviceSelector::Device(id) => Some(id.clone()),
            DeviceSelector::Facing(_) => self.current_camera().map(|c| c.id().to_string()),
        };
        if failed.is_some() && self.remembered == failed {
            self.remembered = None;
        }

        let selector = match &self.selector {
            DeviceSelector::Device(id) => {
                debug!(device = %id, "Explicit camera unavailable, retrying by facing");
                DeviceSelector::Facing(self.default_facing)
            }
            selector => selector.clone(),
        };
        (selector, failed)
    }

    fn start_session(&mut self, selector: DeviceSelector, avoid: Option<String>, step: &mut Step) {
        if self.state.is_active() {
            debug!(state = %self.state, "Session already running, ignoring open");
            return;
        }

        if self.state != SessionState::Idle {
            step.effects.push(Effect::Teardown);
        }

        self.activation = self.activation.next();
        self.session_id = Some(SessionId::new());
        self.selector = selector;
        self.avoid = avoid;
        self.switcher.reset();
        self.begin_acquire(step);
    }

    fn begin_acquire(&mut self, step: &mut Step) {
        self.set_state(SessionState::Acquiring, step);
        self.phase = Some(AcquirePhase::ListingDevices);
        step.effects.push(Effect::ListDevices {
            activation: self.activation,
        });
    }

    fn devices_listed(&mut self, devices: Vec<CameraDevice>, step: &mut Step) {
        self.cameras = devices;

        let index = match select_device(
            &self.cameras,
            &self.selector,
            self.remembered.as_deref(),
            self.avoid.as_deref(),
        ) {
            Ok(index) => index,
            Err(e) => {
                self.current_index = None;
                return self.fail(e, step);
            }
        };
        self.current_index = Some(index);

        let profile = CaptureProfile::for_symbologies(&self.symbologies);
        let facing = match &self.selector {
            DeviceSelector::Facing(facing) => *facing,
            DeviceSelector::Device(_) => self.default_facing,
        };
        let request = StreamRequest {
            device: self.cameras[index].clone(),
            width: profile.width,
            height: profile.height,
            framerate: Framerate::from_int(profile.framerate),
            facing,
        };

        self.phase = Some(AcquirePhase::OpeningStream);
        step.effects.push(Effect::OpenStream {
            activation: self.activation,
            request,
        });
    }

    fn reach_decoding(&mut self, step: &mut Step) {
        self.phase = None;
        self.last_error = None;
        self.avoid = None;
        self.remembered = self.current_camera().map(|c| c.id().to_string());
        self.set_state(SessionState::Decoding, step);

        if self.switcher.complete() {
            debug!("Running queued camera switch");
            self.switch_requested(step);
        }
    }

    fn frame(&mut self, activation: Activation, outcome: FrameOutcome, step: &mut Step) {
        let decoded = match outcome {
            FrameOutcome::Decoded(decoded) => decoded,
            FrameOutcome::NotFound => return,
        };

        if activation != self.activation || self.state != SessionState::Decoding {
            trace!(%activation, current = %self.activation, "Discarding stale decode");
            return;
        }

        if !self.symbologies.allows(decoded.symbology) {
            debug!(symbology = %decoded.symbology, "Ignoring code outside allowed symbologies");
            return;
        }

        let result = ScanResult {
            text: decoded.text,
            symbology: decoded.symbology,
            session_id: self.session_id.unwrap_or_default(),
            camera: self.current_camera().map(|c| c.name.clone()),
            device_id: self.current_camera().map(|c| c.id().to_string()),
            scanned_at: Local::now(),
        };

        self.activation = self.activation.next();
        self.session_id = None;
        self.switcher.reset();
        self.set_state(SessionState::Stopped, step);
        self.set_state(SessionState::Idle, step);
        step.effects.push(Effect::Teardown);
        step.effects.push(Effect::DeliverResult(result));
    }

    fn switch_requested(&mut self, step: &mut Step) {
        match self.state {
            SessionState::Decoding => {}
            SessionState::SwitchingDevice | SessionState::Acquiring
                if self.switcher.in_flight() =>
            {
                self.switcher.queue();
                return;
            }
            state => {
                debug!(%state, "Not decoding, ignoring camera switch");
                return;
            }
        }

        let count = self.cameras.len();
        if count < 2 {
            debug!(count, "Not enough cameras to switch");
            return;
        }

        let current = self.current_index.unwrap_or(0);
        let next = (current + 1) % count;
        let released_device = self.cameras.get(current).map(|c| c.id().to_string());
        let target = self.cameras[next].id().to_string();

        debug!(from = ?released_device, to = %target, "Switching camera");

        if let DeviceSelector::Device(_) = self.selector {
            self.selector = DeviceSelector::Device(target.clone());
        }
        self.remembered = Some(target);
        self.current_index = Some(next);
        self.activation = self.activation.next();
        self.switcher.begin();
        self.set_state(SessionState::SwitchingDevice, step);
        step.effects.push(Effect::Teardown);
        step.effects.push(Effect::AwaitSettle {
            activation: self.activation,
            released_device,
        });
    }

    fn close(&mut self, unmounting: bool, step: &mut Step) {
        match self.state {
            SessionState::Idle => {
                if unmounting {
                    step.effects.push(Effect::Teardown);
                }
                return;
            }
            SessionState::Failed => {
                self.set_state(SessionState::Idle, step);
            }
            _ => {
                self.set_state(SessionState::Stopping, step);
                self.set_state(SessionState::Stopped, step);
                self.set_state(SessionState::Idle, step);
            }
        }

        self.activation = self.activation.next();
        self.phase = None;
        self.session_id = None;
        self.switcher.reset();
        step.effects.push(Effect::Teardown);
    }

    fn fail(&mut self, error: ScanError, step: &mut Step) {
        // Noise only describes single frames. From an acquisition step it
        // means the device never produced anything usable.
        let error = match error {
            ScanError::TransientDecodeNoise => {
                ScanError::DeviceUnavailable("camera produced no usable frames".into())
            }
            error => error,
        };

        self.activation = self.activation.next();
        self.phase = None;
        self.switcher.reset();
        step.effects.push(Effect::Teardown);

        if error == ScanError::SinkDetached {
            debug!("Sink detached while acquiring, cancelling session");
            self.session_id = None;
            self.set_state(SessionState::Idle, step);
            return;
        }

        self.last_error = Some(error.clone());
        self.set_state(SessionState::Failed, step);
        step.effects.push(Effect::ReportError(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_processor::{Decoded, Symbology};

    fn cameras() -> Vec<CameraDevice> {
        vec![
            CameraDevice::new("Front Camera", "/dev/video0"),
            CameraDevice::new("Back Camera", "/dev/video2"),
        ]
    }

    fn machine() -> SessionMachine {
        SessionMachine::new(MachineConfig::default())
    }

    fn machine_with(symbologies: SymbologyFilter) -> SessionMachine {
        SessionMachine::new(MachineConfig {
            symbologies,
            ..MachineConfig::default()
        })
    }

    /// Walk the machine through a successful acquisition
    fn acquire(m: &mut SessionMachine, devices: Vec<CameraDevice>) -> Step {
        let activation = m.activation();
        m.step(Input::DevicesListed {
            activation,
            result: Ok(devices),
        });
        m.step(Input::StreamOpened {
            activation,
            result: Ok(()),
        });
        m.step(Input::SinkPlaying {
            activation,
            result: Ok(()),
        });
        m.step(Input::DecoderStarted {
            activation,
            result: Ok(()),
        })
    }

    fn open_and_decode(m: &mut SessionMachine, devices: Vec<CameraDevice>) {
        m.step(Input::Open(None));
        acquire(m, devices);
        assert_eq!(m.state(), SessionState::Decoding);
    }

    fn decoded(text: &str, symbology: Symbology) -> FrameOutcome {
        FrameOutcome::Decoded(Decoded::new(text, symbology))
    }

    fn reported_errors(step: &Step) -> usize {
        step.effects
            .iter()
            .filter(|e| matches!(e, Effect::ReportError(_)))
            .count()
    }

    #[test]
    fn test_open_starts_listing() {
        let mut m = machine();
        let step = m.step(Input::Open(None));

        assert_eq!(m.state(), SessionState::Acquiring);
        assert_eq!(m.phase(), Some(AcquirePhase::ListingDevices));
        assert!(m.session_id().is_some());
        assert_eq!(
            step.effects,
            vec![Effect::ListDevices {
                activation: m.activation()
            }]
        );
        assert_eq!(
            step.transitions,
            vec![Transition {
                from: SessionState::Idle,
                to: SessionState::Acquiring
            }]
        );
    }

    #[test]
    fn test_open_while_active_is_noop() {
        let mut m = machine();
        m.step(Input::Open(None));
        let activation = m.activation();

        assert!(m.step(Input::Open(None)).is_empty());
        assert_eq!(m.activation(), activation);

        acquire(&mut m, cameras());
        assert!(m.step(Input::Open(None)).is_empty());
    }

    #[test]
    fn test_close_while_idle_is_noop() {
        let mut m = machine();
        assert!(m.step(Input::Close).is_empty());
    }

    #[test]
    fn test_acquisition_prefers_back_camera() {
        let mut m = machine();
        m.step(Input::Open(None));
        let activation = m.activation();

        let step = m.step(Input::DevicesListed {
            activation,
            result: Ok(cameras()),
        });
        match &step.effects[..] {
            [Effect::OpenStream { request, .. }] => {
                assert_eq!(request.device.path, "/dev/video2");
            }
            other => panic!("unexpected effects: {:?}", other),
        }

        acquire(&mut m, cameras());
        assert_eq!(m.state(), SessionState::Decoding);
        assert_eq!(m.current_index(), Some(1));
        assert_eq!(m.remembered_device(), Some("/dev/video2"));
        assert_eq!(
            m.snapshot().current_camera_label.as_deref(),
            Some("Back Camera")
        );
        assert_eq!(m.snapshot().available_camera_count, 2);
    }

    #[test]
    fn test_stream_opened_adopts_then_attaches() {
        let mut m = machine();
        m.step(Input::Open(None));
        let activation = m.activation();
        m.step(Input::DevicesListed {
            activation,
            result: Ok(cameras()),
        });

        let step = m.step(Input::StreamOpened {
            activation,
            result: Ok(()),
        });
        assert_eq!(
            step.effects,
            vec![Effect::AdoptStream, Effect::AttachSink { activation }]
        );
    }

    #[test]
    fn test_empty_enumeration_fails_once() {
        let mut m = machine();
        m.step(Input::Open(None));
        let activation = m.activation();

        let step = m.step(Input::DevicesListed {
            activation,
            result: Ok(Vec::new()),
        });

        assert_eq!(m.state(), SessionState::Failed);
        assert_eq!(reported_errors(&step), 1);
        assert_eq!(step.effects[0], Effect::Teardown);
        assert!(matches!(
            m.last_error(),
            Some(ScanError::DeviceUnavailable(_))
        ));
        assert_ne!(m.activation(), activation);
    }

    #[test]
    fn test_stale_stream_after_close_is_not_adopted() {
        let mut m = machine();
        m.step(Input::Open(None));
        let activation = m.activation();
        m.step(Input::DevicesListed {
            activation,
            result: Ok(cameras()),
        });

        let close = m.step(Input::Close);
        assert_eq!(close.effects, vec![Effect::Teardown]);
        assert_eq!(m.state(), SessionState::Idle);

        let late = m.step(Input::StreamOpened {
            activation,
            result: Ok(()),
        });
        assert!(late.is_empty());
    }

    #[test]
    fn test_close_passes_through_stopping_and_stopped() {
        let mut m = machine();
        open_and_decode(&mut m, cameras());

        let step = m.step(Input::Close);
        let states: Vec<SessionState> = step.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![
                SessionState::Stopping,
                SessionState::Stopped,
                SessionState::Idle
            ]
        );
        assert!(m.session_id().is_none());
    }

    #[test]
    fn test_only_allowed_symbology_is_accepted() {
        let mut m = machine_with(SymbologyFilter::only([Symbology::Code128]));
        open_and_decode(&mut m, cameras());
        let activation = m.activation();
        let session_id = m.session_id();

        let ignored = m.step(Input::Frame {
            activation,
            outcome: decoded("4006381333931", Symbology::Ean13),
        });
        assert!(ignored.is_empty());
        assert_eq!(m.state(), SessionState::Decoding);

        let accepted = m.step(Input::Frame {
            activation,
            outcome: decoded("PROD123", Symbology::Code128),
        });
        assert_eq!(m.state(), SessionState::Idle);
        assert_eq!(accepted.effects[0], Effect::Teardown);
        match &accepted.effects[1] {
            Effect::DeliverResult(result) => {
                assert_eq!(result.text, "PROD123");
                assert_eq!(result.symbology, Symbology::Code128);
                assert_eq!(Some(result.session_id), session_id);
                assert_eq!(result.camera.as_deref(), Some("Back Camera"));
                assert_eq!(result.device_id.as_deref(), Some("/dev/video2"));
            }
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[test]
    fn test_no_second_result_from_same_activation() {
        let mut m = machine();
        open_and_decode(&mut m, cameras());
        let activation = m.activation();

        m.step(Input::Frame {
            activation,
            outcome: decoded("first", Symbology::QrCode),
        });
        let again = m.step(Input::Frame {
            activation,
            outcome: decoded("second", Symbology::QrCode),
        });
        assert!(again.is_empty());
    }

    #[test]
    fn test_not_found_never_changes_state() {
        let mut m = machine();
        open_and_decode(&mut m, cameras());
        let step = m.step(Input::Frame {
            activation: m.activation(),
            outcome: FrameOutcome::NotFound,
        });
        assert!(step.is_empty());
        assert_eq!(m.state(), SessionState::Decoding);
    }

    #[test]
    fn test_switch_with_single_camera_is_noop() {
        let mut m = machine();
        open_and_decode(&mut m, vec![CameraDevice::new("Webcam", "/dev/video0")]);
        let activation = m.activation();

        assert!(m.step(Input::SwitchCamera).is_empty());
        assert_eq!(m.state(), SessionState::Decoding);
        assert_eq!(m.activation(), activation);
    }

    #[test]
    fn test_switch_advances_index_and_settles() {
        let mut m = machine();
        open_and_decode(&mut m, cameras());

        let step = m.step(Input::SwitchCamera);
        assert_eq!(m.state(), SessionState::SwitchingDevice);
        assert_eq!(m.current_index(), Some(0));
        assert_eq!(
            step.effects,
            vec![
                Effect::Teardown,
                Effect::AwaitSettle {
                    activation: m.activation(),
                    released_device: Some("/dev/video2".into()),
                }
            ]
        );

        let resumed = m.step(Input::Settled {
            activation: m.activation(),
        });
        assert_eq!(m.state(), SessionState::Acquiring);
        assert!(matches!(resumed.effects[..], [Effect::ListDevices { .. }]));

        acquire(&mut m, cameras());
        assert_eq!(m.state(), SessionState::Decoding);
        assert_eq!(m.current_index(), Some(0));
        assert_eq!(m.remembered_device(), Some("/dev/video0"));
    }

    #[test]
    fn test_rapid_switches_coalesce() {
        let mut m = machine();
        open_and_decode(&mut m, cameras());

        m.step(Input::SwitchCamera);
        assert!(m.step(Input::SwitchCamera).effects.is_empty());
        assert!(m.step(Input::SwitchCamera).effects.is_empty());
        assert!(m.switcher().queued());

        m.step(Input::Settled {
            activation: m.activation(),
        });
        // Queued switch starts as soon as the first one is decoding
        let step = acquire(&mut m, cameras());
        assert_eq!(m.state(), SessionState::SwitchingDevice);
        let settles = step
            .effects
            .iter()
            .filter(|e| matches!(e, Effect::AwaitSettle { .. }))
            .count();
        assert_eq!(settles, 1);

        m.step(Input::Settled {
            activation: m.activation(),
        });
        let step = acquire(&mut m, cameras());
        assert_eq!(m.state(), SessionState::Decoding);
        assert!(
            !step
                .effects
                .iter()
                .any(|e| matches!(e, Effect::AwaitSettle { .. }))
        );
        assert_eq!(m.current_index(), Some(1));
    }

    #[test]
    fn test_stale_settle_is_ignored() {
        let mut m = machine();
        open_and_decode(&mut m, cameras());
        m.step(Input::SwitchCamera);
        let switching = m.activation();
        m.step(Input::Close);

        assert!(
            m.step(Input::Settled {
                activation: switching
            })
            .is_empty()
        );
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[test]
    fn test_permission_denied_reports_once_and_retry_reacquires() {
        let mut m = machine();
        m.step(Input::Open(None));
        let first = m.activation();
        m.step(Input::DevicesListed {
            activation: first,
            result: Ok(cameras()),
        });

        let step = m.step(Input::StreamOpened {
            activation: first,
            result: Err(ScanError::PermissionDenied("EACCES".into())),
        });
        assert_eq!(m.state(), SessionState::Failed);
        assert_eq!(reported_errors(&step), 1);

        let retry = m.step(Input::Retry);
        assert_eq!(m.state(), SessionState::Acquiring);
        assert_eq!(retry.effects[0], Effect::Teardown);
        assert!(matches!(retry.effects[1], Effect::ListDevices { .. }));
        assert!(m.activation() > first);
        // The error stays visible until a start succeeds
        assert!(m.last_error().is_some());

        acquire(&mut m, cameras());
        assert!(m.last_error().is_none());
    }

    #[test]
    fn test_retry_after_missing_explicit_device_uses_facing() {
        let mut m = machine();
        m.step(Input::Open(Some(DeviceSelector::Device("/dev/video9".into()))));
        let activation = m.activation();
        m.step(Input::DevicesListed {
            activation,
            result: Ok(cameras()),
        });
        assert!(matches!(
            m.last_error(),
            Some(ScanError::DeviceUnavailable(_))
        ));

        m.step(Input::Retry);
        let step = m.step(Input::DevicesListed {
            activation: m.activation(),
            result: Ok(cameras()),
        });
        match &step.effects[..] {
            [Effect::OpenStream { request, .. }] => {
                assert_eq!(request.device.path, "/dev/video2");
            }
            other => panic!("unexpected effects: {:?}", other),
        }
    }

    #[test]
    fn test_sink_detached_cancels_silently() {
        let mut m = machine();
        m.step(Input::Open(None));
        let activation = m.activation();
        m.step(Input::DevicesListed {
            activation,
            result: Ok(cameras()),
        });
        m.step(Input::StreamOpened {
            activation,
            result: Ok(()),
        });

        let step = m.step(Input::SinkPlaying {
            activation,
            result: Err(ScanError::SinkDetached),
        });
        assert_eq!(m.state(), SessionState::Idle);
        assert_eq!(step.effects, vec![Effect::Teardown]);
        assert!(m.last_error().is_none());
    }

    #[test]
    fn test_close_from_failed_settles_idle() {
        let mut m = machine();
        m.step(Input::Open(None));
        m.step(Input::DevicesListed {
            activation: m.activation(),
            result: Err(ScanError::PermissionDenied("denied".into())),
        });
        assert_eq!(m.state(), SessionState::Failed);

        let step = m.step(Input::Close);
        assert_eq!(m.state(), SessionState::Idle);
        assert_eq!(
            step.transitions,
            vec![Transition {
                from: SessionState::Failed,
                to: SessionState::Idle
            }]
        );
    }

    #[test]
    fn test_teardown_from_idle_still_releases() {
        let mut m = machine();
        assert_eq!(m.step(Input::Teardown).effects, vec![Effect::Teardown]);
    }

    #[test]
    fn test_noise_from_acquisition_fails_as_unavailable() {
        let mut m = machine();
        m.step(Input::Open(None));
        let activation = m.activation();
        m.step(Input::DevicesListed {
            activation,
            result: Ok(cameras()),
        });

        let step = m.step(Input::StreamOpened {
            activation,
            result: Err(ScanError::TransientDecodeNoise),
        });
        assert_eq!(m.state(), SessionState::Failed);
        assert_eq!(m.phase(), None);
        assert_eq!(step.effects[0], Effect::Teardown);
        assert_eq!(reported_errors(&step), 1);
        assert!(matches!(
            m.last_error(),
            Some(ScanError::DeviceUnavailable(_))
        ));
    }

    /// Device the step asks to open, if any
    fn opened_device(step: &Step) -> Option<String> {
        step.effects.iter().find_map(|e| match e {
            Effect::OpenStream { request, .. } => Some(request.device.path.clone()),
            _ => None,
        })
    }

    #[test]
    fn test_retry_moves_off_unavailable_remembered_camera() {
        let mut m = SessionMachine::new(MachineConfig {
            remembered_device: Some("/dev/video0".into()),
            ..MachineConfig::default()
        });
        m.step(Input::Open(None));

        let mut attempts = Vec::new();
        for attempt in 0..3 {
            if attempt > 0 {
                m.step(Input::Retry);
            }
            let activation = m.activation();
            let listed = m.step(Input::DevicesListed {
                activation,
                result: Ok(cameras()),
            });
            let device = opened_device(&listed);
            m.step(Input::StreamOpened {
                activation,
                result: Err(ScanError::DeviceUnavailable(format!("{:?} busy", device))),
            });
            assert_eq!(m.state(), SessionState::Failed);
            attempts.push(device);
        }

        // Alternates between the two cameras instead of hammering the busy one
        assert_eq!(
            attempts,
            vec![
                Some("/dev/video0".to_string()),
                Some("/dev/video2".to_string()),
                Some("/dev/video0".to_string()),
            ]
        );
        assert_ne!(m.remembered_device(), Some("/dev/video2"));
    }

    #[test]
    fn test_retry_recovers_on_other_camera_and_remembers_it() {
        let mut m = SessionMachine::new(MachineConfig {
            remembered_device: Some("/dev/video0".into()),
            ..MachineConfig::default()
        });
        m.step(Input::Open(None));
        let activation = m.activation();
        m.step(Input::DevicesListed {
            activation,
            result: Ok(cameras()),
        });
        m.step(Input::StreamOpened {
            activation,
            result: Err(ScanError::DeviceUnavailable("busy".into())),
        });
        assert_eq!(m.remembered_device(), Some("/dev/video0"));

        m.step(Input::Retry);
        assert_eq!(m.remembered_device(), None);
        acquire(&mut m, cameras());

        assert_eq!(m.state(), SessionState::Decoding);
        assert_eq!(m.current_index(), Some(1));
        assert_eq!(m.remembered_device(), Some("/dev/video2"));
    }

    #[test]
    fn test_retry_after_permission_denied_keeps_camera() {
        let mut m = SessionMachine::new(MachineConfig {
            remembered_device: Some("/dev/video0".into()),
            ..MachineConfig::default()
        });
        m.step(Input::Open(None));
        let activation = m.activation();
        m.step(Input::DevicesListed {
            activation,
            result: Ok(cameras()),
        });
        m.step(Input::StreamOpened {
            activation,
            result: Err(ScanError::PermissionDenied("EACCES".into())),
        });

        m.step(Input::Retry);
        let listed = m.step(Input::DevicesListed {
            activation: m.activation(),
            result: Ok(cameras()),
        });
        assert_eq!(opened_device(&listed).as_deref(), Some("/dev/video0"));
    }

    #[test]
    fn test_retry_while_acquiring_is_ignored() {
        let mut m = machine();
        m.step(Input::Open(None));
        let activation = m.activation();

        assert!(m.step(Input::Retry).is_empty());
        assert_eq!(m.activation(), activation);
    }

    #[test]
    fn test_switch_during_first_acquisition_is_ignored() {
        let mut m = machine();
        m.step(Input::Open(None));

        let step = m.step(Input::SwitchCamera);
        assert!(step.is_empty());
        assert!(!m.switcher().queued());

        let step = acquire(&mut m, cameras());
        assert_eq!(m.state(), SessionState::Decoding);
        assert!(
            !step
                .effects
                .iter()
                .any(|e| matches!(e, Effect::AwaitSettle { .. }))
        );
        assert_eq!(m.current_index(), Some(1));
    }

    #[test]
    fn test_switch_during_switch_acquisition_is_queued() {
        let mut m = machine();
        open_and_decode(&mut m, cameras());
        m.step(Input::SwitchCamera);
        m.step(Input::Settled {
            activation: m.activation(),
        });
        assert_eq!(m.state(), SessionState::Acquiring);

        assert!(m.step(Input::SwitchCamera).is_empty());
        assert!(m.switcher().queued());
    }

    #[test]
    fn test_remembered_device_is_reused() {
        let mut m = SessionMachine::new(MachineConfig {
            remembered_device: Some("/dev/video0".into()),
            ..MachineConfig::default()
        });
        open_and_decode(&mut m, cameras());
        assert_eq!(m.current_index(), Some(0));
    }
}
