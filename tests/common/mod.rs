// SPDX-License-Identifier: GPL-3.0-only

//! Scriptable provider, decoder and host for driving a controller in tests

#![allow(dead_code)]

use async_trait::async_trait;
use camera_scanner::backends::camera::types::{
    BackendError, BackendResult, CameraBackendType, CameraDevice, CameraFrame, PixelFormat,
    StreamId, StreamRequest,
};
use camera_scanner::backends::camera::{CaptureDeviceProvider, CaptureStream};
use camera_scanner::errors::ScanError;
use camera_scanner::frame_processor::{
    DecodeHandle, DecodeOptions, Decoded, DecoderError, FrameCallback, FrameDecoder, FrameOutcome,
    Symbology, SymbologyFilter,
};
use camera_scanner::session::{
    ControllerConfig, FrameSink, HostEvent, ScanResult, ScanSessionController, SessionHost,
    SessionSnapshot, SessionState, SettlePolicy,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};

pub const WAIT: Duration = Duration::from_secs(2);

pub fn camera(name: &str, path: &str) -> CameraDevice {
    CameraDevice::new(name, path)
}

pub fn front_and_back() -> Vec<CameraDevice> {
    vec![
        camera("Integrated Front Camera", "/dev/video0"),
        camera("Back Camera", "/dev/video1"),
    ]
}

/// What happened to devices, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Opened(String),
    Released(String),
}

#[derive(Default)]
pub struct DeviceLog {
    opened: AtomicUsize,
    released: AtomicUsize,
    max_live: AtomicUsize,
    events: Mutex<Vec<(Instant, DeviceEvent)>>,
}

impl DeviceLog {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.opened() - self.released()
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn timed_events(&self) -> Vec<(Instant, DeviceEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn opened_devices(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DeviceEvent::Opened(device) => Some(device),
                DeviceEvent::Released(_) => None,
            })
            .collect()
    }

    fn record_open(&self, device: &str) {
        let live = self.opened.fetch_add(1, Ordering::SeqCst) + 1 - self.released();
        self.max_live.fetch_max(live, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push((Instant::now(), DeviceEvent::Opened(device.to_string())));
    }

    fn record_release(&self, device: &str) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push((Instant::now(), DeviceEvent::Released(device.to_string())));
    }
}

fn test_frame() -> Arc<CameraFrame> {
    Arc::new(CameraFrame::packed(
        2,
        2,
        PixelFormat::Gray8,
        Arc::from(vec![128u8; 4].into_boxed_slice()),
    ))
}

pub struct MockStream {
    id: StreamId,
    device: String,
    log: Arc<DeviceLog>,
    attached: Option<FrameSink>,
}

impl CaptureStream for MockStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn device_id(&self) -> &str {
        &self.device
    }

    fn attach(&mut self, sink: &FrameSink) -> BackendResult<()> {
        sink.set_source(self.id)?;
        sink.publish(self.id, test_frame());
        self.attached = Some(sink.clone());
        Ok(())
    }

    fn detach(&mut self) -> BackendResult<()> {
        self.attached = None;
        Ok(())
    }

    fn stop_tracks(&mut self) -> BackendResult<()> {
        Ok(())
    }

    fn release(self: Box<Self>) -> BackendResult<()> {
        self.log.record_release(&self.device);
        Ok(())
    }
}

/// Provider backed by a fixed device list
pub struct MockProvider {
    devices: Mutex<Vec<CameraDevice>>,
    open_error: Mutex<Option<BackendError>>,
    device_errors: Mutex<Vec<(String, BackendError)>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    pending_opens: AtomicUsize,
    release_probe: bool,
    probes: AtomicUsize,
    pub log: Arc<DeviceLog>,
}

impl MockProvider {
    pub fn new(devices: Vec<CameraDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
            open_error: Mutex::new(None),
            device_errors: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
            pending_opens: AtomicUsize::new(0),
            release_probe: false,
            probes: AtomicUsize::new(0),
            log: Arc::new(DeviceLog::default()),
        }
    }

    pub fn with_release_probe(mut self) -> Self {
        self.release_probe = true;
        self
    }

    /// Every following open fails with `error` until cleared
    pub fn fail_opens_with(&self, error: Option<BackendError>) {
        *self.open_error.lock().unwrap() = error;
    }

    /// Opens of `device` fail with `error`; other devices open normally
    pub fn fail_device(&self, device: &str, error: BackendError) {
        self.device_errors
            .lock()
            .unwrap()
            .push((device.to_string(), error));
    }

    /// The next open waits until the returned sender fires or is dropped
    pub fn hold_next_open(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn pending_opens(&self) -> usize {
        self.pending_opens.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureDeviceProvider for MockProvider {
    async fn list_devices(&self) -> BackendResult<Vec<CameraDevice>> {
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn open_stream(&self, request: &StreamRequest) -> BackendResult<Box<dyn CaptureStream>> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            self.pending_opens.fetch_add(1, Ordering::SeqCst);
            let _ = gate.await;
            self.pending_opens.fetch_sub(1, Ordering::SeqCst);
        }

        if let Some(error) = self.open_error.lock().unwrap().clone() {
            return Err(error);
        }

        let device = request.device.id().to_string();
        let device_error = self
            .device_errors
            .lock()
            .unwrap()
            .iter()
            .find(|(failing, _)| *failing == device)
            .map(|(_, error)| error.clone());
        if let Some(error) = device_error {
            return Err(error);
        }

        self.log.record_open(&device);
        Ok(Box::new(MockStream {
            id: StreamId::next(),
            device,
            log: Arc::clone(&self.log),
            attached: None,
        }))
    }

    fn supports_release_probe(&self) -> bool {
        self.release_probe
    }

    async fn is_released(&self, device_id: &str) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let opened = self
            .log
            .events()
            .iter()
            .filter(|e| **e == DeviceEvent::Opened(device_id.to_string()))
            .count();
        let released = self
            .log
            .events()
            .iter()
            .filter(|e| **e == DeviceEvent::Released(device_id.to_string()))
            .count();
        opened == released
    }

    fn backend_type(&self) -> CameraBackendType {
        CameraBackendType::Virtual
    }
}

type CallbackSlot = Arc<Mutex<Option<(u64, FrameCallback)>>>;

/// Decoder whose frames are pushed by the test
pub struct ScriptedDecoder {
    slot: CallbackSlot,
    generation: Arc<AtomicU64>,
    starts: Arc<AtomicUsize>,
    configured: Arc<Mutex<Option<SymbologyFilter>>>,
}

/// Test-side handle to a [`ScriptedDecoder`]
#[derive(Clone)]
pub struct DecoderProbe {
    slot: CallbackSlot,
    starts: Arc<AtomicUsize>,
    configured: Arc<Mutex<Option<SymbologyFilter>>>,
}

impl ScriptedDecoder {
    pub fn new() -> (Self, DecoderProbe) {
        let slot = CallbackSlot::default();
        let starts = Arc::new(AtomicUsize::new(0));
        let configured = Arc::new(Mutex::new(None));
        let probe = DecoderProbe {
            slot: Arc::clone(&slot),
            starts: Arc::clone(&starts),
            configured: Arc::clone(&configured),
        };
        (
            Self {
                slot,
                generation: Arc::new(AtomicU64::new(0)),
                starts,
                configured,
            },
            probe,
        )
    }
}

impl FrameDecoder for ScriptedDecoder {
    fn configure(&mut self, symbologies: &SymbologyFilter, _options: DecodeOptions) {
        *self.configured.lock().unwrap() = Some(symbologies.clone());
    }

    fn start(
        &self,
        sink: &FrameSink,
        on_frame: FrameCallback,
    ) -> Result<Box<dyn DecodeHandle>, DecoderError> {
        if sink.source().is_none() {
            return Err(DecoderError::SinkUnattached);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        *self.slot.lock().unwrap() = Some((generation, on_frame));
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedHandle {
            slot: Arc::clone(&self.slot),
            generation,
            stopped: false,
        }))
    }
}

struct ScriptedHandle {
    slot: CallbackSlot,
    generation: u64,
    stopped: bool,
}

impl DecodeHandle for ScriptedHandle {
    fn stop(&mut self) {
        self.stopped = true;
        let mut slot = self.slot.lock().unwrap();
        if slot.as_ref().is_some_and(|(g, _)| *g == self.generation) {
            *slot = None;
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl DecoderProbe {
    /// Report a frame outcome; false when no decode loop is running
    pub fn emit(&self, outcome: FrameOutcome) -> bool {
        match self.slot.lock().unwrap().as_mut() {
            Some((_, callback)) => {
                callback(outcome);
                true
            }
            None => false,
        }
    }

    pub fn emit_code(&self, text: &str, symbology: Symbology) -> bool {
        self.emit(FrameOutcome::Decoded(Decoded::new(text, symbology)))
    }

    pub fn is_running(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn configured(&self) -> Option<SymbologyFilter> {
        self.configured.lock().unwrap().clone()
    }
}

/// What the host saw when a result arrived
#[derive(Debug, Clone)]
pub struct ResultObservation {
    pub result: ScanResult,
    pub state: Option<SessionState>,
    pub live_streams: usize,
}

/// Host recording every callback
pub struct RecordingHost {
    log: Arc<DeviceLog>,
    snapshot: OnceLock<watch::Receiver<SessionSnapshot>>,
    results: Mutex<Vec<ResultObservation>>,
    errors: Mutex<Vec<ScanError>>,
}

impl RecordingHost {
    pub fn new(log: Arc<DeviceLog>) -> Self {
        Self {
            log,
            snapshot: OnceLock::new(),
            results: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn results(&self) -> Vec<ResultObservation> {
        self.results.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<ScanError> {
        self.errors.lock().unwrap().clone()
    }

    pub fn events(&self) -> usize {
        self.results.lock().unwrap().len() + self.errors.lock().unwrap().len()
    }
}

impl SessionHost for RecordingHost {
    fn on_result(&self, result: ScanResult) {
        let state = self.snapshot.get().map(|rx| rx.borrow().state);
        self.results.lock().unwrap().push(ResultObservation {
            result,
            state,
            live_streams: self.log.live(),
        });
    }

    fn on_error(&self, error: ScanError) {
        self.errors.lock().unwrap().push(error);
    }
}

pub fn fast_settle() -> SettlePolicy {
    SettlePolicy {
        settle_delay: Duration::from_millis(20),
        poll_interval: Duration::from_millis(5),
        release_timeout: Duration::from_millis(200),
    }
}

/// A controller wired to scriptable collaborators
pub struct Harness {
    pub controller: ScanSessionController,
    pub provider: Arc<MockProvider>,
    pub decoder: DecoderProbe,
    pub host: Arc<RecordingHost>,
    pub sink: FrameSink,
}

impl Harness {
    pub fn start(provider: MockProvider) -> Self {
        Self::start_with(provider, SymbologyFilter::Any, fast_settle())
    }

    pub fn start_with(
        provider: MockProvider,
        symbologies: SymbologyFilter,
        settle: SettlePolicy,
    ) -> Self {
        let config = ControllerConfig {
            settle,
            ..ControllerConfig::default()
        }
        .with_symbologies(symbologies);
        Self::start_with_config(provider, config)
    }

    pub fn start_with_config(provider: MockProvider, config: ControllerConfig) -> Self {
        let provider = Arc::new(provider);
        let (decoder, probe) = ScriptedDecoder::new();
        let host = Arc::new(RecordingHost::new(Arc::clone(&provider.log)));
        let sink = FrameSink::new();

        let controller = ScanSessionController::spawn(
            provider.clone(),
            Box::new(decoder),
            sink.clone(),
            host.clone(),
            config,
        );
        let _ = host.snapshot.set(controller.subscribe());

        Self {
            controller,
            provider,
            decoder: probe,
            host,
            sink,
        }
    }

    pub fn log(&self) -> &DeviceLog {
        &self.provider.log
    }

    pub fn state(&self) -> SessionState {
        self.controller.snapshot().state
    }

    /// Wait until the session reports `state`
    pub async fn wait_for_state(&self, state: SessionState) -> SessionSnapshot {
        let mut rx = self.controller.subscribe();
        let snapshot = tokio::time::timeout(WAIT, rx.wait_for(|s| s.state == state))
            .await
            .unwrap_or_else(|_| panic!("session never reached {}", state))
            .expect("controller alive")
            .clone();
        snapshot
    }

    /// Wait until the session is decoding on the camera labelled `label`
    pub async fn wait_for_camera(&self, label: &str) -> SessionSnapshot {
        let mut rx = self.controller.subscribe();
        let snapshot = tokio::time::timeout(
            WAIT,
            rx.wait_for(|s| {
                s.state == SessionState::Decoding && s.current_camera_label.as_deref() == Some(label)
            }),
        )
        .await
        .unwrap_or_else(|_| panic!("session never decoded on {}", label))
        .expect("controller alive")
        .clone();
        snapshot
    }
}

/// Poll `condition` until it holds
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {}", what);
}

/// Let spawned tasks run for a while
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub fn host_events(host: &RecordingHost) -> Vec<HostEvent> {
    let mut events: Vec<HostEvent> = host
        .results()
        .into_iter()
        .map(|o| HostEvent::Result(o.result))
        .collect();
    events.extend(host.errors().into_iter().map(HostEvent::Error));
    events
}
