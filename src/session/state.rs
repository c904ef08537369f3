// SPDX-License-Identifier: GPL-3.0-only

//! Session identity, state and the observable snapshot

use crate::errors::ScanError;
use crate::frame_processor::Symbology;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a scan session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SessionState {
    #[default]
    Idle,
    Acquiring,
    Decoding,
    SwitchingDevice,
    Stopping,
    Stopped,
    Failed,
}

impl SessionState {
    /// States in which a session holds or is obtaining a device
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Acquiring | SessionState::Decoding | SessionState::SwitchingDevice
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Acquiring => "acquiring",
            SessionState::Decoding => "decoding",
            SessionState::SwitchingDevice => "switching-device",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Step within [`SessionState::Acquiring`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquirePhase {
    ListingDevices,
    OpeningStream,
    AttachingSink,
    StartingDecoder,
}

/// Token identifying which activation issued an asynchronous request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Activation(u64);

impl Activation {
    pub fn next(self) -> Self {
        Activation(self.0 + 1)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Unique id of one host-level session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A decode accepted by the session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    pub text: String,
    pub symbology: Symbology,
    pub session_id: SessionId,
    /// Label of the camera that produced the frame
    pub camera: Option<String>,
    /// Id of that camera, for asking for it again
    pub device_id: Option<String>,
    pub scanned_at: DateTime<Local>,
}

/// What a host can observe about the session at any time
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session_id: Option<SessionId>,
    pub available_camera_count: usize,
    pub current_camera_label: Option<String>,
    pub last_error: Option<ScanError>,
}
