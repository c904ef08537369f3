// SPDX-License-Identifier: GPL-3.0-only

//! Scan session lifecycle
//!
//! - [`machine`]: pure transition function over session inputs
//! - [`controller`]: the task that executes the machine's effects
//! - [`resources`]: ordered, idempotent release of stream and decoder
//! - [`switcher`]: camera switch coalescing and settle waits
//! - [`sink`]: the preview surface streams render into
//! - [`host`]: where results and errors are delivered

pub mod controller;
pub mod host;
pub mod machine;
pub mod resources;
pub mod sink;
pub mod state;
pub mod switcher;

pub use controller::{ControllerConfig, ScanSessionController};
pub use host::{HostEvent, SessionHost};
pub use machine::{Effect, Input, MachineConfig, SessionMachine, Step, Transition};
pub use sink::{FrameSink, SinkFrame};
pub use state::{AcquirePhase, Activation, ScanResult, SessionId, SessionSnapshot, SessionState};
pub use switcher::{SettlePolicy, SwitchCoordinator};
