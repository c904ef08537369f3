// SPDX-License-Identifier: GPL-3.0-only

//! The host side of a session: where results and errors go

use super::state::ScanResult;
use crate::errors::ScanError;
use tokio::sync::mpsc;
use tracing::debug;

/// Receiver of session outcomes
///
/// Called from the controller task. Implementations must not block.
pub trait SessionHost: Send + Sync {
    /// Exactly once per accepted decode, after the device was released
    fn on_result(&self, result: ScanResult);

    /// Once per failed acquisition attempt
    fn on_error(&self, error: ScanError);
}

/// Session outcome as a message
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Result(ScanResult),
    Error(ScanError),
}

impl SessionHost for mpsc::UnboundedSender<HostEvent> {
    fn on_result(&self, result: ScanResult) {
        if self.send(HostEvent::Result(result)).is_err() {
            debug!("Host receiver dropped, result discarded");
        }
    }

    fn on_error(&self, error: ScanError) {
        if self.send(HostEvent::Error(error)).is_err() {
            debug!("Host receiver dropped, error discarded");
        }
    }
}
