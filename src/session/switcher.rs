// SPDX-License-Identifier: GPL-3.0-only

//! Camera switch serialization and the settle wait between devices

use super::state::Activation;
use crate::backends::camera::CaptureDeviceProvider;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Tracks at most one in-flight switch and one queued follow-up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchCoordinator {
    in_flight: bool,
    queued: bool,
}

impl SwitchCoordinator {
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn queued(&self) -> bool {
        self.queued
    }

    pub fn begin(&mut self) {
        self.in_flight = true;
    }

    /// Remember that another switch was asked for. Repeated requests
    /// collapse into one.
    pub fn queue(&mut self) {
        if self.queued {
            debug!("Switch already queued, coalescing request");
        }
        self.queued = true;
    }

    /// The in-flight switch reached decoding. Returns whether a queued
    /// switch should run now.
    pub fn complete(&mut self) -> bool {
        self.in_flight = false;
        std::mem::take(&mut self.queued)
    }

    /// Forget everything, e.g. on close or failure
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Timing for the pause between releasing one device and opening the next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    pub settle_delay: Duration,
    pub poll_interval: Duration,
    pub release_timeout: Duration,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        use crate::constants::timing;
        Self {
            settle_delay: timing::SETTLE_DELAY,
            poll_interval: timing::RELEASE_POLL_INTERVAL,
            release_timeout: timing::RELEASE_TIMEOUT,
        }
    }
}

/// Wait until `released_device` can be opened again
///
/// Polls the provider when it can confirm releases, otherwise sleeps the
/// fixed settle delay.
pub async fn wait_for_settle(
    provider: &dyn CaptureDeviceProvider,
    released_device: Option<&str>,
    policy: SettlePolicy,
    activation: Activation,
) {
    let device = match released_device {
        Some(device) if provider.supports_release_probe() => device,
        _ => {
            debug!(%activation, delay_ms = policy.settle_delay.as_millis(), "Settling after release");
            tokio::time::sleep(policy.settle_delay).await;
            return;
        }
    };

    let deadline = Instant::now() + policy.release_timeout;
    loop {
        if provider.is_released(device).await {
            debug!(%activation, device, "Device released");
            return;
        }
        if Instant::now() >= deadline {
            warn!(%activation, device, "Device not released before timeout, continuing");
            return;
        }
        tokio::time::sleep(policy.poll_interval).await;
    }
}
