// SPDX-License-Identifier: GPL-3.0-only

//! Choosing a camera from an enumeration

use super::types::{CameraDevice, DeviceSelector};
use crate::errors::ScanError;
use tracing::debug;

/// Pick the index of the device to open
///
/// Order of preference:
/// 1. the explicitly requested device id (missing is an error)
/// 2. the remembered device, if it is still present
/// 3. a device whose location or label matches the requested facing
/// 4. the first device
///
/// `avoid` names a device that just failed to open. It is skipped in steps
/// 2 to 4 as long as any other device is enumerated.
pub fn select_device(
    devices: &[CameraDevice],
    selector: &DeviceSelector,
    remembered: Option<&str>,
    avoid: Option<&str>,
) -> Result<usize, ScanError> {
    if devices.is_empty() {
        return Err(ScanError::DeviceUnavailable("no cameras found".into()));
    }

    if let DeviceSelector::Device(id) = selector {
        return devices
            .iter()
            .position(|d| d.id() == id)
            .ok_or_else(|| ScanError::DeviceUnavailable(format!("camera {} not found", id)));
    }

    let usable = |d: &CameraDevice| avoid != Some(d.id());

    if let Some(remembered) = remembered
        && let Some(index) = devices.iter().position(|d| d.id() == remembered && usable(d))
    {
        debug!(device = remembered, "Reusing remembered camera");
        return Ok(index);
    }

    let facing = selector.facing();
    if let Some(index) = devices
        .iter()
        .position(|d| usable(d) && d.facing_hint() == Some(facing))
    {
        debug!(device = %devices[index].path, %facing, "Selected camera by facing");
        return Ok(index);
    }

    if let Some(avoid) = avoid {
        if let Some(index) = devices.iter().position(usable) {
            debug!(failed = avoid, device = %devices[index].path, "Falling back to another camera");
            return Ok(index);
        }
        debug!(device = avoid, "No other camera to fall back to");
    }

    Ok(0)
}
