//! Device selection on a chosen platform.

use tracing::debug;

use ts_common::{ClDriver, DeviceClass, DeviceHandle, PlatformHandle};

/// First enumerated device of `class` on `platform`, or `None` when the
/// platform has no such device.
pub fn default_device(
    driver: &dyn ClDriver,
    platform: PlatformHandle,
    class: DeviceClass,
) -> Option<DeviceHandle> {
    let devices = match driver.device_ids(platform, class) {
        Ok(devices) => devices,
        Err(status) => {
            debug!(class = class.as_str(), error = %status, "Device query failed");
            return None;
        }
    };

    let device = devices.first().copied()?;
    debug!(
        class = class.as_str(),
        count = devices.len(),
        device = %driver.device_name(device).unwrap_or_default(),
        "Selected compute device"
    );
    Some(device)
}
