//! Platform selection with optional vendor and name filters.

use tracing::debug;

use ts_common::{ClDriver, ComputeConfig, PlatformHandle};

/// Vendor and name of one enumerated platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformInfo {
    pub handle: PlatformHandle,
    pub vendor: String,
    pub name: String,
}

/// Return the first candidate whose vendor contains `vendor_pattern` and whose
/// name contains `name_pattern`. A missing pattern matches everything.
pub fn select_platform(
    driver: &dyn ClDriver,
    candidates: &[PlatformHandle],
    vendor_pattern: Option<&str>,
    name_pattern: Option<&str>,
) -> Option<PlatformHandle> {
    candidates.iter().copied().find(|&platform| {
        let vendor = driver.platform_vendor(platform).unwrap_or_default();
        let name = driver.platform_name(platform).unwrap_or_default();
        let matched = vendor_pattern.map_or(true, |p| vendor.contains(p))
            && name_pattern.map_or(true, |p| name.contains(p));
        if matched {
            debug!(platform = platform.raw(), %vendor, %name, "Selected compute platform");
        }
        matched
    })
}

/// Enumerate every platform and pick one using the configured filters.
///
/// `None` means the compute path is unavailable; it is not an error.
pub fn default_platform(driver: &dyn ClDriver, config: &ComputeConfig) -> Option<PlatformHandle> {
    let platforms = match driver.platforms() {
        Ok(platforms) => platforms,
        Err(status) => {
            debug!(error = %status, "Platform enumeration failed");
            return None;
        }
    };
    if platforms.is_empty() {
        debug!("No compute platforms installed");
        return None;
    }

    let vendor = config.platform_vendor.as_deref();
    let name = config.platform_name.as_deref();
    let selected = select_platform(driver, &platforms, vendor, name);
    if selected.is_none() {
        debug!(
            available = platforms.len(),
            required_vendor = vendor.unwrap_or("<any>"),
            required_name = name.unwrap_or("<any>"),
            "All compute platforms were filtered out"
        );
    }
    selected
}

/// Vendor and name of every platform, for troubleshooting output.
pub fn describe_platforms(driver: &dyn ClDriver) -> Vec<PlatformInfo> {
    driver
        .platforms()
        .unwrap_or_default()
        .into_iter()
        .map(|handle| PlatformInfo {
            handle,
            vendor: driver.platform_vendor(handle).unwrap_or_default(),
            name: driver.platform_name(handle).unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FailPoint, FakeDriver, FakePlatform};
    use ts_common::{ClStatus, DeviceClass};

    fn two_vendors() -> FakeDriver {
        FakeDriver::new()
            .platform(
                FakePlatform::new("Intel(R) Corporation", "Intel(R) OpenCL")
                    .with_device(DeviceClass::Cpu, "Core"),
            )
            .platform(
                FakePlatform::new("Advanced Micro Devices, Inc.", "AMD Accelerated Parallel Processing")
                    .with_device(DeviceClass::Gpu, "gfx1030"),
            )
    }

    #[test]
    fn no_filters_returns_first() {
        let driver = two_vendors();
        let all = driver.platforms().unwrap();
        assert_eq!(select_platform(&driver, &all, None, None), Some(all[0]));
    }

    #[test]
    fn vendor_and_name_must_both_match() {
        let driver = two_vendors();
        let all = driver.platforms().unwrap();
        assert_eq!(
            select_platform(&driver, &all, Some("Advanced Micro"), None),
            Some(all[1])
        );
        assert_eq!(
            select_platform(&driver, &all, Some("Advanced Micro"), Some("Intel")),
            None
        );
        assert_eq!(
            select_platform(&driver, &all, None, Some("Intel(R) OpenCL")),
            Some(all[0])
        );
    }

    #[test]
    fn unmatched_vendor_returns_none() {
        let driver = two_vendors();
        let all = driver.platforms().unwrap();
        assert_eq!(select_platform(&driver, &all, Some("NVIDIA"), None), None);
        assert_eq!(select_platform(&driver, &[], None, None), None);
    }

    #[test]
    fn selection_is_deterministic() {
        let driver = two_vendors();
        let config = ComputeConfig {
            platform_vendor: Some("Advanced".into()),
            ..ComputeConfig::enabled()
        };
        let first = default_platform(&driver, &config);
        let second = default_platform(&driver, &config);
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn default_platform_unavailable_cases() {
        let empty = FakeDriver::new();
        assert_eq!(default_platform(&empty, &ComputeConfig::enabled()), None);

        let broken = two_vendors().fail_at(FailPoint::Platforms, ClStatus::PLATFORM_NOT_FOUND_KHR);
        assert_eq!(default_platform(&broken, &ComputeConfig::enabled()), None);

        let filtered = ComputeConfig {
            platform_name: Some("CUDA".into()),
            ..ComputeConfig::enabled()
        };
        assert_eq!(default_platform(&two_vendors(), &filtered), None);
    }

    #[test]
    fn describe_lists_every_platform() {
        let info = describe_platforms(&two_vendors());
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].vendor, "Intel(R) Corporation");
        assert_eq!(info[1].name, "AMD Accelerated Parallel Processing");
    }
}
