//! Device allowlist and `/proc/devices` driver-major cache (§4.6).
//!
//! The original's `IDobbyUtils::deviceAllowed(dev_t)` is a pure query over a
//! `major,minor` pair; its concrete policy table lives outside the files this
//! core was distilled from (only the query interface and the
//! `getDriverMajorNumber(driverName)` /proc/devices parser are present). This
//! module reproduces both of those query surfaces and keeps the allow-set as
//! data the config pipeline populates per container from `devices[]` spec
//! entries and `HardwareAccessSettings::deviceNodes`, rather than inventing a
//! fixed table that never existed in the source this was built from.

use std::collections::HashMap;
use std::fs;
use std::sync::RwLock;

use common::{DeviceAllowlist as DeviceAllowlistTrait, EngineError, Result};
use nix::sys::stat::makedev;

/// `/proc/devices` driver-name -> major-number cache, refreshed on demand.
///
/// Doesn't handle `misc` devices (listed separately under `/proc/misc`),
/// matching the original's documented limitation.
#[derive(Debug, Default)]
pub struct DriverMajorCache {
    majors: RwLock<HashMap<String, u32>>,
}

impl DriverMajorCache {
    pub fn new() -> Self {
        Self { majors: RwLock::new(HashMap::new()) }
    }

    /// Returns the major number assigned to `driver_name`, or `0` if not
    /// found, matching `getDriverMajorNumber`'s no-exception return value.
    pub fn driver_major(&self, driver_name: &str) -> u32 {
        if let Some(major) = self.majors.read().unwrap().get(driver_name) {
            return *major;
        }
        if let Err(e) = self.refresh() {
            log::warn!("failed to parse /proc/devices: {e}");
            return 0;
        }
        self.majors.read().unwrap().get(driver_name).copied().unwrap_or(0)
    }

    fn refresh(&self) -> Result<()> {
        let text = fs::read_to_string("/proc/devices").map_err(EngineError::from)?;
        let mut majors = self.majors.write().unwrap();
        majors.clear();
        // Two sections separated by a blank line ("Character devices:" /
        // "Block devices:"); both list "<major> <name>" lines.
        for line in text.lines() {
            let line = line.trim();
            let mut parts = line.splitn(2, char::is_whitespace);
            let major_str = match parts.next() {
                Some(s) => s,
                None => continue,
            };
            let name = match parts.next() {
                Some(s) => s.trim(),
                None => continue,
            };
            if let Ok(major) = major_str.parse::<u32>() {
                majors.insert(name.to_string(), major);
            }
        }
        Ok(())
    }
}

/// Per-daemon allowlist of `(major, minor)` device nodes permitted into any
/// container, populated by the config pipeline from spec `devices[]`
/// entries and the hardware-access settings' device node lists. Bundles the
/// `/proc/devices` cache too, since `common::DeviceAllowlist` is the single
/// seam `oci-config` sees for both concerns.
#[derive(Debug, Default)]
pub struct DeviceAllowlist {
    allowed: RwLock<std::collections::HashSet<u64>>,
    majors: DriverMajorCache,
}

impl DeviceAllowlist {
    pub fn new() -> Self {
        Self {
            allowed: RwLock::new(std::collections::HashSet::new()),
            majors: DriverMajorCache::new(),
        }
    }

    /// Grants access to `major,minor`. Idempotent.
    pub fn allow(&self, major: u32, minor: u32) {
        self.allowed.write().unwrap().insert(makedev(major, minor));
    }

    pub fn allow_dev(&self, dev: u64) {
        self.allowed.write().unwrap().insert(dev);
    }
}

impl DeviceAllowlistTrait for DeviceAllowlist {
    fn is_allowed(&self, major: u32, minor: u32) -> bool {
        self.allowed.read().unwrap().contains(&makedev(major, minor))
    }

    fn resolve_major(&self, driver_name: &str) -> Option<u32> {
        match self.majors.driver_major(driver_name) {
            0 => None,
            major => Some(major),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_major_parses_proc_devices_format() {
        let cache = DriverMajorCache::new();
        // Can't control the test host's /proc/devices, but a nonexistent
        // driver name must always resolve to 0, never panic.
        assert_eq!(cache.driver_major("definitely-not-a-real-driver-xyz"), 0);
    }

    #[test]
    fn allowlist_allows_only_registered_pairs() {
        let allowlist = DeviceAllowlist::new();
        assert!(!allowlist.is_allowed(1, 3));
        allowlist.allow(1, 3);
        assert!(allowlist.is_allowed(1, 3));
        assert!(!allowlist.is_allowed(1, 5));
    }
}
