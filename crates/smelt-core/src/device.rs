// Device — Execution targets and capability classes
//
// Devices are enumerated once, when the engine builds its registry from
// ExecutionRuntime::enumerate_devices. After that the only mutable field is
// the load counter, maintained with atomics off any lock path. Everything
// else that needs to refer to a device does so by DeviceId and resolves it
// against the registry, never by owning the device.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Identifies one execution target within the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// A capability class name (e.g. "cpu-sync", "cpu-task").
///
/// Artifacts are compiled for a class, not a device; any device of the
/// matching class can load them. The class name participates in the
/// compilation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceClass(String);

impl DeviceClass {
    pub fn new(name: impl Into<String>) -> Self {
        DeviceClass(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the runtime reports for one device during enumeration.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub class: DeviceClass,
    /// Human-readable name, e.g. "cpu-task:0".
    pub name: String,
}

/// A registry-resident device: enumeration info plus a live load counter.
#[derive(Debug)]
pub struct Device {
    info: DeviceInfo,
    load: AtomicU32,
}

impl Device {
    pub fn new(info: DeviceInfo) -> Self {
        Device {
            info,
            load: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.info.id
    }

    pub fn class(&self) -> &DeviceClass {
        &self.info.class
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Number of invocations currently executing on this device.
    pub fn load(&self) -> u32 {
        self.load.load(Ordering::Acquire)
    }
}

/// Accounts one unit of work against a device for its lifetime: increments
/// the load counter on construction, decrements on drop — every exit path.
pub struct LoadGuard {
    device: Arc<Device>,
}

impl LoadGuard {
    pub fn new(device: &Arc<Device>) -> Self {
        device.load.fetch_add(1, Ordering::AcqRel);
        LoadGuard {
            device: Arc::clone(device),
        }
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.device.load.fetch_sub(1, Ordering::AcqRel);
    }
}
