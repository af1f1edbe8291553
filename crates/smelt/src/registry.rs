// DeviceRegistry — The fixed set of execution targets
//
// Built once, at engine construction, from the runtime's enumeration.
// Order is preserved: it is the deterministic tie-break for scheduling.
// After construction nothing here mutates except each device's load
// counter.

use std::collections::HashSet;
use std::sync::Arc;

use smelt_core::{Device, DeviceClass, DeviceId, DeviceInfo, EngineError};

#[derive(Debug)]
pub struct DeviceRegistry {
    devices: Vec<Arc<Device>>,
}

impl DeviceRegistry {
    /// Validate and adopt an enumeration. An empty enumeration or a
    /// duplicated id means the runtime collaborator is broken — the one
    /// fatal condition in the engine.
    pub fn new(infos: Vec<DeviceInfo>) -> Result<Self, EngineError> {
        if infos.is_empty() {
            return Err(EngineError::NoDevices);
        }
        let mut seen = HashSet::new();
        for info in &infos {
            if !seen.insert(info.id) {
                return Err(EngineError::DuplicateDevice { device: info.id });
            }
        }
        Ok(DeviceRegistry {
            devices: infos
                .into_iter()
                .map(|info| Arc::new(Device::new(info)))
                .collect(),
        })
    }

    /// All devices, in enumeration order.
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    pub fn get(&self, id: DeviceId) -> Option<&Arc<Device>> {
        self.devices.iter().find(|d| d.id() == id)
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.get(id).is_some()
    }

    /// Devices of a class, in enumeration order.
    pub fn by_class<'a>(
        &'a self,
        class: &'a DeviceClass,
    ) -> impl Iterator<Item = &'a Arc<Device>> + 'a {
        self.devices.iter().filter(move |d| d.class() == class)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
