// DeviceScheduler — Per-session placement and module lifetime
//
// Selection: least-loaded device of the required class, ties broken by
// registry order, so a quiet system schedules reproducibly.
//
// Loaded modules belong to exactly one session. Two sessions wanting the
// same artifact on the same device each pay their own load — isolation
// over sharing. Within a session, get_or_load is idempotent per
// (artifact, device) pair.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use smelt_core::{
    ArtifactId, CompiledArtifact, Device, DeviceClass, DeviceId, ExecutionRuntime, LoadError,
    ModuleHandle, NoDeviceError,
};

use crate::registry::DeviceRegistry;

/// An artifact bound to one device, owned by one session.
///
/// Holds the device by id (resolved against the registry, never owned) and
/// the artifact weakly — the cache is the artifact's canonical owner, and
/// an eviction must not be kept alive by every session that loaded it.
#[derive(Debug)]
pub struct LoadedModule {
    handle: ModuleHandle,
    artifact_id: ArtifactId,
    artifact: Weak<CompiledArtifact>,
    device_id: DeviceId,
}

impl LoadedModule {
    pub fn handle(&self) -> ModuleHandle {
        self.handle
    }

    pub fn artifact_id(&self) -> ArtifactId {
        self.artifact_id
    }

    /// The backing artifact, if the cache still holds it.
    pub fn artifact(&self) -> Option<Arc<CompiledArtifact>> {
        self.artifact.upgrade()
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }
}

struct SchedulerState {
    modules: HashMap<(ArtifactId, DeviceId), Arc<LoadedModule>>,
    /// Set on session teardown; rejects further loads so nothing can slip
    /// in behind unload_all.
    sealed: bool,
}

pub struct DeviceScheduler {
    registry: Arc<DeviceRegistry>,
    runtime: Arc<dyn ExecutionRuntime>,
    state: Mutex<SchedulerState>,
}

impl DeviceScheduler {
    pub fn new(registry: Arc<DeviceRegistry>, runtime: Arc<dyn ExecutionRuntime>) -> Self {
        DeviceScheduler {
            registry,
            runtime,
            state: Mutex::new(SchedulerState {
                modules: HashMap::new(),
                sealed: false,
            }),
        }
    }

    /// Least-loaded device of `class`; equal loads resolve to the earliest
    /// enumerated device.
    pub fn select_device(&self, class: &DeviceClass) -> Result<Arc<Device>, NoDeviceError> {
        self.registry
            .by_class(class)
            .min_by_key(|d| d.load())
            .cloned()
            .ok_or_else(|| NoDeviceError {
                class: class.clone(),
            })
    }

    /// Bind `artifact` to `device`, reusing the session's existing module
    /// for the pair if there is one.
    ///
    /// The load runs under the session's module lock, so loads within one
    /// session serialize; that is what makes the idempotence window
    /// race-free.
    pub fn get_or_load(
        &self,
        artifact: &Arc<CompiledArtifact>,
        device: &Arc<Device>,
    ) -> Result<Arc<LoadedModule>, LoadError> {
        if !self.registry.contains(device.id()) {
            return Err(LoadError::DeviceUnavailable {
                device: device.id(),
                reason: "device not present in registry".to_string(),
            });
        }

        let mut state = self.state.lock().unwrap();
        if state.sealed {
            return Err(LoadError::DeviceUnavailable {
                device: device.id(),
                reason: "session is closed".to_string(),
            });
        }

        let key = (artifact.id(), device.id());
        if let Some(module) = state.modules.get(&key) {
            return Ok(Arc::clone(module));
        }

        let handle = self.runtime.load(artifact, device.info())?;
        let module = Arc::new(LoadedModule {
            handle,
            artifact_id: artifact.id(),
            artifact: Arc::downgrade(artifact),
            device_id: device.id(),
        });
        state.modules.insert(key, Arc::clone(&module));
        debug!(artifact = %artifact.id(), device = %device.id(), "module loaded");
        Ok(module)
    }

    /// Release one module explicitly. No-op if the session no longer owns it.
    pub fn unload(&self, module: &LoadedModule) {
        let removed = {
            let mut state = self.state.lock().unwrap();
            state
                .modules
                .remove(&(module.artifact_id(), module.device_id()))
        };
        if removed.is_some() {
            self.runtime.unload(module.handle());
            debug!(device = %module.device_id(), "module unloaded");
        }
    }

    /// Release everything and refuse further loads. Idempotent. Returns
    /// how many modules were released.
    pub fn unload_all(&self) -> usize {
        let drained: Vec<Arc<LoadedModule>> = {
            let mut state = self.state.lock().unwrap();
            state.sealed = true;
            state.modules.drain().map(|(_, m)| m).collect()
        };
        for module in &drained {
            self.runtime.unload(module.handle());
        }
        drained.len()
    }
}
