// Session — The caller-facing orchestrator
//
// jit() is the whole reason this crate exists:
//
//   program → transform pipeline → compilation key → cache (compile at
//   most once) → device selection → load (idempotent per pair) → Invokable
//
// A session owns its transformation configuration and every module it
// loads, and shares the process-wide cache and registry. State machine:
// Open → Closed. Closing is idempotent, rejects new jit() calls, and
// unloads every module the session created; Drop closes as a backstop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use smelt_core::{
    Buffer, CompilationKey, CompilerConfig, Device, DeviceClass, ExecutionRuntime, InvokeError,
    JitError, LoadGuard, Program, ProgramCompiler,
};
use smelt_transform::{Pipeline, TransformStep};

use crate::cache::CompilationCache;
use crate::registry::DeviceRegistry;
use crate::scheduler::{DeviceScheduler, LoadedModule};

/// A compiled, loaded, callable program bound to one device.
///
/// Obtained from [`Session::jit`]. Cheap to clone-around via the Arcs it
/// holds; invocations on the same module are not serialized by the engine
/// — callers needing strict device-side ordering serialize themselves.
pub struct Invokable {
    key: CompilationKey,
    module: Arc<LoadedModule>,
    device: Arc<Device>,
    runtime: Arc<dyn ExecutionRuntime>,
}

impl Invokable {
    /// The compilation key this callable was built under. Useful for
    /// pinning and diagnostics.
    pub fn key(&self) -> CompilationKey {
        self.key
    }

    pub fn module(&self) -> &Arc<LoadedModule> {
        &self.module
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Execute on the bound device. Blocks for the duration; the device's
    /// load counter is held high while the call runs, which is what steers
    /// `select_device` toward quieter devices.
    pub fn invoke(&self, args: &[Buffer]) -> Result<Vec<Buffer>, InvokeError> {
        let _work = LoadGuard::new(&self.device);
        self.runtime.invoke(self.module.handle(), args)
    }
}

impl fmt::Debug for Invokable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invokable")
            .field("key", &self.key)
            .field("device", &self.device.id())
            .field("handle", &self.module.handle())
            .finish()
    }
}

/// One caller's JIT context.
pub struct Session {
    pipeline: Pipeline,
    compiler_config: CompilerConfig,
    cache: Arc<CompilationCache>,
    compiler: Arc<dyn ProgramCompiler>,
    runtime: Arc<dyn ExecutionRuntime>,
    scheduler: DeviceScheduler,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        pipeline: Pipeline,
        compiler_config: CompilerConfig,
        cache: Arc<CompilationCache>,
        registry: Arc<DeviceRegistry>,
        compiler: Arc<dyn ProgramCompiler>,
        runtime: Arc<dyn ExecutionRuntime>,
    ) -> Self {
        let scheduler = DeviceScheduler::new(registry, Arc::clone(&runtime));
        Session {
            pipeline,
            compiler_config,
            cache,
            compiler,
            runtime,
            scheduler,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The session's own transformation configuration. Per-call steps
    /// passed to [`Session::jit`] run after these.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Compile `program` for a device of `requirement` and return a
    /// callable bound to the chosen device.
    ///
    /// Any number of threads may call this concurrently, on the same or
    /// different sessions; identical submissions trigger one compilation.
    pub fn jit(
        &self,
        program: &Program,
        steps: &[Arc<dyn TransformStep>],
        requirement: &DeviceClass,
    ) -> Result<Invokable, JitError> {
        if self.is_closed() {
            return Err(JitError::SessionClosed);
        }

        // 1. Transform: session pipeline first, then per-call steps.
        let transformed = self.pipeline.apply(program)?;
        let transformed = smelt_transform::apply(steps, &transformed)?;

        // 2. Fingerprint the work.
        let mut identities = self.pipeline.identities();
        identities.extend(steps.iter().map(|s| s.name().to_string()));
        let key = CompilationKey::derive(
            &transformed.content_hash(),
            &identities,
            requirement,
            &self.compiler_config.digest(),
        );

        // 3. Compile through the shared cache.
        let artifact = self
            .cache
            .get_or_compile(key, || {
                self.compiler
                    .compile(&transformed, requirement, &self.compiler_config)
            })
            .map_err(|source| JitError::Compile { key, source })?;

        // 4. Place and load.
        let device = self.scheduler.select_device(requirement)?;
        let module = self
            .scheduler
            .get_or_load(&artifact, &device)
            .map_err(|source| JitError::Load {
                device: device.id(),
                source,
            })?;

        debug!(key = %key, device = %device.id(), program = program.name(), "jit ready");
        Ok(Invokable {
            key,
            module,
            device,
            runtime: Arc::clone(&self.runtime),
        })
    }

    /// Exempt a compilation from cache eviction on this session's behalf.
    pub fn pin(&self, key: &CompilationKey) -> bool {
        self.cache.pin(key)
    }

    pub fn unpin(&self, key: &CompilationKey) -> bool {
        self.cache.unpin(key)
    }

    /// Release one module early. The invokable stays usable only until its
    /// next call hits the runtime with a stale handle; prefer dropping the
    /// invokable first.
    pub fn unload(&self, module: &LoadedModule) {
        self.scheduler.unload(module);
    }

    /// Close the session: reject further jit() calls and unload every
    /// module this session created. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let released = self.scheduler.unload_all();
        info!(modules = released, "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
