// Engine — Process-wide shared state and session factory
//
// Owns the one compilation cache and the one device registry, plus the two
// collaborator adapters. Sessions are cheap; the engine is built once.

use std::sync::Arc;

use tracing::info;

use smelt_core::{EngineError, ExecutionRuntime, ProgramCompiler};
use smelt_transform::Pipeline;

use crate::cache::CompilationCache;
use crate::config::EngineConfig;
use crate::registry::DeviceRegistry;
use crate::session::Session;

pub struct Engine {
    cache: Arc<CompilationCache>,
    registry: Arc<DeviceRegistry>,
    compiler: Arc<dyn ProgramCompiler>,
    runtime: Arc<dyn ExecutionRuntime>,
    config: EngineConfig,
}

impl Engine {
    /// Enumerate devices, build the registry and the shared cache.
    ///
    /// Fails only if the runtime's enumeration is unusable (no devices, or
    /// duplicated ids) — everything after construction reports typed
    /// errors instead.
    pub fn new(
        compiler: Arc<dyn ProgramCompiler>,
        runtime: Arc<dyn ExecutionRuntime>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let registry = Arc::new(DeviceRegistry::new(runtime.enumerate_devices())?);
        let cache = Arc::new(CompilationCache::new(config.cache.clone()));
        info!(
            devices = registry.len(),
            compiler = %compiler.version(),
            "engine initialized"
        );
        Ok(Engine {
            cache,
            registry,
            compiler,
            runtime,
            config,
        })
    }

    /// A session with an empty transformation pipeline.
    pub fn session(&self) -> Session {
        self.session_with_pipeline(Pipeline::new())
    }

    /// A session that applies `pipeline` to every submitted program.
    pub fn session_with_pipeline(&self, pipeline: Pipeline) -> Session {
        Session::new(
            pipeline,
            self.config.compiler.clone(),
            Arc::clone(&self.cache),
            Arc::clone(&self.registry),
            Arc::clone(&self.compiler),
            Arc::clone(&self.runtime),
        )
    }

    pub fn cache(&self) -> &Arc<CompilationCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
