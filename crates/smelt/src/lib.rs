//! # smelt
//!
//! A JIT orchestration engine: takes an immutable program representation,
//! runs it through a transformation pipeline, compiles it (once per
//! distinct program/pipeline/target/configuration), and dispatches it onto
//! the least-loaded matching device — without callers sequencing compiler
//! invocations, managing artifact lifetimes, or reasoning about placement.
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `smelt-core` | Program representation, keys, devices, artifacts, adapter traits, errors |
//! | `smelt-transform` | `TransformStep` trait, canonicalize/lower built-ins, `Pipeline` |
//! | `smelt-local` | Reference in-process compiler + runtime (cpu-sync / cpu-task) |
//! | `smelt` | Compilation cache, device registry, scheduler, sessions, engine |
//!
//! ## Usage
//!
//! ```ignore
//! let engine = Engine::new(compiler, runtime, EngineConfig::default())?;
//! let session = engine.session();
//! let f = session.jit(&program, &[Arc::new(Canonicalize)], &DeviceClass::new("cpu-sync"))?;
//! let outputs = f.invoke(&[vec![1.0, 2.0, 3.0]])?;
//! session.close();
//! ```
//!
//! The cache is the only cross-session state: any number of threads may
//! call `jit`/`invoke` concurrently and a given compilation key is
//! compiled at most once, with all concurrent submitters observing the
//! same outcome.

mod cache;
mod config;
mod engine;
mod persist;
mod registry;
mod scheduler;
mod session;

pub use cache::{CacheStats, CompilationCache};
pub use config::{CacheConfig, EngineConfig};
pub use engine::Engine;
pub use registry::DeviceRegistry;
pub use scheduler::{DeviceScheduler, LoadedModule};
pub use session::{Invokable, Session};

/// Re-export the core types callers need at the API boundary.
pub use smelt_core::{
    ArtifactId, BinaryOp, Buffer, CompilationKey, CompileError, CompileMeta, CompiledArtifact,
    CompilerConfig, Device, DeviceClass, DeviceId, DeviceInfo, Digest, EngineError,
    ExecutionRuntime, InvokeError, JitError, LoadError, LoadGuard, ModuleHandle, NoDeviceError,
    NodeId, OpKind, Program, ProgramBuilder, ProgramCompiler, TransformError, UnaryOp,
};

/// Re-export the transformation pipeline surface.
pub use smelt_transform::{Canonicalize, Lower, Pipeline, StepFn, TransformStep};

/// Prelude: the common imports for engine users.
pub mod prelude {
    pub use crate::{
        BinaryOp, Buffer, CacheConfig, Canonicalize, CompilationKey, CompilerConfig, DeviceClass,
        Engine, EngineConfig, Invokable, JitError, Lower, Pipeline, Program, ProgramBuilder,
        Session, StepFn, TransformStep, UnaryOp,
    };
}
