//! # smelt-local
//!
//! A reference in-process compiler + runtime pair implementing the
//! [`ProgramCompiler`](smelt_core::ProgramCompiler) and
//! [`ExecutionRuntime`](smelt_core::ExecutionRuntime) contracts.
//!
//! The compiler flattens a program DAG into an instruction tape with a
//! versioned binary encoding; the runtime decodes the tape at load time and
//! executes it over f64 buffers. Two device classes are offered:
//!
//! - `cpu-sync` — invocations run inline on the calling thread
//! - `cpu-task` — invocations run element-parallel on a worker pool
//!
//! This pair exists so the engine and its tests exercise real compile,
//! load, and invoke work. It is not a production backend.

mod compiler;
mod runtime;
mod tape;

pub use compiler::LocalCompiler;
pub use runtime::{LocalRuntime, RuntimeStats};

/// Capability class of devices that execute inline on the calling thread.
pub const CLASS_CPU_SYNC: &str = "cpu-sync";
/// Capability class of devices that execute on a shared worker pool.
pub const CLASS_CPU_TASK: &str = "cpu-task";
