//! # smelt-core
//!
//! Core types and collaborator contracts for the smelt JIT engine.
//!
//! This crate provides:
//! - [`Program`] — immutable expression-graph program representation
//! - [`Digest`] / [`CompilationKey`] — content fingerprints for compilation dedup
//! - [`DeviceClass`] / [`Device`] — execution targets and their capability classes
//! - [`CompiledArtifact`] — immutable compiler output with compile metadata
//! - [`ProgramCompiler`] / [`ExecutionRuntime`] traits — the two opaque
//!   collaborators the engine orchestrates
//! - the error taxonomy ([`TransformError`], [`CompileError`], [`LoadError`],
//!   [`InvokeError`], [`NoDeviceError`], [`JitError`])

pub mod adapter;
pub mod artifact;
pub mod device;
pub mod error;
pub mod key;
pub mod program;

pub use adapter::{Buffer, CompilerConfig, ExecutionRuntime, ModuleHandle, ProgramCompiler};
pub use artifact::{ArtifactId, CompileMeta, CompiledArtifact};
pub use device::{Device, DeviceClass, DeviceId, DeviceInfo, LoadGuard};
pub use error::{
    CompileError, EngineError, InvokeError, JitError, LoadError, NoDeviceError, TransformError,
};
pub use key::{CompilationKey, Digest};
pub use program::{BinaryOp, NodeId, OpKind, Program, ProgramBuilder, UnaryOp};
