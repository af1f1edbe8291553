// Errors — The engine's failure taxonomy
//
// Every layer returns a typed error to its caller; nothing here aborts the
// process. The one fatal construction-time condition (a runtime that
// enumerates no devices) is EngineError. User-visible failures carry the
// originating compilation key or device id so a report can be traced back
// to the work it came from.

use crate::device::{DeviceClass, DeviceId};
use crate::key::CompilationKey;
use crate::program::Program;

/// A transformation step rejected its input program.
///
/// Carries the step's identity and the program state the pipeline had
/// reached when the step failed, for diagnostics.
#[derive(Debug, thiserror::Error)]
#[error("transform step '{step}' failed: {message}")]
pub struct TransformError {
    pub step: String,
    pub message: String,
    pub partial: Box<Program>,
}

impl TransformError {
    pub fn new(step: impl Into<String>, message: impl Into<String>, partial: &Program) -> Self {
        TransformError {
            step: step.into(),
            message: message.into(),
            partial: Box::new(partial.clone()),
        }
    }
}

/// The compiler collaborator failed.
///
/// Permanent means the program itself is at fault (malformed, unsupported
/// construct) — the failure is cached and replayed without re-invoking the
/// compiler. Transient means the environment was at fault (resource
/// exhaustion, flaky toolchain) — the next submission retries.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompileError {
    #[error("program rejected by compiler: {diagnostics}")]
    Permanent { diagnostics: String },
    #[error("transient compiler failure: {diagnostics}")]
    Transient { diagnostics: String },
}

impl CompileError {
    pub fn permanent(diagnostics: impl Into<String>) -> Self {
        CompileError::Permanent {
            diagnostics: diagnostics.into(),
        }
    }

    pub fn transient(diagnostics: impl Into<String>) -> Self {
        CompileError::Transient {
            diagnostics: diagnostics.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, CompileError::Permanent { .. })
    }
}

/// The runtime failed to bind an artifact to a device.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    #[error("artifact targets class '{artifact_class}' but {device} is class '{device_class}'")]
    ClassMismatch {
        device: DeviceId,
        device_class: DeviceClass,
        artifact_class: DeviceClass,
    },
    #[error("{device} unavailable: {reason}")]
    DeviceUnavailable { device: DeviceId, reason: String },
    #[error("malformed artifact for {device}: {reason}")]
    MalformedArtifact { device: DeviceId, reason: String },
}

/// Execution of a loaded module failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvokeError {
    #[error("argument arity mismatch: module expects {expected} buffers, got {got}")]
    ArityMismatch { expected: usize, got: usize },
    #[error("argument length mismatch: buffer {index} has {got} elements, expected {expected}")]
    ShapeMismatch {
        index: usize,
        expected: usize,
        got: usize,
    },
    #[error("module handle {handle:?} is not loaded")]
    StaleHandle { handle: crate::adapter::ModuleHandle },
    #[error("device fault during execution: {reason}")]
    DeviceFault { reason: String },
}

/// No registered device satisfies a capability requirement.
#[derive(Debug, Clone, thiserror::Error)]
#[error("no device satisfies capability class '{class}'")]
pub struct NoDeviceError {
    pub class: DeviceClass,
}

/// Engine construction failed. The only fatal errors in the system.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("execution runtime enumerated no devices")]
    NoDevices,
    #[error("execution runtime enumerated {device} twice")]
    DuplicateDevice { device: DeviceId },
}

/// What `Session::jit` can report, one variant per pipeline stage.
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    #[error("session is closed")]
    SessionClosed,
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("compilation failed for key {key}: {source}")]
    Compile {
        key: CompilationKey,
        source: CompileError,
    },
    #[error(transparent)]
    NoDevice(#[from] NoDeviceError),
    #[error("load failed on {device}: {source}")]
    Load { device: DeviceId, source: LoadError },
}
