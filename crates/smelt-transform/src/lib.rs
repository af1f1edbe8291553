//! # smelt-transform
//!
//! The program transformation pipeline: ordered, pure rewrites applied to a
//! [`Program`](smelt_core::Program) before compilation.
//!
//! Steps are polymorphic over the capability "rewrite a program" — the
//! [`TransformStep`] trait. Built-ins cover canonicalization and lowering;
//! [`StepFn`] wraps user-supplied passes. Step identity (its name) is part
//! of the compilation key, so the same program pushed through different
//! pipelines compiles separately.

mod pipeline;
mod step;

pub use pipeline::{apply, Pipeline};
pub use step::{Canonicalize, Lower, StepFn, TransformStep};
