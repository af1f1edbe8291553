// Pipeline — Ordered application of transformation steps
//
// Steps run strictly in order; each step's output is the next step's
// input. The empty pipeline is the identity transform. A failing step
// aborts the pipeline and the error names the step plus the program state
// it was handed.

use std::sync::Arc;

use tracing::debug;

use smelt_core::{Program, TransformError};

use crate::step::TransformStep;

/// Apply `steps` to `program` in order.
pub fn apply(
    steps: &[Arc<dyn TransformStep>],
    program: &Program,
) -> Result<Program, TransformError> {
    let mut current = program.clone();
    for step in steps {
        debug!(step = step.name(), nodes = current.len(), "applying transform step");
        current = step.apply(&current)?;
    }
    Ok(current)
}

/// An ordered, shareable sequence of transformation steps.
///
/// Sessions own one of these as their transformation configuration; extra
/// per-call steps are appended after it.
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn TransformStep>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline::default()
    }

    pub fn with_step(mut self, step: Arc<dyn TransformStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[Arc<dyn TransformStep>] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step identities in application order, for compilation-key derivation.
    pub fn identities(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn apply(&self, program: &Program) -> Result<Program, TransformError> {
        apply(&self.steps, program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{Canonicalize, Lower, StepFn};
    use smelt_core::{BinaryOp, DeviceClass, OpKind, ProgramBuilder, UnaryOp};

    fn sample() -> Program {
        // (x + 0) * (2 + 3), plus a dead node
        let mut b = ProgramBuilder::new("sample");
        let x = b.input();
        let zero = b.constant(0.0);
        let x0 = b.binary(BinaryOp::Add, x, zero);
        let two = b.constant(2.0);
        let three = b.constant(3.0);
        let five = b.binary(BinaryOp::Add, two, three);
        let dead = b.unary(UnaryOp::Exp, x);
        let _ = dead;
        let r = b.binary(BinaryOp::Mul, x0, five);
        b.output(r);
        b.build()
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let p = sample();
        let out = Pipeline::new().apply(&p).unwrap();
        assert_eq!(out, p);
        assert_eq!(out.content_hash(), p.content_hash());
    }

    #[test]
    fn test_canonicalize_folds_and_prunes() {
        let p = sample();
        let out = Pipeline::new()
            .with_step(Arc::new(Canonicalize))
            .apply(&p)
            .unwrap();

        // x, const 5.0, mul — the add-zero, the dead exp, and the folded
        // constants are gone; the input survives.
        assert_eq!(out.arity(), 1);
        assert_eq!(out.len(), 3);
        assert!(matches!(out.op(out.outputs()[0]), OpKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let p = sample();
        let once = Canonicalize.apply(&p).unwrap();
        let twice = Canonicalize.apply(&once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.content_hash(), twice.content_hash());
    }

    #[test]
    fn test_canonicalize_eliminates_double_negation() {
        let mut b = ProgramBuilder::new("neg");
        let x = b.input();
        let n = b.unary(UnaryOp::Neg, x);
        let nn = b.unary(UnaryOp::Neg, n);
        b.output(nn);
        let p = b.build();

        let out = Canonicalize.apply(&p).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.outputs()[0].index(), 0);
        assert!(matches!(out.op(out.outputs()[0]), OpKind::Input { slot: 0 }));
    }

    #[test]
    fn test_lower_rewrites_extended_ops() {
        let mut b = ProgramBuilder::new("ext");
        let x = b.input();
        let y = b.input();
        let a = b.unary(UnaryOp::Abs, x);
        let m = b.binary(BinaryOp::Min, a, y);
        b.output(m);
        let p = b.build();

        let lower = Lower::for_class(&DeviceClass::new("cpu-sync"));
        assert_eq!(lower.name(), "lower:cpu-sync");
        let out = lower.apply(&p).unwrap();

        for op in out.ops() {
            assert!(
                !matches!(
                    op,
                    OpKind::Unary { op: UnaryOp::Abs, .. }
                        | OpKind::Binary { op: BinaryOp::Min, .. }
                ),
                "extended op survived lowering: {op:?}"
            );
        }
        assert_eq!(out.arity(), 2);
    }

    #[test]
    fn test_failing_step_names_itself_and_carries_partial() {
        let p = sample();
        let pipeline = Pipeline::new()
            .with_step(Arc::new(Canonicalize))
            .with_step(Arc::new(StepFn::new("reject-everything", |prog| {
                Err(TransformError::new(
                    "reject-everything",
                    "unsupported construct",
                    prog,
                ))
            })));

        let err = pipeline.apply(&p).unwrap_err();
        assert_eq!(err.step, "reject-everything");
        // The partial state is the canonicalized program, not the original.
        assert_eq!(err.partial.len(), 3);
    }

    #[test]
    fn test_deterministic_output() {
        let p = sample();
        let pipeline = Pipeline::new().with_step(Arc::new(Canonicalize));
        let a = pipeline.apply(&p).unwrap();
        let b = pipeline.apply(&p).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
    }
}
