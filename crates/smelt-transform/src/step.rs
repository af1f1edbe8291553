// TransformStep — Named, pure program rewrites
//
// Each step is a function Program → Program. Steps must be deterministic:
// the compilation key is derived from (program hash, step identities), so
// a step that produced different output for the same input would poison
// cache lookups. Steps are stateless and safe to apply from any number of
// sessions concurrently.

use std::collections::HashMap;
use std::fmt;

use smelt_core::{
    BinaryOp, DeviceClass, NodeId, OpKind, Program, ProgramBuilder, TransformError, UnaryOp,
};

/// A named, pure rewrite of a program.
pub trait TransformStep: Send + Sync {
    /// Step identity. Participates in the compilation key, so two steps
    /// with the same name must be behaviorally identical.
    fn name(&self) -> &str;

    fn apply(&self, program: &Program) -> Result<Program, TransformError>;
}

impl fmt::Debug for dyn TransformStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransformStep({})", self.name())
    }
}

// Rebuild helper

/// Incrementally rebuilds a program while remapping node ids.
///
/// Input nodes are always re-emitted, in slot order, even when dead: an
/// input is part of the program's calling convention, and dropping one
/// would silently change the arity callers must supply.
struct Rewriter {
    builder: ProgramBuilder,
    remap: Vec<Option<NodeId>>,
    consts: HashMap<u64, NodeId>,
}

impl Rewriter {
    fn new(program: &Program) -> Self {
        Rewriter {
            builder: ProgramBuilder::new(program.name()),
            remap: vec![None; program.len()],
            consts: HashMap::new(),
        }
    }

    fn resolve(&self, old: NodeId) -> NodeId {
        self.remap[old.index()].expect("operand emitted before use")
    }

    fn emitted(&self, id: NodeId) -> &OpKind {
        self.builder.op(id)
    }

    /// Emit a constant, deduplicating by bit pattern.
    fn emit_const(&mut self, value: f64) -> NodeId {
        if let Some(&id) = self.consts.get(&value.to_bits()) {
            return id;
        }
        let id = self.builder.constant(value);
        self.consts.insert(value.to_bits(), id);
        id
    }

    fn record(&mut self, old: NodeId, new: NodeId) {
        self.remap[old.index()] = Some(new);
    }

    fn finish(mut self, program: &Program) -> Program {
        for &out in program.outputs() {
            let mapped = self.resolve(out);
            self.builder.output(mapped);
        }
        self.builder.build()
    }
}

// Canonicalize

/// Canonicalization: constant folding, double-negation and arithmetic
/// identity elimination, constant dedup, and dead-node pruning.
///
/// Idempotent — applying it to its own output is a no-op rewrite.
pub struct Canonicalize;

impl TransformStep for Canonicalize {
    fn name(&self) -> &str {
        "canonicalize"
    }

    fn apply(&self, program: &Program) -> Result<Program, TransformError> {
        // Fold first, then prune: folding reroutes consumers around nodes
        // (identity folds, const dedup) and leaves the bypassed nodes dead.
        let folded = fold(program);
        Ok(prune(&folded))
    }
}

fn fold(program: &Program) -> Program {
    let mut rw = Rewriter::new(program);
    for (i, op) in program.ops().iter().enumerate() {
        let old = NodeId(i as u32);
        let new = match *op {
            OpKind::Input { .. } => rw.builder.input(),
            OpKind::Const { value } => rw.emit_const(value),
            OpKind::Unary { op, src } => rewrite_unary(&mut rw, op, src),
            OpKind::Binary { op, lhs, rhs } => rewrite_binary(&mut rw, op, lhs, rhs),
        };
        rw.record(old, new);
    }
    rw.finish(program)
}

/// Drop nodes unreachable from the outputs. Inputs always survive — they
/// are the program's calling convention.
fn prune(program: &Program) -> Program {
    let live = reachable(program);
    let mut rw = Rewriter::new(program);
    for (i, op) in program.ops().iter().enumerate() {
        let old = NodeId(i as u32);
        let is_input = matches!(op, OpKind::Input { .. });
        if !live[i] && !is_input {
            continue;
        }
        let new = match *op {
            OpKind::Input { .. } => rw.builder.input(),
            OpKind::Const { value } => rw.builder.constant(value),
            OpKind::Unary { op, src } => {
                let s = rw.resolve(src);
                rw.builder.unary(op, s)
            }
            OpKind::Binary { op, lhs, rhs } => {
                let l = rw.resolve(lhs);
                let r = rw.resolve(rhs);
                rw.builder.binary(op, l, r)
            }
        };
        rw.record(old, new);
    }
    rw.finish(program)
}

/// Nodes reachable from the program outputs.
fn reachable(program: &Program) -> Vec<bool> {
    let mut live = vec![false; program.len()];
    let mut stack: Vec<NodeId> = program.outputs().to_vec();
    while let Some(id) = stack.pop() {
        if live[id.index()] {
            continue;
        }
        live[id.index()] = true;
        stack.extend(program.op(id).operands());
    }
    live
}

fn rewrite_unary(rw: &mut Rewriter, op: UnaryOp, src: NodeId) -> NodeId {
    let s = rw.resolve(src);
    let src_op = *rw.emitted(s);
    match src_op {
        OpKind::Const { value } => rw.emit_const(eval_unary(op, value)),
        // --x → x
        OpKind::Unary {
            op: UnaryOp::Neg,
            src: inner,
        } if op == UnaryOp::Neg => inner,
        _ => rw.builder.unary(op, s),
    }
}

fn rewrite_binary(rw: &mut Rewriter, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
    let l = rw.resolve(lhs);
    let r = rw.resolve(rhs);
    let lop = *rw.emitted(l);
    let rop = *rw.emitted(r);

    if let (OpKind::Const { value: a }, OpKind::Const { value: b }) = (lop, rop) {
        return rw.emit_const(eval_binary(op, a, b));
    }

    // Arithmetic identities. Mul-by-zero is deliberately not folded: it
    // would erase NaN/inf propagation from the non-constant side.
    let l_const = const_value(lop);
    let r_const = const_value(rop);
    match op {
        BinaryOp::Add => {
            if r_const == Some(0.0) {
                return l;
            }
            if l_const == Some(0.0) {
                return r;
            }
        }
        BinaryOp::Sub if r_const == Some(0.0) => return l,
        BinaryOp::Mul => {
            if r_const == Some(1.0) {
                return l;
            }
            if l_const == Some(1.0) {
                return r;
            }
        }
        BinaryOp::Div if r_const == Some(1.0) => return l,
        _ => {}
    }

    rw.builder.binary(op, l, r)
}

fn const_value(op: OpKind) -> Option<f64> {
    match op {
        OpKind::Const { value } => Some(value),
        _ => None,
    }
}

fn eval_unary(op: UnaryOp, v: f64) -> f64 {
    match op {
        UnaryOp::Neg => -v,
        UnaryOp::Abs => v.abs(),
        UnaryOp::Sqrt => v.sqrt(),
        UnaryOp::Exp => v.exp(),
        UnaryOp::Log => v.ln(),
    }
}

fn eval_binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Min => a.min(b),
        BinaryOp::Max => a.max(b),
    }
}

// Lower

/// Lowering for a target class: rewrites the extended ops (`Abs`, `Min`)
/// into the minimal core set every class accepts.
///
/// The target class is recorded in the step identity ("lower:cpu-sync"),
/// so programs lowered for different classes key separately.
pub struct Lower {
    name: String,
}

impl Lower {
    pub fn for_class(class: &DeviceClass) -> Self {
        Lower {
            name: format!("lower:{class}"),
        }
    }
}

impl TransformStep for Lower {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, program: &Program) -> Result<Program, TransformError> {
        let mut rw = Rewriter::new(program);

        for (i, op) in program.ops().iter().enumerate() {
            let old = NodeId(i as u32);
            let new = match *op {
                OpKind::Input { .. } => rw.builder.input(),
                OpKind::Const { value } => rw.emit_const(value),
                // abs(x) → max(x, -x)
                OpKind::Unary {
                    op: UnaryOp::Abs,
                    src,
                } => {
                    let x = rw.resolve(src);
                    let nx = rw.builder.unary(UnaryOp::Neg, x);
                    rw.builder.binary(BinaryOp::Max, x, nx)
                }
                OpKind::Unary { op, src } => {
                    let s = rw.resolve(src);
                    rw.builder.unary(op, s)
                }
                // min(a, b) → -max(-a, -b)
                OpKind::Binary {
                    op: BinaryOp::Min,
                    lhs,
                    rhs,
                } => {
                    let na = {
                        let a = rw.resolve(lhs);
                        rw.builder.unary(UnaryOp::Neg, a)
                    };
                    let nb = {
                        let b = rw.resolve(rhs);
                        rw.builder.unary(UnaryOp::Neg, b)
                    };
                    let m = rw.builder.binary(BinaryOp::Max, na, nb);
                    rw.builder.unary(UnaryOp::Neg, m)
                }
                OpKind::Binary { op, lhs, rhs } => {
                    let l = rw.resolve(lhs);
                    let r = rw.resolve(rhs);
                    rw.builder.binary(op, l, r)
                }
            };
            rw.record(old, new);
        }

        Ok(rw.finish(program))
    }
}

// StepFn

/// A user-supplied pass: a named closure over programs.
pub struct StepFn {
    name: String,
    f: Box<dyn Fn(&Program) -> Result<Program, TransformError> + Send + Sync>,
}

impl StepFn {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&Program) -> Result<Program, TransformError> + Send + Sync + 'static,
    ) -> Self {
        StepFn {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

impl TransformStep for StepFn {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, program: &Program) -> Result<Program, TransformError> {
        (self.f)(program)
    }
}
