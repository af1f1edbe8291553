// LocalCompiler — Reference ProgramCompiler
//
// Flattens the program DAG into an instruction tape. The node list is
// already topologically ordered (nodes only reference earlier nodes), so
// slot assignment is the identity mapping; the work here is validation and
// encoding.

use std::time::Instant;

use tracing::debug;

use smelt_core::{
    CompileError, CompileMeta, CompiledArtifact, CompilerConfig, DeviceClass, OpKind, Program,
    ProgramCompiler,
};

use crate::tape::{self, Tape, TapeInstr};
use crate::{CLASS_CPU_SYNC, CLASS_CPU_TASK};

/// The reference compiler. Stateless; one instance serves any number of
/// concurrent sessions.
#[derive(Debug, Default)]
pub struct LocalCompiler;

impl LocalCompiler {
    pub fn new() -> Self {
        LocalCompiler
    }
}

impl ProgramCompiler for LocalCompiler {
    fn version(&self) -> String {
        format!("smelt-local-{}", env!("CARGO_PKG_VERSION"))
    }

    fn compile(
        &self,
        program: &Program,
        target: &DeviceClass,
        config: &CompilerConfig,
    ) -> Result<CompiledArtifact, CompileError> {
        let start = Instant::now();

        if target.as_str() != CLASS_CPU_SYNC && target.as_str() != CLASS_CPU_TASK {
            return Err(CompileError::permanent(format!(
                "unsupported target class '{target}' (supported: {CLASS_CPU_SYNC}, {CLASS_CPU_TASK})"
            )));
        }
        if program.outputs().is_empty() {
            return Err(CompileError::permanent(format!(
                "program '{}' has no outputs",
                program.name()
            )));
        }

        // Node index == slot index; definition order is execution order.
        let mut instrs = Vec::with_capacity(program.len());
        for (i, op) in program.ops().iter().enumerate() {
            let dst = i as u32;
            let instr = match *op {
                OpKind::Input { slot } => TapeInstr::Input { slot, dst },
                OpKind::Const { value } => TapeInstr::Const { value, dst },
                OpKind::Unary { op, src } => TapeInstr::Unary {
                    op,
                    src: src.0,
                    dst,
                },
                OpKind::Binary { op, lhs, rhs } => TapeInstr::Binary {
                    op,
                    lhs: lhs.0,
                    rhs: rhs.0,
                    dst,
                },
            };
            instrs.push(instr);
        }

        let tape = Tape {
            arity: program.arity(),
            num_slots: program.len() as u32,
            instrs,
            outputs: program.outputs().iter().map(|o| o.0).collect(),
        };
        let bytes = tape::encode(&tape);

        debug!(
            program = program.name(),
            target = %target,
            flags = config.flags().len(),
            bytes = bytes.len(),
            "compiled program to instruction tape"
        );

        Ok(CompiledArtifact::new(
            bytes,
            target.clone(),
            CompileMeta {
                duration: start.elapsed(),
                compiler_version: self.version(),
            },
        ))
    }
}
