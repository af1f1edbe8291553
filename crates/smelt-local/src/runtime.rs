// LocalRuntime — Reference ExecutionRuntime
//
// Keeps decoded tapes in a handle slab behind a mutex; execution itself
// runs lock-free on the caller's thread (cpu-sync devices) or
// element-parallel on a shared rayon pool (cpu-task devices). Counters are
// atomics off the lock path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;
use tracing::debug;

use smelt_core::{
    BinaryOp, Buffer, CompiledArtifact, DeviceClass, DeviceId, DeviceInfo, ExecutionRuntime,
    InvokeError, LoadError, ModuleHandle, UnaryOp,
};

use crate::tape::{self, Tape, TapeInstr};
use crate::{CLASS_CPU_SYNC, CLASS_CPU_TASK};

/// Snapshot of the runtime's counters.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeStats {
    /// Cumulative successful loads.
    pub loads: u64,
    /// Cumulative unloads of handles the runtime knew about.
    pub unloads: u64,
    /// Cumulative invocations (successful or not).
    pub invocations: u64,
    /// Modules currently resident.
    pub resident_modules: usize,
}

struct LoadedTape {
    tape: Tape,
    device: DeviceInfo,
}

/// The reference runtime: cpu-sync and cpu-task devices over f64 buffers.
pub struct LocalRuntime {
    devices: Vec<DeviceInfo>,
    modules: Mutex<HashMap<ModuleHandle, LoadedTape>>,
    next_handle: AtomicU64,
    pool: rayon::ThreadPool,
    loads: AtomicU64,
    unloads: AtomicU64,
    invocations: AtomicU64,
}

impl LocalRuntime {
    /// One device of each class.
    pub fn new() -> Self {
        Self::with_devices(1, 1)
    }

    /// `sync` cpu-sync devices followed by `task` cpu-task devices.
    /// Device ids are assigned in that order.
    pub fn with_devices(sync: usize, task: usize) -> Self {
        let mut devices = Vec::with_capacity(sync + task);
        for i in 0..sync {
            devices.push(DeviceInfo {
                id: DeviceId(devices.len() as u32),
                class: DeviceClass::new(CLASS_CPU_SYNC),
                name: format!("{CLASS_CPU_SYNC}:{i}"),
            });
        }
        for i in 0..task {
            devices.push(DeviceInfo {
                id: DeviceId(devices.len() as u32),
                class: DeviceClass::new(CLASS_CPU_TASK),
                name: format!("{CLASS_CPU_TASK}:{i}"),
            });
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("smelt-local-{i}"))
            .build()
            .expect("failed to build worker pool");
        LocalRuntime {
            devices,
            modules: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            pool,
            loads: AtomicU64::new(0),
            unloads: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            loads: self.loads.load(Ordering::Relaxed),
            unloads: self.unloads.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            resident_modules: self.modules.lock().unwrap().len(),
        }
    }
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionRuntime for LocalRuntime {
    fn enumerate_devices(&self) -> Vec<DeviceInfo> {
        self.devices.clone()
    }

    fn load(
        &self,
        artifact: &CompiledArtifact,
        device: &DeviceInfo,
    ) -> Result<ModuleHandle, LoadError> {
        let known = self
            .devices
            .iter()
            .find(|d| d.id == device.id)
            .ok_or_else(|| LoadError::DeviceUnavailable {
                device: device.id,
                reason: "device not enumerated by this runtime".to_string(),
            })?;
        if artifact.class() != &known.class {
            return Err(LoadError::ClassMismatch {
                device: known.id,
                device_class: known.class.clone(),
                artifact_class: artifact.class().clone(),
            });
        }
        let tape = tape::decode(artifact.bytes()).map_err(|reason| {
            LoadError::MalformedArtifact {
                device: known.id,
                reason,
            }
        })?;

        let handle = ModuleHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.modules.lock().unwrap().insert(
            handle,
            LoadedTape {
                tape,
                device: known.clone(),
            },
        );
        self.loads.fetch_add(1, Ordering::Relaxed);
        debug!(?handle, artifact = %artifact.id(), device = %known.id, "loaded module");
        Ok(handle)
    }

    fn invoke(&self, handle: ModuleHandle, args: &[Buffer]) -> Result<Vec<Buffer>, InvokeError> {
        self.invocations.fetch_add(1, Ordering::Relaxed);

        // Clone the tape out so execution holds no lock. Tapes are small
        // relative to the buffers they process.
        let (tape, class) = {
            let modules = self.modules.lock().unwrap();
            let loaded = modules
                .get(&handle)
                .ok_or(InvokeError::StaleHandle { handle })?;
            (loaded.tape.clone(), loaded.device.class.clone())
        };

        if args.len() != tape.arity as usize {
            return Err(InvokeError::ArityMismatch {
                expected: tape.arity as usize,
                got: args.len(),
            });
        }
        let n = args.first().map(|b| b.len()).unwrap_or(1);
        for (index, buf) in args.iter().enumerate() {
            if buf.len() != n {
                return Err(InvokeError::ShapeMismatch {
                    index,
                    expected: n,
                    got: buf.len(),
                });
            }
        }

        if class.as_str() == CLASS_CPU_TASK {
            self.pool.install(|| run_parallel(&tape, args, n))
        } else {
            run_inline(&tape, args, n)
        }
    }

    fn unload(&self, handle: ModuleHandle) {
        if self.modules.lock().unwrap().remove(&handle).is_some() {
            self.unloads.fetch_add(1, Ordering::Relaxed);
            debug!(?handle, "unloaded module");
        }
    }
}

// Execution

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

fn get_slot(slots: &[Option<Buffer>], idx: u32) -> Result<&Buffer, InvokeError> {
    slots[idx as usize]
        .as_ref()
        .ok_or_else(|| InvokeError::DeviceFault {
            reason: format!("value slot {idx} empty at use"),
        })
}

/// Vectorized walk of the tape on the calling thread.
fn run_inline(tape: &Tape, args: &[Buffer], n: usize) -> Result<Vec<Buffer>, InvokeError> {
    let mut slots: Vec<Option<Buffer>> = vec![None; tape.num_slots as usize];
    for instr in &tape.instrs {
        match *instr {
            TapeInstr::Input { slot, dst } => {
                slots[dst as usize] = Some(args[slot as usize].clone());
            }
            TapeInstr::Const { value, dst } => {
                slots[dst as usize] = Some(vec![value; n]);
            }
            TapeInstr::Unary { op, src, dst } => {
                let out: Buffer = get_slot(&slots, src)?
                    .iter()
                    .map(|&v| eval_unary(op, v))
                    .collect();
                slots[dst as usize] = Some(out);
            }
            TapeInstr::Binary { op, lhs, rhs, dst } => {
                let out: Buffer = get_slot(&slots, lhs)?
                    .iter()
                    .zip(get_slot(&slots, rhs)?.iter())
                    .map(|(&a, &b)| eval_binary(op, a, b))
                    .collect();
                slots[dst as usize] = Some(out);
            }
        }
    }

    let mut outputs = Vec::with_capacity(tape.outputs.len());
    for &slot in &tape.outputs {
        outputs.push(get_slot(&slots, slot)?.clone());
    }
    Ok(outputs)
}

/// Element-parallel walk: each element evaluates the whole tape with
/// scalar slots. Ops are element-wise, so elements are independent.
fn run_parallel(tape: &Tape, args: &[Buffer], n: usize) -> Result<Vec<Buffer>, InvokeError> {
    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| eval_element(tape, args, i))
        .collect();

    // Transpose rows (per-element outputs) into per-output buffers.
    let mut outputs = vec![Vec::with_capacity(n); tape.outputs.len()];
    for row in &rows {
        for (k, &v) in row.iter().enumerate() {
            outputs[k].push(v);
        }
    }
    Ok(outputs)
}

fn eval_element(tape: &Tape, args: &[Buffer], i: usize) -> Vec<f64> {
    let mut slots = vec![0.0f64; tape.num_slots as usize];
    for instr in &tape.instrs {
        match *instr {
            TapeInstr::Input { slot, dst } => slots[dst as usize] = args[slot as usize][i],
            TapeInstr::Const { value, dst } => slots[dst as usize] = value,
            TapeInstr::Unary { op, src, dst } => {
                slots[dst as usize] = eval_unary(op, slots[src as usize])
            }
            TapeInstr::Binary { op, lhs, rhs, dst } => {
                slots[dst as usize] = eval_binary(op, slots[lhs as usize], slots[rhs as usize])
            }
        }
    }
    tape.outputs.iter().map(|&s| slots[s as usize]).collect()
}
