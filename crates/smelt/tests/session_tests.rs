// Session tests — End-to-end jit orchestration: transform → cache →
// schedule → load → invoke, plus teardown discipline

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use smelt::prelude::*;
use smelt::{
    CompileError, CompileMeta, CompiledArtifact, InvokeError, ProgramCompiler, TransformError,
};
use smelt_local::{LocalCompiler, LocalRuntime, CLASS_CPU_SYNC, CLASS_CPU_TASK};

// Counting compiler wrapper

struct CountingCompiler {
    inner: LocalCompiler,
    calls: AtomicUsize,
}

impl CountingCompiler {
    fn new() -> Self {
        CountingCompiler {
            inner: LocalCompiler::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProgramCompiler for CountingCompiler {
    fn version(&self) -> String {
        self.inner.version()
    }

    fn compile(
        &self,
        program: &Program,
        target: &DeviceClass,
        config: &CompilerConfig,
    ) -> Result<CompiledArtifact, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.compile(program, target, config)
    }
}

/// Accepts any target class; produces an artifact nothing can load. Lets
/// tests reach the scheduling stage with exotic class requirements.
struct AnyClassCompiler;

impl ProgramCompiler for AnyClassCompiler {
    fn version(&self) -> String {
        "any-0.1".to_string()
    }

    fn compile(
        &self,
        _program: &Program,
        target: &DeviceClass,
        _config: &CompilerConfig,
    ) -> Result<CompiledArtifact, CompileError> {
        Ok(CompiledArtifact::new(
            Vec::new(),
            target.clone(),
            CompileMeta {
                duration: Duration::ZERO,
                compiler_version: "any-0.1".to_string(),
            },
        ))
    }
}

// Helpers

fn sum_scaled() -> Program {
    // (x + y) * 2
    let mut b = ProgramBuilder::new("sum_scaled");
    let x = b.input();
    let y = b.input();
    let s = b.binary(BinaryOp::Add, x, y);
    let two = b.constant(2.0);
    let r = b.binary(BinaryOp::Mul, s, two);
    b.output(r);
    b.build()
}

fn engine_with(
    sync: usize,
    task: usize,
) -> (Engine, Arc<CountingCompiler>, Arc<LocalRuntime>) {
    let compiler = Arc::new(CountingCompiler::new());
    let runtime = Arc::new(LocalRuntime::with_devices(sync, task));
    let engine = Engine::new(
        Arc::clone(&compiler) as Arc<dyn ProgramCompiler>,
        Arc::clone(&runtime) as Arc<dyn smelt::ExecutionRuntime>,
        EngineConfig::default(),
    )
    .unwrap();
    (engine, compiler, runtime)
}

fn cpu_sync() -> DeviceClass {
    DeviceClass::new(CLASS_CPU_SYNC)
}

// The end-to-end scenario

#[test]
fn test_jit_scenario_compile_once_load_once_reuse() {
    let (engine, compiler, runtime) = engine_with(1, 0);
    let session = engine.session();
    let steps: Vec<Arc<dyn TransformStep>> = vec![Arc::new(Canonicalize)];

    let f = session.jit(&sum_scaled(), &steps, &cpu_sync()).unwrap();
    let out = f
        .invoke(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]])
        .unwrap();
    assert_eq!(out, vec![vec![10.0, 14.0, 18.0]]);
    assert_eq!(compiler.calls(), 1);
    assert_eq!(runtime.stats().loads, 1);

    // Same program, pipeline, and target: no compile, no load, same module.
    let g = session.jit(&sum_scaled(), &steps, &cpu_sync()).unwrap();
    let out2 = g
        .invoke(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]])
        .unwrap();
    assert_eq!(out2, vec![vec![10.0, 14.0, 18.0]]);
    assert_eq!(compiler.calls(), 1, "cache hit must not recompile");
    assert_eq!(runtime.stats().loads, 1, "module must be reused");
    assert!(Arc::ptr_eq(f.module(), g.module()));
    assert_eq!(f.key(), g.key());
}

#[test]
fn test_concurrent_jit_triggers_one_compile() {
    let (engine, compiler, _runtime) = engine_with(1, 0);
    let session = engine.session();
    let program = sum_scaled();

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                let f = session.jit(&program, &[], &cpu_sync()).unwrap();
                let out = f.invoke(&[vec![1.0], vec![2.0]]).unwrap();
                assert_eq!(out, vec![vec![6.0]]);
            });
        }
    });

    assert_eq!(compiler.calls(), 1);
}

#[test]
fn test_distinct_pipelines_compile_separately() {
    let (engine, compiler, _runtime) = engine_with(1, 0);
    let session = engine.session();
    let program = sum_scaled();

    let plain = session.jit(&program, &[], &cpu_sync()).unwrap();
    let canon = session
        .jit(&program, &[Arc::new(Canonicalize) as Arc<dyn TransformStep>], &cpu_sync())
        .unwrap();

    // Step identity is part of the key even when the rewrite is a no-op.
    assert_ne!(plain.key(), canon.key());
    assert_eq!(compiler.calls(), 2);
}

#[test]
fn test_distinct_compiler_configs_compile_separately() {
    let compiler = Arc::new(CountingCompiler::new());
    let runtime = Arc::new(LocalRuntime::with_devices(1, 0));

    let engine_a = Engine::new(
        Arc::clone(&compiler) as _,
        Arc::clone(&runtime) as _,
        EngineConfig::default(),
    )
    .unwrap();
    let engine_b = Engine::new(
        Arc::clone(&compiler) as _,
        Arc::clone(&runtime) as _,
        EngineConfig::default()
            .with_compiler(CompilerConfig::default().with_flag("--fast-math")),
    )
    .unwrap();

    let program = sum_scaled();
    let fa = engine_a.session().jit(&program, &[], &cpu_sync()).unwrap();
    let fb = engine_b.session().jit(&program, &[], &cpu_sync()).unwrap();

    assert_ne!(fa.key(), fb.key());
    assert_eq!(compiler.calls(), 2);
}

#[test]
fn test_sessions_share_cache_but_not_modules() {
    let (engine, compiler, runtime) = engine_with(1, 0);
    let program = sum_scaled();

    let s1 = engine.session();
    let s2 = engine.session();
    let f1 = s1.jit(&program, &[], &cpu_sync()).unwrap();
    let f2 = s2.jit(&program, &[], &cpu_sync()).unwrap();

    // One compilation, shared through the cache...
    assert_eq!(compiler.calls(), 1);
    assert_eq!(f1.module().artifact_id(), f2.module().artifact_id());
    // ...but each session pays its own load.
    assert_eq!(runtime.stats().loads, 2);
    assert_ne!(f1.module().handle(), f2.module().handle());
}

// Device placement

#[test]
fn test_task_class_runs_on_task_device() {
    let (engine, _compiler, _runtime) = engine_with(1, 1);
    let session = engine.session();

    let f = session
        .jit(&sum_scaled(), &[], &DeviceClass::new(CLASS_CPU_TASK))
        .unwrap();
    assert_eq!(f.device().class().as_str(), CLASS_CPU_TASK);

    let out = f.invoke(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
    assert_eq!(out, vec![vec![8.0, 12.0]]);
}

#[test]
fn test_unsatisfiable_requirement_is_no_device_error() {
    let compiler = Arc::new(AnyClassCompiler);
    let runtime = Arc::new(LocalRuntime::with_devices(1, 0));
    let engine = Engine::new(compiler, runtime, EngineConfig::default()).unwrap();
    let session = engine.session();

    let err = session
        .jit(&sum_scaled(), &[], &DeviceClass::new("tpu"))
        .unwrap_err();
    match err {
        JitError::NoDevice(e) => assert_eq!(e.class.as_str(), "tpu"),
        other => panic!("expected NoDevice, got {other:?}"),
    }
}

// Error surfacing

#[test]
fn test_transform_failure_surfaces_step() {
    let (engine, compiler, _runtime) = engine_with(1, 0);
    let session = engine.session();

    let failing: Arc<dyn TransformStep> = Arc::new(StepFn::new("refuse", |p| {
        Err(TransformError::new("refuse", "nope", p))
    }));
    let err = session
        .jit(&sum_scaled(), &[failing], &cpu_sync())
        .unwrap_err();
    match err {
        JitError::Transform(e) => assert_eq!(e.step, "refuse"),
        other => panic!("expected Transform, got {other:?}"),
    }
    assert_eq!(compiler.calls(), 0, "transform failure must not compile");
}

#[test]
fn test_compile_failure_carries_key() {
    let (engine, _compiler, _runtime) = engine_with(1, 0);
    let session = engine.session();

    // No outputs: the local compiler rejects this permanently.
    let mut b = ProgramBuilder::new("silent");
    let _ = b.input();
    let program = b.build();

    let err = session.jit(&program, &[], &cpu_sync()).unwrap_err();
    let text = err.to_string();
    match &err {
        JitError::Compile { key, source } => {
            assert!(source.is_permanent());
            // The key is in the rendered error for diagnosability.
            assert!(text.contains(&key.to_string()));
        }
        other => panic!("expected Compile, got {other:?}"),
    }
}

#[test]
fn test_invoke_arity_mismatch() {
    let (engine, _compiler, _runtime) = engine_with(1, 0);
    let session = engine.session();
    let f = session.jit(&sum_scaled(), &[], &cpu_sync()).unwrap();

    let err = f.invoke(&[vec![1.0]]).unwrap_err();
    assert!(matches!(
        err,
        InvokeError::ArityMismatch { expected: 2, got: 1 }
    ));
}

// Teardown

#[test]
fn test_close_unloads_everything_and_rejects_jit() {
    let (engine, _compiler, runtime) = engine_with(1, 0);
    let session = engine.session();

    // Two distinct programs → two artifacts → two loaded modules.
    let f = session.jit(&sum_scaled(), &[], &cpu_sync()).unwrap();
    let mut b = ProgramBuilder::new("neg");
    let x = b.input();
    let n = b.unary(UnaryOp::Neg, x);
    b.output(n);
    let g = session.jit(&b.build(), &[], &cpu_sync()).unwrap();

    assert_eq!(runtime.stats().loads, 2);
    session.close();

    let stats = runtime.stats();
    assert_eq!(stats.unloads, 2, "close must unload each module once");
    assert_eq!(stats.resident_modules, 0);

    // Closed sessions reject new work...
    let err = session.jit(&sum_scaled(), &[], &cpu_sync()).unwrap_err();
    assert!(matches!(err, JitError::SessionClosed));

    // ...and closing again is a no-op.
    session.close();
    assert_eq!(runtime.stats().unloads, 2);

    // Outstanding invokables go stale rather than resurrecting modules.
    assert!(matches!(
        f.invoke(&[vec![1.0], vec![2.0]]),
        Err(InvokeError::StaleHandle { .. })
    ));
    drop(g);
}

#[test]
fn test_drop_closes_session() {
    let (engine, _compiler, runtime) = engine_with(1, 0);
    {
        let session = engine.session();
        session.jit(&sum_scaled(), &[], &cpu_sync()).unwrap();
        assert_eq!(runtime.stats().loads, 1);
    }
    assert_eq!(runtime.stats().unloads, 1);
    assert_eq!(runtime.stats().resident_modules, 0);
}

// Session pipelines

#[test]
fn test_session_pipeline_composes_with_call_steps() {
    let (engine, compiler, _runtime) = engine_with(1, 0);
    let session = engine.session_with_pipeline(Pipeline::new().with_step(Arc::new(Canonicalize)));

    // (x + 0) * 1 canonicalizes to x.
    let mut b = ProgramBuilder::new("noop_math");
    let x = b.input();
    let zero = b.constant(0.0);
    let one = b.constant(1.0);
    let xz = b.binary(BinaryOp::Add, x, zero);
    let r = b.binary(BinaryOp::Mul, xz, one);
    b.output(r);
    let program = b.build();

    let f = session.jit(&program, &[], &cpu_sync()).unwrap();
    let out = f.invoke(&[vec![7.0, -2.5]]).unwrap();
    assert_eq!(out, vec![vec![7.0, -2.5]]);
    assert_eq!(compiler.calls(), 1);

    // A structurally different source that canonicalizes identically hits
    // the same cache entry.
    let mut b = ProgramBuilder::new("noop_math_2");
    let x = b.input();
    let zero = b.constant(0.0);
    let xz = b.binary(BinaryOp::Add, x, zero);
    b.output(xz);
    let g = session.jit(&b.build(), &[], &cpu_sync()).unwrap();
    assert_eq!(f.key(), g.key());
    assert_eq!(compiler.calls(), 1);
}

#[test]
fn test_pinning_through_session() {
    let (engine, _compiler, _runtime) = engine_with(1, 0);
    let session = engine.session();
    let f = session.jit(&sum_scaled(), &[], &cpu_sync()).unwrap();

    assert!(session.pin(&f.key()));
    assert!(session.unpin(&f.key()));
    assert!(!session.pin(&CompilationKey::derive(
        &smelt::Digest::from_bytes([9; 32]),
        &[],
        &cpu_sync(),
        &smelt::Digest::from_bytes([0; 32]),
    )));
}
