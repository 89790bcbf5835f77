// src/trigger.rs
//! Trace and compile trigger.
//!
//! Decides, per operator call, whether the elements run interpreted or on
//! the device:
//!
//! ```text
//! Interpreted -> TracePending -> Compiled -> Executing -> Complete
//!                                                     \-> Deoptimized
//! ```
//!
//! Element 0 always runs interpreted and seeds the output type. On a cache
//! hit the whole range is then redone on the device. On a miss the remaining
//! elements run interpreted and the graph provider is probed after each one;
//! once a graph appears it is shaped, compiled and installed, and the whole
//! range is redone on the device. Results are never merged across paths.

use std::fmt;
use std::sync::Arc;

use offload_jit::{
    CompilationUnit, Graph, JitError, JitResult, TraceId, detect_scope, shape,
};
use offload_runtime::{
    MarshaledArray, RuntimeResult, TypeDescriptor, Value, infer_output, infer_tuple, marshal,
};

use crate::context::RuntimeContext;
use crate::errors::{OffloadResult, render_to_string};
use crate::fallback::{self, Elements};
use crate::function::{CallTarget, Function};
use crate::options::ExecutionMode;
use crate::results::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerState {
    Interpreted,
    TracePending,
    Compiled,
    Executing,
    Complete,
    Deoptimized,
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriggerState::Interpreted => "interpreted",
            TriggerState::TracePending => "trace-pending",
            TriggerState::Compiled => "compiled",
            TriggerState::Executing => "executing",
            TriggerState::Complete => "complete",
            TriggerState::Deoptimized => "deoptimized",
        };
        f.write_str(name)
    }
}

fn enter(target: &CallTarget, state: TriggerState) {
    tracing::debug!(target = %target.id(), %state, "trigger state");
}

/// Run one map-style call through the trigger.
///
/// `input` is a columnar copy of `elements` made earlier, if there is one.
#[tracing::instrument(level = "debug", skip_all, fields(function = %function.id(), len = elements.len()))]
pub(crate) fn run(
    ctx: &mut RuntimeContext,
    function: &Function,
    elements: &Elements<'_>,
    input: Option<MarshaledArray>,
) -> OffloadResult<Outcome> {
    let input = match input {
        Some(array) => Some(array),
        None => marshal_input(elements)?,
    };
    let len = elements.len();
    let target = resolve_target(ctx, function);
    if len == 0 {
        return Ok(Outcome::Interpreted {
            values: Vec::new(),
            ty: None,
        });
    }

    enter(&target, TriggerState::Interpreted);
    let first = target.call(&elements.args(0))?;
    let output = match infer_output(&first) {
        Ok(ty) => Some(ty),
        Err(err) => {
            tracing::debug!(error = %err, "result type is not offloadable");
            None
        }
    };
    ctx.functions
        .record_sample(function.id(), first.clone(), output.clone());

    let (Some(input), Some(output)) = (input, output.clone()) else {
        return interpret_rest(&target, elements, first, output);
    };
    if !offload_enabled(ctx, function) {
        return interpret_rest(&target, elements, first, Some(output));
    }

    if ctx.functions.mark_candidate(function.id()) {
        ctx.graphs.mark_offload_candidate(target.id());
    }
    let trace = ctx.graphs.trace_identity(target.id());

    if let Some(unit) = ctx.units.get(trace) {
        if unit.input() == input.ty() && unit.output() == &output {
            tracing::debug!(%trace, "compilation unit cache hit");
            return execute(ctx, function, &target, elements, trace, &unit, &input);
        }
        tracing::debug!(
            %trace,
            unit_input = %unit.input(),
            call_input = %input.ty(),
            "cached unit does not match this call"
        );
        return interpret_rest(&target, elements, first, Some(output));
    }

    let mut values = Vec::with_capacity(len);
    values.push(first);
    let mut probing = true;
    for index in 1..len {
        values.push(target.call(&elements.args(index))?);
        if !probing {
            continue;
        }
        let Some(graph) = ctx.graphs.lowered_graph(trace) else {
            continue;
        };
        enter(&target, TriggerState::TracePending);
        match compile(ctx, trace, &graph, &target, input.ty(), &output) {
            Ok(unit) => {
                enter(&target, TriggerState::Compiled);
                return execute(ctx, function, &target, elements, trace, &unit, &input);
            }
            Err(err) if err.is_recoverable() => {
                tracing::warn!(%trace, error = %err, "kernel compilation failed, continuing interpreted");
                if ctx.options.dump_kernels {
                    tracing::debug!(%trace, report = %render_to_string(&err), "compile diagnostic");
                }
                probing = false;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(Outcome::Interpreted {
        values,
        ty: Some(output),
    })
}

/// Columnar input for the call, or `None` when the input is not offloadable.
fn marshal_input(elements: &Elements<'_>) -> RuntimeResult<Option<MarshaledArray>> {
    let ty = match infer_tuple(elements.primary(), elements.companions()) {
        Ok(ty) => ty,
        Err(err) if err.is_recoverable() => {
            tracing::debug!(error = %err, "input is not offloadable");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };
    marshal(elements.primary(), elements.companions(), &ty).map(Some)
}

/// Entry point for `function`, rewriting it with its scope the first time if enabled.
fn resolve_target(ctx: &mut RuntimeContext, function: &Function) -> CallTarget {
    let target = ctx.functions.lookup(function);
    if !ctx.options.specialize_scope || !ctx.functions.awaiting_specialization(function.id()) {
        return target;
    }
    ctx.functions.mark_specialization_tried(function.id());
    match target.body().specialize() {
        Some(rewritten) => ctx.functions.update(function, rewritten),
        None => target,
    }
}

fn offload_enabled(ctx: &RuntimeContext, function: &Function) -> bool {
    if ctx.options.execution != ExecutionMode::Offload {
        return false;
    }
    let deopts = ctx
        .functions
        .get(function.id())
        .map_or(0, |handle| handle.deopts());
    if deopts >= ctx.options.deopt_limit {
        tracing::debug!(function = %function.id(), deopts, "deopt limit reached, staying interpreted");
        return false;
    }
    true
}

fn interpret_rest(
    target: &CallTarget,
    elements: &Elements<'_>,
    first: Value,
    ty: Option<TypeDescriptor>,
) -> OffloadResult<Outcome> {
    let mut values = Vec::with_capacity(elements.len());
    values.push(first);
    values.extend(fallback::run(target, elements, 1..elements.len())?);
    Ok(Outcome::Interpreted { values, ty })
}

#[tracing::instrument(level = "debug", skip_all, fields(%trace))]
fn compile(
    ctx: &mut RuntimeContext,
    trace: TraceId,
    graph: &Graph,
    target: &CallTarget,
    input: &TypeDescriptor,
    output: &TypeDescriptor,
) -> JitResult<Arc<CompilationUnit>> {
    let shaped = shape(graph);
    if ctx.options.dump_kernels {
        tracing::debug!(%trace, graph = %shaped, "shaped graph");
    }
    let bindings = detect_scope(&shaped);
    let scope = target.body().captured_scope();
    let kernel = ctx.compiler.compile(&shaped, input, output, &scope)?;
    Ok(ctx.units.install(
        trace,
        CompilationUnit::new(kernel, input.clone(), output.clone(), scope, bindings),
    ))
}

fn execute(
    ctx: &mut RuntimeContext,
    function: &Function,
    target: &CallTarget,
    elements: &Elements<'_>,
    trace: TraceId,
    unit: &Arc<CompilationUnit>,
    input: &MarshaledArray,
) -> OffloadResult<Outcome> {
    enter(target, TriggerState::Executing);
    let reason = match launch(ctx, trace, unit, input) {
        Ok(Some(result)) => {
            enter(target, TriggerState::Complete);
            return Ok(Outcome::Device(result));
        }
        Ok(None) => "deopt flag set".to_string(),
        Err(err) if err.is_recoverable() => err.to_string(),
        Err(err) => return Err(err.into()),
    };
    enter(target, TriggerState::Deoptimized);
    let deopts = ctx.functions.record_deopt(function.id());
    tracing::warn!(%trace, deopts, %reason, "device execution abandoned, rerunning interpreted");
    let values = fallback::run(target, elements, 0..elements.len())?;
    Ok(Outcome::Interpreted {
        values,
        ty: Some(unit.output().clone()),
    })
}

/// Copy in, launch, copy out. `None` when the kernel asked for a deopt.
fn launch(
    ctx: &mut RuntimeContext,
    trace: TraceId,
    unit: &Arc<CompilationUnit>,
    input: &MarshaledArray,
) -> Result<Option<MarshaledArray>, JitError> {
    let device = Arc::clone(&ctx.device);
    let executor = ctx.executors.get_or_create(trace, unit, &device);
    executor.copy_to_device(input)?;
    executor.execute_on_device()?;
    let result = executor.copy_to_host()?;
    if executor.deopt_flag()? {
        return Ok(None);
    }
    Ok(Some(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_jit::{BinaryOp, HostDevice, HostKernelCompiler, ScriptedGraphProvider};
    use offload_runtime::{HostVector, Scalar};

    use crate::errors::EvalError;
    use crate::options::OffloadOptions;

    fn increment() -> Function {
        Function::native(&["x"], |args| match args {
            [Value::Int(x)] => x
                .checked_add(1)
                .map(Value::Int)
                .ok_or_else(|| EvalError::new("integer overflow")),
            _ => Err(EvalError::new("non-numeric argument")),
        })
    }

    fn increment_graph() -> Graph {
        let mut b = Graph::builder();
        let x = b.param(0);
        let one = b.constant(Scalar::Int(1));
        let sum = b.binary(BinaryOp::Add, x, one);
        b.finish(&[sum]).unwrap()
    }

    struct Harness {
        ctx: RuntimeContext,
        graphs: Arc<ScriptedGraphProvider>,
        compiler: Arc<HostKernelCompiler>,
        device: Arc<HostDevice>,
    }

    fn harness(options: OffloadOptions) -> Harness {
        let graphs = Arc::new(ScriptedGraphProvider::new());
        let compiler = Arc::new(HostKernelCompiler::new());
        let device = Arc::new(HostDevice::new());
        let ctx = RuntimeContext::builder(options)
            .graph_provider(graphs.clone())
            .kernel_compiler(compiler.clone())
            .device(device.clone())
            .build();
        Harness {
            ctx,
            graphs,
            compiler,
            device,
        }
    }

    fn run_once(h: &mut Harness, f: &Function, x: &HostVector) -> Outcome {
        let elements = Elements::new(x, &[]).unwrap();
        run(&mut h.ctx, f, &elements, None).unwrap()
    }

    #[test]
    fn no_graph_stays_interpreted() {
        let mut h = harness(OffloadOptions::default());
        let f = increment();
        let out = run_once(&mut h, &f, &HostVector::ints([1, 2, 3]));
        let Outcome::Interpreted { values, ty } = out else {
            panic!("expected interpreted outcome");
        };
        assert_eq!(values, vec![Value::Int(2), Value::Int(3), Value::Int(4)]);
        assert_eq!(ty, Some(TypeDescriptor::Int));
        assert_eq!(h.graphs.mark_count(), 1);
    }

    #[test]
    fn graph_compiles_once_and_is_reused() {
        let mut h = harness(OffloadOptions::default());
        let f = increment();
        let trace = h.graphs.register(f.id(), increment_graph(), 2);
        let x = HostVector::ints([1, 2, 3]);

        let first = run_once(&mut h, &f, &x);
        assert!(matches!(first, Outcome::Device(_)));
        assert_eq!(h.compiler.compile_count(), 1);
        assert_eq!(h.graphs.probe_count(trace), 2);

        let second = run_once(&mut h, &f, &x);
        let Outcome::Device(array) = second else {
            panic!("expected device outcome");
        };
        assert_eq!(array.value_at(2), Some(Value::Int(4)));
        assert_eq!(h.compiler.compile_count(), 1);
        assert_eq!(h.graphs.probe_count(trace), 2);
        assert_eq!(h.device.launch_count(), 2);
        assert_eq!(h.ctx.units.len(), 1);
    }

    #[test]
    fn forced_deopt_reruns_interpreted() {
        let mut h = harness(OffloadOptions::default());
        let f = increment();
        h.graphs.register(f.id(), increment_graph(), 1);
        h.device.set_force_deopt(true);
        let out = run_once(&mut h, &f, &HostVector::ints([1, 2, 3]));
        let Outcome::Interpreted { values, .. } = out else {
            panic!("expected interpreted outcome");
        };
        assert_eq!(values, vec![Value::Int(2), Value::Int(3), Value::Int(4)]);
        assert_eq!(h.ctx.functions.get(f.id()).unwrap().deopts(), 1);
    }

    #[test]
    fn deopt_limit_disables_offload() {
        let mut h = harness(OffloadOptions::default().with_deopt_limit(1));
        let f = increment();
        h.graphs.register(f.id(), increment_graph(), 1);
        h.device.set_force_deopt(true);
        let x = HostVector::ints([1, 2, 3]);
        run_once(&mut h, &f, &x);
        assert_eq!(h.device.launch_count(), 1);
        h.device.set_force_deopt(false);
        let out = run_once(&mut h, &f, &x);
        assert!(matches!(out, Outcome::Interpreted { .. }));
        assert_eq!(h.device.launch_count(), 1);
    }

    #[test]
    fn compile_failure_keeps_interpreting() {
        let mut h = harness(OffloadOptions::default().with_kernel_dump(true));
        let f = increment();
        let mut b = Graph::builder();
        let x = b.param(0);
        let t = b.constant(Scalar::Bool(true));
        let bad = b.binary(BinaryOp::And, x, t);
        h.graphs.register(f.id(), b.finish(&[bad]).unwrap(), 1);
        let out = run_once(&mut h, &f, &HostVector::ints([1, 2, 3]));
        let Outcome::Interpreted { values, .. } = out else {
            panic!("expected interpreted outcome");
        };
        assert_eq!(values.len(), 3);
        assert_eq!(h.compiler.compile_count(), 0);
        assert!(h.ctx.units.is_empty());
    }

    #[test]
    fn string_results_are_not_offloaded() {
        let mut h = harness(OffloadOptions::default());
        let f = Function::native(&["x"], |_| Ok(Value::from("s")));
        h.graphs.register(f.id(), increment_graph(), 1);
        let out = run_once(&mut h, &f, &HostVector::ints([1, 2]));
        assert!(matches!(out, Outcome::Interpreted { ty: None, .. }));
        assert_eq!(h.graphs.mark_count(), 0);
    }

    #[test]
    fn empty_input_calls_nothing() {
        let mut h = harness(OffloadOptions::default());
        let f = Function::native(&["x"], |_| Err(EvalError::new("called")));
        let out = run_once(&mut h, &f, &HostVector::ints([]));
        assert!(matches!(out, Outcome::Interpreted { ref values, ty: None } if values.is_empty()));
    }

    #[test]
    fn specialization_rewrites_target() {
        use crate::function::NativeFunction;
        let mut h = harness(OffloadOptions::default().with_scope_specialization(true));
        let rewritten = NativeFunction::new(&["x"], |args| Ok(args[0].clone()));
        let f = Function::new(
            NativeFunction::new(&["x"], |args| Ok(args[0].clone()))
                .with_scope([Value::Int(1)])
                .with_specialization(rewritten),
        );
        run_once(&mut h, &f, &HostVector::ints([1, 2]));
        let handle = h.ctx.functions.get(f.id()).unwrap();
        assert!(handle.is_specialized());
        assert_ne!(handle.target().id(), f.id());
    }
}
