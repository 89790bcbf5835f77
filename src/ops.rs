// src/ops.rs
//! Operator entry points.
//!
//! `map` and `apply` run eagerly on vectors. `reduce` and `pending_map`
//! record composition stages that run when [`execute`] is called (or at once
//! in eager composition mode). `terminal_reduce` blocks and returns a
//! one-element vector.

use offload_jit::DeviceInfo;
use offload_runtime::{HostVector, MarshaledArray, TypeDescriptor, Value, infer_output, infer_tuple, marshal};

use crate::composition::{CompositionHandle, PendingComposition, Stage, StageInput};
use crate::context::RuntimeContext;
use crate::errors::{OffloadError, OffloadResult};
use crate::fallback::{self, Args, Elements};
use crate::function::Function;
use crate::options::{CompositionMode, ExecutionMode};
use crate::results;
use crate::trigger;
use crate::worker_pool;

/// An operator input: data, or the pending result of a composition stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Vector(HostVector),
    Pending(CompositionHandle),
}

impl Operand {
    pub fn into_vector(self) -> Option<HostVector> {
        match self {
            Operand::Vector(v) => Some(v),
            Operand::Pending(_) => None,
        }
    }

    pub fn as_pending(&self) -> Option<CompositionHandle> {
        match self {
            Operand::Vector(_) => None,
            Operand::Pending(handle) => Some(*handle),
        }
    }
}

impl From<HostVector> for Operand {
    fn from(v: HostVector) -> Self {
        Operand::Vector(v)
    }
}

impl From<CompositionHandle> for Operand {
    fn from(handle: CompositionHandle) -> Self {
        Operand::Pending(handle)
    }
}

// ============================================================================
// Eager operators
// ============================================================================

/// Apply `f` to every element of `x` zipped with `companions`.
///
/// A vector runs now, through the trace and compile trigger or on the worker
/// pool. A pending stage gets a lazy map stage appended and the new handle back.
#[tracing::instrument(level = "debug", skip_all, fields(function = %f.id()))]
pub fn map(
    ctx: &mut RuntimeContext,
    x: impl Into<Operand>,
    f: &Function,
    companions: &[HostVector],
) -> OffloadResult<Operand> {
    check_arity(f, 1 + companions.len())?;
    match x.into() {
        Operand::Vector(v) => map_vector(ctx, f, &v, companions, None).map(Operand::Vector),
        Operand::Pending(parent) => {
            let input = StageInput::Parent {
                parent,
                companions: companions.to_vec(),
            };
            register(ctx, Stage::Map, f, input).map(Operand::Pending)
        }
    }
}

/// sapply-style map on a pool of `workers` threads; `workers <= 1` runs sequentially.
#[tracing::instrument(level = "debug", skip_all, fields(function = %f.id(), workers = workers))]
pub fn apply(
    ctx: &mut RuntimeContext,
    x: &HostVector,
    f: &Function,
    workers: usize,
    companions: &[HostVector],
) -> OffloadResult<HostVector> {
    check_arity(f, 1 + companions.len())?;
    let elements = Elements::new(x, companions)?;
    let target = ctx.functions.lookup(f);
    let values = if workers <= 1 {
        fallback::run(&target, &elements, 0..elements.len())?
    } else {
        let pool = ctx.pool(workers)?;
        worker_pool::map(&pool, &target, &elements)?
    };
    Ok(interpreted(values))
}

/// Fold `x` with `f` starting from `neutral`; blocks and returns a one-element vector.
#[tracing::instrument(level = "debug", skip_all, fields(function = %f.id()))]
pub fn terminal_reduce(
    ctx: &mut RuntimeContext,
    x: impl Into<Operand>,
    f: &Function,
    neutral: Value,
    companions: &[HostVector],
) -> OffloadResult<HostVector> {
    check_arity(f, 2 + companions.len())?;
    let x = match x.into() {
        Operand::Vector(v) => v,
        Operand::Pending(handle) => execute(ctx, handle)?,
    };
    reduce_vector(ctx, f, &x, companions, &neutral, None)
}

pub fn device_info(ctx: &RuntimeContext) -> DeviceInfo {
    ctx.device_info()
}

// ============================================================================
// Composition
// ============================================================================

/// Start a chain with a map stage over `x`.
#[tracing::instrument(level = "debug", skip_all, fields(function = %f.id()))]
pub fn pending_map(
    ctx: &mut RuntimeContext,
    x: &HostVector,
    f: &Function,
    companions: &[HostVector],
) -> OffloadResult<CompositionHandle> {
    check_arity(f, 1 + companions.len())?;
    let elements = Elements::new(x, companions)?;
    let marshaled = snapshot(&elements)?;
    let input = StageInput::Source {
        primary: x.clone(),
        companions: companions.to_vec(),
        marshaled,
    };
    register(ctx, Stage::Map, f, input)
}

/// Register a reduce stage: `acc = f(acc, x[i], companions[i]...)` from `neutral`.
#[tracing::instrument(level = "debug", skip_all, fields(function = %f.id()))]
pub fn reduce(
    ctx: &mut RuntimeContext,
    x: impl Into<Operand>,
    f: &Function,
    neutral: Value,
    companions: &[HostVector],
) -> OffloadResult<CompositionHandle> {
    check_arity(f, 2 + companions.len())?;
    let input = match x.into() {
        Operand::Vector(primary) => {
            Elements::new(&primary, companions)?;
            StageInput::Source {
                primary,
                companions: companions.to_vec(),
                marshaled: None,
            }
        }
        Operand::Pending(parent) => StageInput::Parent {
            parent,
            companions: companions.to_vec(),
        },
    };
    register(ctx, Stage::Reduce { neutral }, f, input)
}

/// Materialize the chain ending at `handle`, then clear it.
///
/// A chain runs once. Stages shared with another pending branch stay
/// registered until that branch is executed.
#[tracing::instrument(level = "debug", skip(ctx))]
pub fn execute(ctx: &mut RuntimeContext, handle: CompositionHandle) -> OffloadResult<HostVector> {
    let result = materialize(ctx, handle);
    ctx.compositions.clean_chain(handle);
    result
}

fn register(
    ctx: &mut RuntimeContext,
    stage: Stage,
    f: &Function,
    input: StageInput,
) -> OffloadResult<CompositionHandle> {
    let sample = sample_of(ctx, &stage, f, &input)?;
    let output = sample.as_ref().and_then(|s| infer_output(s).ok());
    let composition = PendingComposition::new(stage, f.clone(), input, sample, output);
    let handle = match ctx.options.composition {
        CompositionMode::Deferred => ctx.compositions.add_promise(composition),
        CompositionMode::Eager => {
            let result = compute(ctx, &composition)?;
            ctx.compositions.add_future(composition, result)
        }
    };
    Ok(handle)
}

/// The stage's result for the first element of its input, if there is one.
fn sample_of(
    ctx: &mut RuntimeContext,
    stage: &Stage,
    f: &Function,
    input: &StageInput,
) -> OffloadResult<Option<Value>> {
    let first = match input {
        StageInput::Source { primary, .. } => primary.get(0),
        StageInput::Parent { parent, .. } => ctx
            .compositions
            .get(*parent)
            .ok_or(OffloadError::UnknownComposition {
                handle: parent.index(),
            })?
            .sample()
            .cloned(),
    };
    let Some(first) = first else {
        return Ok(None);
    };
    let mut args = Args::new();
    if let Stage::Reduce { neutral } = stage {
        args.push(neutral.clone());
    }
    args.push(first);
    args.extend(input.companions().iter().filter_map(|c| c.get(0)));
    let target = ctx.functions.lookup(f);
    Ok(Some(target.call(&args)?))
}

fn materialize(ctx: &mut RuntimeContext, handle: CompositionHandle) -> OffloadResult<HostVector> {
    let composition = ctx
        .compositions
        .get(handle)
        .ok_or(OffloadError::UnknownComposition {
            handle: handle.index(),
        })?
        .clone();
    if let Some(result) = composition.result() {
        return Ok(result.clone());
    }
    let result = compute(ctx, &composition)?;
    ctx.compositions.memoize(handle, result.clone());
    Ok(result)
}

fn compute(ctx: &mut RuntimeContext, composition: &PendingComposition) -> OffloadResult<HostVector> {
    let (primary, marshaled) = match composition.input() {
        StageInput::Source {
            primary, marshaled, ..
        } => (primary.clone(), marshaled.clone()),
        StageInput::Parent { parent, .. } => (materialize(ctx, *parent)?, None),
    };
    let companions = composition.input().companions();
    match composition.stage() {
        Stage::Map => map_vector(ctx, composition.function(), &primary, companions, marshaled),
        Stage::Reduce { neutral } => reduce_vector(
            ctx,
            composition.function(),
            &primary,
            companions,
            neutral,
            composition.output(),
        ),
    }
}

// ============================================================================
// Shared paths
// ============================================================================

fn check_arity(f: &Function, supplied: usize) -> OffloadResult<()> {
    if f.arity() != supplied {
        return Err(OffloadError::ArgumentCount {
            expected: f.arity(),
            found: supplied,
        });
    }
    Ok(())
}

/// Columnar copy of the input when it is offloadable.
fn snapshot(elements: &Elements<'_>) -> OffloadResult<Option<MarshaledArray>> {
    match infer_tuple(elements.primary(), elements.companions()) {
        Ok(ty) => Ok(Some(marshal(elements.primary(), elements.companions(), &ty)?)),
        Err(err) if err.is_recoverable() => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn map_vector(
    ctx: &mut RuntimeContext,
    f: &Function,
    x: &HostVector,
    companions: &[HostVector],
    marshaled: Option<MarshaledArray>,
) -> OffloadResult<HostVector> {
    let elements = Elements::new(x, companions)?;
    if let ExecutionMode::WorkerPool { threads } = ctx.options.execution {
        let target = ctx.functions.lookup(f);
        let pool = ctx.pool(threads)?;
        let values = worker_pool::map(&pool, &target, &elements)?;
        return Ok(interpreted(values));
    }
    let outcome = trigger::run(ctx, f, &elements, marshaled)?;
    Ok(outcome.into_host(ctx.options.materialization)?)
}

fn reduce_vector(
    ctx: &mut RuntimeContext,
    f: &Function,
    x: &HostVector,
    companions: &[HostVector],
    neutral: &Value,
    ty: Option<&TypeDescriptor>,
) -> OffloadResult<HostVector> {
    let elements = Elements::new(x, companions)?;
    let target = ctx.functions.lookup(f);
    let value = match ctx.options.execution {
        ExecutionMode::WorkerPool { threads } if threads > 1 => {
            let pool = ctx.pool(threads)?;
            worker_pool::reduce(&pool, &target, &elements, neutral)?
        }
        _ => fallback::fold(&target, &elements, neutral.clone(), 0..elements.len())?,
    };
    let inferred = infer_output(&value).ok();
    Ok(results::from_values(vec![value], ty.or(inferred.as_ref())))
}

/// Host vector for interpreted results typed by their first element.
fn interpreted(values: Vec<Value>) -> HostVector {
    let ty = values.first().and_then(|v| infer_output(v).ok());
    results::from_values(values, ty.as_ref())
}
