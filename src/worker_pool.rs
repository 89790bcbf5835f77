// src/worker_pool.rs
//! CPU worker-pool execution.
//!
//! No tracing, caching or device work happens here. Elements may finish in
//! any order but land in an index-ordered output.

use std::ops::Range;

use offload_runtime::Value;
use rayon::prelude::*;

use crate::errors::EvalError;
use crate::fallback::{self, Elements};
use crate::function::CallTarget;

/// Evaluate every element on `pool`, keeping index order.
#[tracing::instrument(level = "debug", skip_all, fields(target = %target.id(), len = elements.len(), threads = pool.current_num_threads()))]
pub(crate) fn map(
    pool: &rayon::ThreadPool,
    target: &CallTarget,
    elements: &Elements<'_>,
) -> Result<Vec<Value>, EvalError> {
    let mut out = vec![Value::Null; elements.len()];
    pool.install(|| {
        out.par_iter_mut()
            .enumerate()
            .try_for_each(|(index, slot)| -> Result<(), EvalError> {
                *slot = target.call(&elements.args(index))?;
                Ok(())
            })
    })?;
    Ok(out)
}

/// Chunked reduction on `pool`.
///
/// Each chunk folds from `neutral`, then the partial results are combined in
/// chunk order. This matches the sequential fold when `f` is associative and
/// `neutral` is its identity. Calls with companions fold sequentially, since
/// partial results cannot be combined with companion elements.
#[tracing::instrument(level = "debug", skip_all, fields(target = %target.id(), len = elements.len(), threads = pool.current_num_threads()))]
pub(crate) fn reduce(
    pool: &rayon::ThreadPool,
    target: &CallTarget,
    elements: &Elements<'_>,
    neutral: &Value,
) -> Result<Value, EvalError> {
    let len = elements.len();
    if !elements.companions().is_empty() || len < 2 {
        return fallback::fold(target, elements, neutral.clone(), 0..len);
    }
    let chunk = len.div_ceil(pool.current_num_threads().max(1));
    let ranges: Vec<Range<usize>> = (0..len)
        .step_by(chunk)
        .map(|start| start..(start + chunk).min(len))
        .collect();
    let partials = pool.install(|| {
        ranges
            .into_par_iter()
            .map(|range| fallback::fold(target, elements, neutral.clone(), range))
            .collect::<Result<Vec<_>, _>>()
    })?;
    tracing::trace!(chunks = partials.len(), "combining partial results");
    partials
        .into_iter()
        .try_fold(neutral.clone(), |acc, partial| target.call(&[acc, partial]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Function;
    use offload_runtime::HostVector;

    fn pool(threads: usize) -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap()
    }

    fn add() -> CallTarget {
        Function::native(&["a", "b"], |args| match args {
            [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a + b)),
            _ => Err(EvalError::new("non-numeric argument to binary operator")),
        })
        .default_target()
    }

    #[test]
    fn map_keeps_index_order() {
        let x = HostVector::ints(0..1000);
        let elements = Elements::new(&x, &[]).unwrap();
        let square = Function::native(&["x"], |args| match args {
            [Value::Int(x)] => Ok(Value::Int(x * x)),
            _ => Err(EvalError::new("non-numeric argument")),
        })
        .default_target();
        let out = map(&pool(4), &square, &elements).unwrap();
        let expected: Vec<Value> = (0..1000).map(|i| Value::Int(i * i)).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn map_reports_errors() {
        let x = HostVector::list([Value::Int(1), Value::from("a")]);
        let elements = Elements::new(&x, &[]).unwrap();
        let f = Function::native(&["x"], |args| match args {
            [Value::Int(_)] => Ok(Value::Int(0)),
            _ => Err(EvalError::new("bad element")),
        })
        .default_target();
        assert_eq!(map(&pool(2), &f, &elements), Err(EvalError::new("bad element")));
    }

    #[test]
    fn reduce_matches_sequential_sum() {
        let x = HostVector::ints([1, 2, 3, 4]);
        let elements = Elements::new(&x, &[]).unwrap();
        assert_eq!(reduce(&pool(4), &add(), &elements, &Value::Int(0)), Ok(Value::Int(10)));
        assert_eq!(reduce(&pool(3), &add(), &elements, &Value::Int(0)), Ok(Value::Int(10)));
    }

    #[test]
    fn reduce_of_one_element() {
        let x = HostVector::ints([7]);
        let elements = Elements::new(&x, &[]).unwrap();
        assert_eq!(reduce(&pool(4), &add(), &elements, &Value::Int(0)), Ok(Value::Int(7)));
    }
}
