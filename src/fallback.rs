// src/fallback.rs
//! The interpreted path.
//!
//! Every offloaded call can be redone here element by element. The only
//! failures are ordinary evaluation errors raised by the user function.

use std::ops::Range;

use offload_runtime::{HostVector, MAX_TUPLE_ARITY, RuntimeResult, RuntimeTypeError, Value};
use smallvec::SmallVec;

use crate::errors::EvalError;
use crate::function::CallTarget;

/// Arguments for one call: the elements at one index, plus a reduce accumulator.
pub(crate) type Args = SmallVec<[Value; MAX_TUPLE_ARITY + 1]>;

/// A primary vector zipped with its companions.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Elements<'a> {
    primary: &'a HostVector,
    companions: &'a [HostVector],
}

impl<'a> Elements<'a> {
    /// Check arity and companion lengths.
    pub(crate) fn new(primary: &'a HostVector, companions: &'a [HostVector]) -> RuntimeResult<Self> {
        let arity = 1 + companions.len();
        if arity > MAX_TUPLE_ARITY {
            return Err(RuntimeTypeError::UnsupportedArity { arity });
        }
        for (i, companion) in companions.iter().enumerate() {
            if companion.len() != primary.len() {
                return Err(RuntimeTypeError::LengthMismatch {
                    position: i + 1,
                    expected: primary.len(),
                    found: companion.len(),
                });
            }
        }
        Ok(Self {
            primary,
            companions,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.primary.len()
    }

    pub(crate) fn primary(&self) -> &'a HostVector {
        self.primary
    }

    pub(crate) fn companions(&self) -> &'a [HostVector] {
        self.companions
    }

    pub(crate) fn args(&self, index: usize) -> Args {
        std::iter::once(self.primary)
            .chain(self.companions)
            .filter_map(|v| v.get(index))
            .collect()
    }

    /// Arguments for a reduce step: accumulator first.
    pub(crate) fn args_after(&self, acc: Value, index: usize) -> Args {
        let mut args = Args::new();
        args.push(acc);
        args.extend(
            std::iter::once(self.primary)
                .chain(self.companions)
                .filter_map(|v| v.get(index)),
        );
        args
    }
}

/// Evaluate `range` in order.
#[tracing::instrument(level = "debug", skip_all, fields(target = %target.id(), start = range.start, end = range.end))]
pub(crate) fn run(
    target: &CallTarget,
    elements: &Elements<'_>,
    range: Range<usize>,
) -> Result<Vec<Value>, EvalError> {
    let mut out = Vec::with_capacity(range.len());
    for index in range {
        let value = target.call(&elements.args(index))?;
        tracing::trace!(index, value = ?value, "interpreted element");
        out.push(value);
    }
    Ok(out)
}

/// Left fold over `range`: `acc = f(acc, x[i], companions[i]...)`.
pub(crate) fn fold(
    target: &CallTarget,
    elements: &Elements<'_>,
    init: Value,
    range: Range<usize>,
) -> Result<Value, EvalError> {
    range.into_iter().try_fold(init, |acc, index| {
        target.call(&elements.args_after(acc, index))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Function;

    fn add() -> CallTarget {
        Function::native(&["a", "b"], |args| match args {
            [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a + b)),
            _ => Err(EvalError::new("non-numeric argument to binary operator")),
        })
        .default_target()
    }

    #[test]
    fn companions_zip_into_args() {
        let x = HostVector::ints([1, 2]);
        let y = HostVector::doubles([0.5, 1.5]);
        let companions = [y];
        let elements = Elements::new(&x, &companions).unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(
            elements.args(1).as_slice(),
            &[Value::Int(2), Value::Double(1.5)]
        );
        assert_eq!(
            elements.args_after(Value::Int(0), 0).as_slice(),
            &[Value::Int(0), Value::Int(1), Value::Double(0.5)]
        );
    }

    #[test]
    fn length_and_arity_are_checked() {
        let x = HostVector::ints([1, 2]);
        let short = [HostVector::ints([1])];
        assert!(matches!(
            Elements::new(&x, &short),
            Err(RuntimeTypeError::LengthMismatch { position: 1, .. })
        ));
        let many = vec![HostVector::ints([1, 2]); 4];
        assert!(matches!(
            Elements::new(&x, &many),
            Err(RuntimeTypeError::UnsupportedArity { arity: 5 })
        ));
    }

    #[test]
    fn run_covers_range_in_order() {
        let x = HostVector::ints([1, 2, 3, 4]);
        let y = HostVector::ints([10, 20, 30, 40]);
        let companions = [y];
        let elements = Elements::new(&x, &companions).unwrap();
        let out = run(&add(), &elements, 1..3).unwrap();
        assert_eq!(out, vec![Value::Int(22), Value::Int(33)]);
    }

    #[test]
    fn sequences_index_like_dense_vectors() {
        let seq = HostVector::range(1, 4);
        let dense = HostVector::ints([1, 2, 3, 4]);
        let companions = [dense.clone()];
        let elements = Elements::new(&seq, &companions).unwrap();
        let out = run(&add(), &elements, 0..4).unwrap();
        assert_eq!(
            out,
            vec![Value::Int(2), Value::Int(4), Value::Int(6), Value::Int(8)]
        );
        let seq_only = Elements::new(&seq, &[]).unwrap();
        let dense_only = Elements::new(&dense, &[]).unwrap();
        assert_eq!(
            fold(&add(), &seq_only, Value::Int(0), 0..4),
            fold(&add(), &dense_only, Value::Int(0), 0..4)
        );
    }

    #[test]
    fn fold_sums() {
        let x = HostVector::ints([1, 2, 3, 4]);
        let elements = Elements::new(&x, &[]).unwrap();
        assert_eq!(fold(&add(), &elements, Value::Int(0), 0..4), Ok(Value::Int(10)));
        assert_eq!(fold(&add(), &elements, Value::Int(5), 0..0), Ok(Value::Int(5)));
    }

    #[test]
    fn eval_errors_propagate() {
        let x = HostVector::list([Value::Int(1), Value::from("a")]);
        let elements = Elements::new(&x, &[]).unwrap();
        let err = fold(&add(), &elements, Value::Int(0), 0..2).unwrap_err();
        assert!(err.message.contains("non-numeric"));
    }
}
