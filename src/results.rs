// src/results.rs
//! Turning operator results into host vectors.

use offload_runtime::{
    HostVector, MarshaledArray, Materialization, RuntimeResult, TypeDescriptor, UnmarshalSource,
    Value, unmarshal, unmarshal_with,
};

/// What the trigger produced for one call.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// Read back from the device; its descriptor is the unit's output type.
    Device(MarshaledArray),
    /// Boxed results of the interpreted path with the type inferred from element 0.
    Interpreted {
        values: Vec<Value>,
        ty: Option<TypeDescriptor>,
    },
}

impl Outcome {
    pub(crate) fn into_host(self, materialization: Materialization) -> RuntimeResult<HostVector> {
        match self {
            Outcome::Device(array) => {
                unmarshal_with(array.ty(), UnmarshalSource::Marshaled(&array), materialization)
            }
            Outcome::Interpreted { values, ty } => Ok(from_values(values, ty.as_ref())),
        }
    }
}

/// Host vector for interpreted results.
///
/// Uses `ty` when every value fits it, widens Int to Double when the results
/// mix the two, and otherwise gives a list. An empty result with no known type
/// is an empty double vector.
pub(crate) fn from_values(values: Vec<Value>, ty: Option<&TypeDescriptor>) -> HostVector {
    let Some(ty) = ty else {
        if values.is_empty() {
            return HostVector::doubles([]);
        }
        return HostVector::list(values);
    };
    if let Ok(vector) = unmarshal(ty, UnmarshalSource::Values(&values)) {
        return vector;
    }
    if *ty == TypeDescriptor::Int
        && let Ok(vector) = unmarshal(&TypeDescriptor::Double, UnmarshalSource::Values(&values))
    {
        tracing::trace!("widened integer results to double");
        return vector;
    }
    tracing::debug!(ty = %ty, "results do not share one type, returning a list");
    HostVector::list(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_runtime::{ScalarKind, marshal};

    #[test]
    fn typed_values_unmarshal() {
        let out = from_values(vec![Value::Int(2), Value::Int(3)], Some(&TypeDescriptor::Int));
        assert_eq!(out, HostVector::ints([2, 3]));
    }

    #[test]
    fn mixed_numbers_widen() {
        let out = from_values(
            vec![Value::Int(2), Value::Double(2.5)],
            Some(&TypeDescriptor::Int),
        );
        assert_eq!(out, HostVector::doubles([2.0, 2.5]));
    }

    #[test]
    fn heterogeneous_values_become_list() {
        let values = vec![Value::Int(1), Value::from("b")];
        let out = from_values(values.clone(), Some(&TypeDescriptor::Int));
        assert_eq!(out, HostVector::list(values.clone()));
        assert_eq!(from_values(values.clone(), None), HostVector::list(values));
    }

    #[test]
    fn empty_untyped_is_double() {
        assert_eq!(from_values(Vec::new(), None), HostVector::doubles([]));
    }

    #[test]
    fn tuples_become_rows() {
        let ty = TypeDescriptor::tuple([ScalarKind::Int, ScalarKind::Boolean]).unwrap();
        let row = Value::List(vec![Value::Int(1), Value::Bool(true)]);
        let out = from_values(vec![row.clone()], Some(&ty));
        assert_eq!(out, HostVector::list([row]));
    }

    #[test]
    fn device_outcome_honours_materialization() {
        let x = HostVector::doubles([1.0, 2.0]);
        let array = marshal(&x, &[], &TypeDescriptor::Double).unwrap();
        let view = Outcome::Device(array.clone())
            .into_host(Materialization::View)
            .unwrap();
        assert!(view.shares_storage(&x));
        let copy = Outcome::Device(array).into_host(Materialization::Copy).unwrap();
        assert_eq!(copy, x);
        assert!(!copy.shares_storage(&x));
    }
}
