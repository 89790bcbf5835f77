// crates/offload-runtime/src/marshal.rs
//! Row-oriented host vectors to columnar device buffers and back.
//!
//! A `MarshaledArray` is a struct-of-columns: one column for a scalar
//! descriptor, one column per field for a tuple. Every column holds exactly
//! `len` elements. Columns that already have the right element kind share the
//! host vector's storage instead of copying it, and integer sequences travel as
//! start and stride.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::errors::{RuntimeResult, RuntimeTypeError};
use crate::types::{MAX_TUPLE_ARITY, ScalarKind, TypeDescriptor};
use crate::value::{HostVector, IntSequence, Scalar, Value};

/// One device column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int(Arc<[i32]>),
    Double(Arc<[f64]>),
    Boolean(Arc<[bool]>),
    /// Int column described by start and stride.
    IntSequence(IntSequence),
}

impl Column {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Column::Int(_) | Column::IntSequence(_) => ScalarKind::Int,
            Column::Double(_) => ScalarKind::Double,
            Column::Boolean(_) => ScalarKind::Boolean,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Int(c) => c.len(),
            Column::Double(c) => c.len(),
            Column::Boolean(c) => c.len(),
            Column::IntSequence(seq) => seq.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Scalar> {
        match self {
            Column::Int(c) => c.get(index).copied().map(Scalar::Int),
            Column::Double(c) => c.get(index).copied().map(Scalar::Double),
            Column::Boolean(c) => c.get(index).copied().map(Scalar::Bool),
            Column::IntSequence(seq) => seq.get(index).map(Scalar::Int),
        }
    }

    /// Collect scalars of the given kind into a column.
    ///
    /// Ints widen into a Double column; every other mismatch is reported with
    /// the offending row.
    pub fn from_scalars(
        kind: ScalarKind,
        scalars: impl IntoIterator<Item = Scalar>,
    ) -> RuntimeResult<Self> {
        let scalars = scalars.into_iter().enumerate();
        let mismatch = |index: usize, found: Scalar| RuntimeTypeError::ElementType {
            index,
            expected: kind.name(),
            found: Value::from(found).type_name(),
        };
        Ok(match kind {
            ScalarKind::Int => Column::Int(
                scalars
                    .map(|(i, s)| match s {
                        Scalar::Int(v) => Ok(v),
                        other => Err(mismatch(i, other)),
                    })
                    .collect::<RuntimeResult<_>>()?,
            ),
            ScalarKind::Double => Column::Double(
                scalars
                    .map(|(i, s)| match s {
                        Scalar::Double(v) => Ok(v),
                        Scalar::Int(v) => Ok(f64::from(v)),
                        other => Err(mismatch(i, other)),
                    })
                    .collect::<RuntimeResult<_>>()?,
            ),
            ScalarKind::Boolean => Column::Boolean(
                scalars
                    .map(|(i, s)| match s {
                        Scalar::Bool(v) => Ok(v),
                        other => Err(mismatch(i, other)),
                    })
                    .collect::<RuntimeResult<_>>()?,
            ),
        })
    }

    fn to_host(&self, materialization: Materialization) -> HostVector {
        match (self, materialization) {
            (Column::Int(c), Materialization::View) => HostVector::Int(Arc::clone(c)),
            (Column::Double(c), Materialization::View) => HostVector::Double(Arc::clone(c)),
            (Column::Boolean(c), Materialization::View) => HostVector::Logical(Arc::clone(c)),
            (Column::Int(c), Materialization::Copy) => HostVector::Int(Arc::from(&c[..])),
            (Column::Double(c), Materialization::Copy) => HostVector::Double(Arc::from(&c[..])),
            (Column::Boolean(c), Materialization::Copy) => {
                HostVector::Logical(Arc::from(&c[..]))
            }
            (Column::IntSequence(seq), _) => HostVector::Sequence(*seq),
        }
    }
}

/// Columnar buffer plus its descriptor and logical length.
#[derive(Debug, Clone, PartialEq)]
pub struct MarshaledArray {
    ty: TypeDescriptor,
    columns: SmallVec<[Column; MAX_TUPLE_ARITY]>,
    len: usize,
}

impl MarshaledArray {
    /// Assemble an array from columns, checking kinds and lengths against `ty`.
    pub fn new(
        ty: TypeDescriptor,
        columns: impl IntoIterator<Item = Column>,
    ) -> RuntimeResult<Self> {
        let columns: SmallVec<[Column; MAX_TUPLE_ARITY]> = columns.into_iter().collect();
        let kinds = ty.column_kinds();
        if columns.len() != kinds.len() {
            return Err(RuntimeTypeError::unsupported(
                &ty,
                format!("{} column(s)", columns.len()),
            ));
        }
        for (column, kind) in columns.iter().zip(kinds.iter()) {
            if column.kind() != *kind {
                return Err(RuntimeTypeError::unsupported(kind, column.kind()));
            }
        }
        let len = columns.first().map_or(0, Column::len);
        for (position, column) in columns.iter().enumerate().skip(1) {
            if column.len() != len {
                return Err(RuntimeTypeError::LengthMismatch {
                    position,
                    expected: len,
                    found: column.len(),
                });
            }
        }
        Ok(Self { ty, columns, len })
    }

    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// The single column of a scalar array.
    pub fn scalar_column(&self) -> RuntimeResult<&Column> {
        match (&self.ty, self.columns.first()) {
            (TypeDescriptor::Tuple(_), _) | (_, None) => Err(RuntimeTypeError::unsupported(
                "a scalar buffer",
                &self.ty,
            )),
            (_, Some(column)) => Ok(column),
        }
    }

    /// The unboxed fields of row `index`.
    pub fn row(&self, index: usize) -> Option<SmallVec<[Scalar; MAX_TUPLE_ARITY]>> {
        self.columns.iter().map(|c| c.get(index)).collect()
    }

    /// Row `index` boxed as a host value; tuples become lists.
    pub fn value_at(&self, index: usize) -> Option<Value> {
        let row = self.row(index)?;
        Some(match self.ty {
            TypeDescriptor::Tuple(_) => Value::List(row.into_iter().map(Value::from).collect()),
            _ => Value::from(*row.first()?),
        })
    }
}

// ============================================================================
// Marshal
// ============================================================================

/// Convert a primary vector and its companions to columnar form.
///
/// `ty` is the descriptor from [`crate::infer_tuple`] (or a wider one: an Int
/// vector marshals into a Double column).
#[tracing::instrument(level = "trace", skip_all, fields(ty = %ty, len = vector.len()))]
pub fn marshal(
    vector: &HostVector,
    companions: &[HostVector],
    ty: &TypeDescriptor,
) -> RuntimeResult<MarshaledArray> {
    let arity = 1 + companions.len();
    if arity > MAX_TUPLE_ARITY {
        return Err(RuntimeTypeError::UnsupportedArity { arity });
    }
    let kinds = ty.column_kinds();
    if kinds.len() != arity {
        return Err(RuntimeTypeError::unsupported(ty, format!("{arity} vector(s)")));
    }
    let len = vector.len();
    let mut columns = SmallVec::<[Column; MAX_TUPLE_ARITY]>::new();
    for (position, (source, kind)) in std::iter::once(vector)
        .chain(companions)
        .zip(kinds.iter().copied())
        .enumerate()
    {
        if source.len() != len {
            return Err(RuntimeTypeError::LengthMismatch {
                position,
                expected: len,
                found: source.len(),
            });
        }
        columns.push(column_of(source, kind)?);
    }
    Ok(MarshaledArray {
        ty: ty.clone(),
        columns,
        len,
    })
}

fn column_of(source: &HostVector, kind: ScalarKind) -> RuntimeResult<Column> {
    match (source, kind) {
        (HostVector::Int(v), ScalarKind::Int) => Ok(Column::Int(Arc::clone(v))),
        (HostVector::Double(v), ScalarKind::Double) => Ok(Column::Double(Arc::clone(v))),
        (HostVector::Logical(v), ScalarKind::Boolean) => Ok(Column::Boolean(Arc::clone(v))),
        (HostVector::Sequence(seq), ScalarKind::Int) => Ok(Column::IntSequence(*seq)),
        (HostVector::Int(v), ScalarKind::Double) => {
            Ok(Column::Double(v.iter().copied().map(f64::from).collect()))
        }
        (HostVector::Sequence(seq), ScalarKind::Double) => {
            Ok(Column::Double(seq.iter().map(f64::from).collect()))
        }
        (other, kind) => Err(RuntimeTypeError::unsupported(kind, other.type_name())),
    }
}

/// Build a columnar array from boxed results.
pub fn marshal_values(ty: &TypeDescriptor, values: &[Value]) -> RuntimeResult<MarshaledArray> {
    let kinds = ty.column_kinds();
    let mut rows: Vec<SmallVec<[Scalar; MAX_TUPLE_ARITY]>> = Vec::with_capacity(values.len());
    for (index, value) in values.iter().enumerate() {
        rows.push(unbox_row(ty, index, value)?);
    }
    let columns = kinds
        .iter()
        .enumerate()
        .map(|(field, kind)| Column::from_scalars(*kind, rows.iter().map(|r| r[field])))
        .collect::<RuntimeResult<SmallVec<[Column; MAX_TUPLE_ARITY]>>>()?;
    Ok(MarshaledArray {
        ty: ty.clone(),
        columns,
        len: values.len(),
    })
}

fn unbox_row(
    ty: &TypeDescriptor,
    index: usize,
    value: &Value,
) -> RuntimeResult<SmallVec<[Scalar; MAX_TUPLE_ARITY]>> {
    let expected = ty.width();
    let fields: SmallVec<[Option<Scalar>; MAX_TUPLE_ARITY]> = match (ty, value) {
        (TypeDescriptor::Tuple(_), Value::List(items)) if items.len() == expected => {
            items.iter().map(Value::as_scalar).collect()
        }
        (TypeDescriptor::Tuple(_), _) => {
            return Err(RuntimeTypeError::ElementType {
                index,
                expected: "tuple",
                found: value.type_name(),
            });
        }
        _ => std::iter::once(value.as_scalar()).collect(),
    };
    fields
        .into_iter()
        .map(|f| {
            f.ok_or(RuntimeTypeError::ElementType {
                index,
                expected: "scalar",
                found: value.type_name(),
            })
        })
        .collect()
}

// ============================================================================
// Unmarshal
// ============================================================================

/// Where a result comes from.
#[derive(Debug, Clone, Copy)]
pub enum UnmarshalSource<'a> {
    /// Ordered boxed results of the interpreted path.
    Values(&'a [Value]),
    /// A buffer copied back from the device.
    Marshaled(&'a MarshaledArray),
}

/// Whether a device-produced result is copied or shared with the host vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Materialization {
    #[default]
    Copy,
    View,
}

/// Convert a result into a host vector, fully materialized.
pub fn unmarshal(ty: &TypeDescriptor, source: UnmarshalSource<'_>) -> RuntimeResult<HostVector> {
    unmarshal_with(ty, source, Materialization::Copy)
}

/// Convert a result into a host vector.
///
/// Int, Double and Boolean map to the matching host vector; tuples map to a
/// list of rows. Identical logical content gives identical vectors whichever
/// source it came from.
pub fn unmarshal_with(
    ty: &TypeDescriptor,
    source: UnmarshalSource<'_>,
    materialization: Materialization,
) -> RuntimeResult<HostVector> {
    match source {
        UnmarshalSource::Values(values) => {
            let array = marshal_values(ty, values)?;
            Ok(host_vector_of(&array, Materialization::View))
        }
        UnmarshalSource::Marshaled(array) => {
            if array.ty() != ty {
                return Err(RuntimeTypeError::unsupported(ty, array.ty()));
            }
            Ok(host_vector_of(array, materialization))
        }
    }
}

fn host_vector_of(array: &MarshaledArray, materialization: Materialization) -> HostVector {
    match (&array.ty, array.columns.first()) {
        (TypeDescriptor::Tuple(_), _) | (_, None) => {
            HostVector::list((0..array.len).filter_map(|i| array.value_at(i)))
        }
        (_, Some(column)) => column.to_host(materialization),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::infer_tuple;

    #[test]
    fn scalar_marshal_shares_storage() {
        let x = HostVector::ints([1, 2, 3]);
        let array = marshal(&x, &[], &TypeDescriptor::Int).unwrap();
        assert_eq!(array.len(), 3);
        let HostVector::Int(storage) = &x else {
            unreachable!()
        };
        let Column::Int(column) = &array.columns()[0] else {
            panic!("expected int column");
        };
        assert!(Arc::ptr_eq(storage, column));
    }

    #[test]
    fn sequence_marshals_compactly() {
        let x = HostVector::range(1, 1_000_000);
        let array = marshal(&x, &[], &TypeDescriptor::Int).unwrap();
        assert_eq!(array.len(), 1_000_000);
        assert!(matches!(array.columns()[0], Column::IntSequence(_)));
        assert_eq!(array.value_at(999_999), Some(Value::Int(1_000_000)));
        let back = unmarshal(&TypeDescriptor::Int, UnmarshalSource::Marshaled(&array)).unwrap();
        assert_eq!(back, x);
    }

    #[test]
    fn sequence_widens_and_zips() {
        let x = HostVector::range(4, 6);
        let widened = marshal(&x, &[], &TypeDescriptor::Double).unwrap();
        assert_eq!(
            widened.columns()[0],
            Column::Double(Arc::from([4.0, 5.0, 6.0].as_slice()))
        );

        let y = HostVector::doubles([0.5, 0.5, 0.5]);
        let ty = infer_tuple(&x, std::slice::from_ref(&y)).unwrap();
        let array = marshal(&x, &[y], &ty).unwrap();
        assert_eq!(
            array.value_at(2),
            Some(Value::List(vec![Value::Int(6), Value::Double(0.5)]))
        );
    }

    #[test]
    fn int_widens_into_double_column() {
        let array = marshal(&HostVector::ints([1, 2]), &[], &TypeDescriptor::Double).unwrap();
        assert_eq!(array.value_at(1), Some(Value::Double(2.0)));
    }

    #[test]
    fn tuple_rows_compose_elementwise() {
        let x = HostVector::ints([1, 2]);
        let y = HostVector::doubles([0.5, 1.5]);
        let ty = infer_tuple(&x, std::slice::from_ref(&y)).unwrap();
        let array = marshal(&x, &[y], &ty).unwrap();
        assert_eq!(
            array.value_at(1),
            Some(Value::List(vec![Value::Int(2), Value::Double(1.5)]))
        );
    }

    #[test]
    fn companion_length_mismatch() {
        let x = HostVector::ints([1, 2, 3]);
        let y = HostVector::ints([1]);
        let ty = infer_tuple(&x, std::slice::from_ref(&y)).unwrap();
        let err = marshal(&x, &[y], &ty).unwrap_err();
        assert_eq!(
            err,
            RuntimeTypeError::LengthMismatch {
                position: 1,
                expected: 3,
                found: 1
            }
        );
    }

    #[test]
    fn five_vectors_rejected_before_layout() {
        let x = HostVector::ints([1]);
        let companions = vec![x.clone(); 5];
        let err = marshal(&x, &companions, &TypeDescriptor::Int).unwrap_err();
        assert_eq!(err, RuntimeTypeError::UnsupportedArity { arity: 6 });
    }

    #[test]
    fn tuple_buffer_is_not_scalar() {
        let x = HostVector::ints([1]);
        let ty = infer_tuple(&x, std::slice::from_ref(&x)).unwrap();
        let array = marshal(&x, std::slice::from_ref(&x), &ty).unwrap();
        let err = array.scalar_column().unwrap_err();
        assert!(matches!(err, RuntimeTypeError::UnsupportedDataType { .. }));
    }

    #[test]
    fn values_and_buffer_unmarshal_identically() {
        let values = vec![Value::Double(1.0), Value::Double(2.5)];
        let array = marshal_values(&TypeDescriptor::Double, &values).unwrap();
        let a = unmarshal(&TypeDescriptor::Double, UnmarshalSource::Values(&values)).unwrap();
        let b = unmarshal(&TypeDescriptor::Double, UnmarshalSource::Marshaled(&array)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, HostVector::doubles([1.0, 2.5]));
    }

    #[test]
    fn view_shares_copy_does_not() {
        let array = marshal_values(&TypeDescriptor::Int, &[Value::Int(7)]).unwrap();
        let view = unmarshal_with(
            &TypeDescriptor::Int,
            UnmarshalSource::Marshaled(&array),
            Materialization::View,
        )
        .unwrap();
        let copy = unmarshal(&TypeDescriptor::Int, UnmarshalSource::Marshaled(&array)).unwrap();
        let again = unmarshal_with(
            &TypeDescriptor::Int,
            UnmarshalSource::Marshaled(&array),
            Materialization::View,
        )
        .unwrap();
        assert!(view.shares_storage(&again));
        assert!(!view.shares_storage(&copy));
        assert_eq!(view, copy);
    }

    #[test]
    fn wrong_element_reports_index() {
        let values = vec![Value::Int(1), Value::from("x")];
        let err = marshal_values(&TypeDescriptor::Int, &values).unwrap_err();
        assert_eq!(
            err,
            RuntimeTypeError::ElementType {
                index: 1,
                expected: "scalar",
                found: "character"
            }
        );
    }

    #[test]
    fn descriptor_mismatch_is_unsupported() {
        let array = marshal_values(&TypeDescriptor::Int, &[Value::Int(1)]).unwrap();
        let err = unmarshal(&TypeDescriptor::Double, UnmarshalSource::Marshaled(&array));
        assert!(matches!(
            err,
            Err(RuntimeTypeError::UnsupportedDataType { .. })
        ));
    }

    #[test]
    fn new_checks_column_lengths() {
        let ty = TypeDescriptor::tuple([ScalarKind::Int, ScalarKind::Int]).unwrap();
        let err = MarshaledArray::new(
            ty,
            [
                Column::Int(Arc::from(vec![1, 2])),
                Column::Int(Arc::from(vec![1])),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeTypeError::LengthMismatch { position: 1, .. }));
    }
}
