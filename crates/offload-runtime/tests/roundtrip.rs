// crates/offload-runtime/tests/roundtrip.rs
//! Marshal/unmarshal round-trip properties.

use offload_runtime::{
    HostVector, IntSequence, Materialization, TypeDescriptor, UnmarshalSource, Value, infer_tuple,
    marshal, marshal_values, unmarshal, unmarshal_with,
};
use proptest::prelude::*;

// ============================================================================
// Scalar vectors
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_int_roundtrip(xs in prop::collection::vec(any::<i32>(), 0..200)) {
        let v = HostVector::ints(xs);
        let ty = infer_tuple(&v, &[]).unwrap();
        let array = marshal(&v, &[], &ty).unwrap();
        prop_assert_eq!(array.len(), v.len());
        let back = unmarshal(&ty, UnmarshalSource::Marshaled(&array)).unwrap();
        prop_assert_eq!(back, v);
    }

    #[test]
    fn prop_double_roundtrip(xs in prop::collection::vec(-1.0e9f64..1.0e9, 0..200)) {
        let v = HostVector::doubles(xs);
        let array = marshal(&v, &[], &TypeDescriptor::Double).unwrap();
        let back = unmarshal_with(
            &TypeDescriptor::Double,
            UnmarshalSource::Marshaled(&array),
            Materialization::View,
        )
        .unwrap();
        prop_assert_eq!(back, v);
    }

    #[test]
    fn prop_logical_roundtrip(xs in prop::collection::vec(any::<bool>(), 0..200)) {
        let v = HostVector::logicals(xs);
        let array = marshal(&v, &[], &TypeDescriptor::Boolean).unwrap();
        let back = unmarshal(&TypeDescriptor::Boolean, UnmarshalSource::Marshaled(&array)).unwrap();
        prop_assert_eq!(back, v);
    }

    /// Boxed results and a device buffer with the same content unmarshal alike.
    #[test]
    fn prop_sources_agree(xs in prop::collection::vec(any::<i32>(), 0..100)) {
        let values: Vec<Value> = xs.iter().copied().map(Value::Int).collect();
        let array = marshal_values(&TypeDescriptor::Int, &values).unwrap();
        let from_values = unmarshal(&TypeDescriptor::Int, UnmarshalSource::Values(&values)).unwrap();
        let from_buffer = unmarshal(&TypeDescriptor::Int, UnmarshalSource::Marshaled(&array)).unwrap();
        prop_assert_eq!(&from_values, &from_buffer);
        prop_assert_eq!(from_values, HostVector::ints(xs));
    }
}

// ============================================================================
// Sequences
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_sequence_roundtrip(
        start in -100_000i32..100_000,
        stride in -50i32..50,
        len in 0usize..500,
    ) {
        let seq = IntSequence::new(start, stride, len).unwrap();
        let v = HostVector::Sequence(seq);
        let ty = infer_tuple(&v, &[]).unwrap();
        prop_assert_eq!(&ty, &TypeDescriptor::Int);
        let array = marshal(&v, &[], &ty).unwrap();
        prop_assert_eq!(array.len(), len);
        let back = unmarshal(&ty, UnmarshalSource::Marshaled(&array)).unwrap();
        prop_assert_eq!(&back, &v);

        let dense: Vec<i32> = (0..len).map(|i| start + stride * i as i32).collect();
        let values: Vec<Value> = back.iter().collect();
        prop_assert_eq!(values, dense.iter().copied().map(Value::Int).collect::<Vec<_>>());
    }
}

// ============================================================================
// Tuples
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_tuple_rows_match_sources(
        rows in prop::collection::vec((any::<i32>(), -1.0e6f64..1.0e6, any::<bool>()), 0..100)
    ) {
        let x = HostVector::ints(rows.iter().map(|r| r.0));
        let y = HostVector::doubles(rows.iter().map(|r| r.1));
        let z = HostVector::logicals(rows.iter().map(|r| r.2));
        let companions = [y, z];
        let ty = infer_tuple(&x, &companions).unwrap();
        let array = marshal(&x, &companions, &ty).unwrap();
        prop_assert_eq!(array.len(), rows.len());
        prop_assert!(array.columns().iter().all(|c| c.len() == rows.len()));

        let back = unmarshal(&ty, UnmarshalSource::Marshaled(&array)).unwrap();
        let expected = HostVector::list(rows.iter().map(|&(a, b, c)| {
            Value::List(vec![Value::Int(a), Value::Double(b), Value::Bool(c)])
        }));
        prop_assert_eq!(back, expected);
    }
}

#[test]
fn empty_tuple_array_unmarshals_to_empty_list() {
    let x = HostVector::ints([]);
    let ty = infer_tuple(&x, std::slice::from_ref(&x)).unwrap();
    let array = marshal(&x, std::slice::from_ref(&x), &ty).unwrap();
    let back = unmarshal(&ty, UnmarshalSource::Marshaled(&array)).unwrap();
    assert_eq!(back, HostVector::list([]));
}
