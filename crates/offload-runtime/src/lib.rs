// crates/offload-runtime/src/lib.rs
//! Offload runtime: host values, type descriptors, and columnar marshaling.
//!
//! Everything in this crate is independent of how kernels are produced or where
//! they run. It only knows how to classify host data into the closed set of
//! offloadable types and how to move that data between row-oriented host
//! vectors and column-oriented device buffers.
pub mod errors;
pub mod identity;
pub mod marshal;
pub mod types;
pub mod value;

pub use errors::{RuntimeResult, RuntimeTypeError};
pub use identity::FunctionId;
pub use marshal::{
    Column, MarshaledArray, Materialization, UnmarshalSource, marshal, marshal_values, unmarshal,
    unmarshal_with,
};
pub use types::{
    MAX_TUPLE_ARITY, ScalarKind, TupleType, TypeDescriptor, infer_output, infer_tuple,
    infer_type, infer_vector,
};
pub use value::{HostVector, IntSequence, Scalar, ScopeSnapshot, Value};
