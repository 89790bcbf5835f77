// crates/offload-runtime/src/types.rs
//! The closed set of offloadable type descriptors and their inference.
//!
//! Only three scalar kinds cross the host/device boundary. Tuples pack two to
//! four scalar columns element-wise; anything else is rejected here so that the
//! rest of the pipeline can match descriptors exhaustively.

use std::fmt;

use smallvec::SmallVec;

use crate::errors::{RuntimeResult, RuntimeTypeError};
use crate::value::{HostVector, Value};

/// Largest number of vectors a tuple may combine.
pub const MAX_TUPLE_ARITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Int,
    Double,
    Boolean,
}

impl ScalarKind {
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Int => "Int",
            ScalarKind::Double => "Double",
            ScalarKind::Boolean => "Boolean",
        }
    }

    pub fn descriptor(self) -> TypeDescriptor {
        match self {
            ScalarKind::Int => TypeDescriptor::Int,
            ScalarKind::Double => TypeDescriptor::Double,
            ScalarKind::Boolean => TypeDescriptor::Boolean,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Field kinds of a tuple, always 2..=4 long.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleType(SmallVec<[ScalarKind; MAX_TUPLE_ARITY]>);

impl TupleType {
    pub fn new(fields: impl IntoIterator<Item = ScalarKind>) -> RuntimeResult<Self> {
        let fields: SmallVec<[ScalarKind; MAX_TUPLE_ARITY]> = fields.into_iter().collect();
        if fields.len() > MAX_TUPLE_ARITY {
            return Err(RuntimeTypeError::UnsupportedArity {
                arity: fields.len(),
            });
        }
        if fields.len() < 2 {
            return Err(RuntimeTypeError::unsupported(
                "a tuple of 2 to 4 fields",
                format!("{} field(s)", fields.len()),
            ));
        }
        Ok(Self(fields))
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn fields(&self) -> &[ScalarKind] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Int,
    Double,
    Boolean,
    Tuple(TupleType),
}

impl TypeDescriptor {
    pub fn tuple(fields: impl IntoIterator<Item = ScalarKind>) -> RuntimeResult<Self> {
        TupleType::new(fields).map(TypeDescriptor::Tuple)
    }

    /// The scalar kind, or `None` for tuples.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            TypeDescriptor::Int => Some(ScalarKind::Int),
            TypeDescriptor::Double => Some(ScalarKind::Double),
            TypeDescriptor::Boolean => Some(ScalarKind::Boolean),
            TypeDescriptor::Tuple(_) => None,
        }
    }

    /// Kinds of every column, in order. Scalars have a single column.
    pub fn column_kinds(&self) -> SmallVec<[ScalarKind; MAX_TUPLE_ARITY]> {
        match self {
            TypeDescriptor::Tuple(t) => t.0.clone(),
            scalar => scalar.scalar_kind().into_iter().collect(),
        }
    }

    pub fn width(&self) -> usize {
        match self {
            TypeDescriptor::Tuple(t) => t.arity(),
            _ => 1,
        }
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, TypeDescriptor::Tuple(_))
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Int => f.write_str("Int"),
            TypeDescriptor::Double => f.write_str("Double"),
            TypeDescriptor::Boolean => f.write_str("Boolean"),
            TypeDescriptor::Tuple(t) => {
                write!(f, "Tuple{}<", t.arity())?;
                for (i, kind) in t.fields().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(kind.name())?;
                }
                f.write_str(">")
            }
        }
    }
}

// ============================================================================
// Inference
// ============================================================================

/// Classify a single boxed value.
///
/// Fails with a recoverable `TypeInference` error for anything that is not an
/// Int, Double or Boolean scalar.
pub fn infer_type(value: &Value) -> RuntimeResult<TypeDescriptor> {
    match value {
        Value::Int(_) => Ok(TypeDescriptor::Int),
        Value::Double(_) => Ok(TypeDescriptor::Double),
        Value::Bool(_) => Ok(TypeDescriptor::Boolean),
        other => Err(RuntimeTypeError::TypeInference {
            found: other.type_name(),
        }),
    }
}

/// Classify a function result.
///
/// Like [`infer_type`], but a list of two to four scalars is a tuple.
pub fn infer_output(value: &Value) -> RuntimeResult<TypeDescriptor> {
    let Value::List(items) = value else {
        return infer_type(value);
    };
    if items.len() > MAX_TUPLE_ARITY {
        return Err(RuntimeTypeError::UnsupportedArity { arity: items.len() });
    }
    if items.len() < 2 {
        return Err(RuntimeTypeError::TypeInference { found: "list" });
    }
    let mut kinds = SmallVec::<[ScalarKind; MAX_TUPLE_ARITY]>::new();
    for item in items {
        match infer_type(item)?.scalar_kind() {
            Some(kind) => kinds.push(kind),
            None => return Err(RuntimeTypeError::TypeInference { found: "list" }),
        }
    }
    TypeDescriptor::tuple(kinds)
}

/// Element descriptor of a host vector.
pub fn infer_vector(vector: &HostVector) -> RuntimeResult<TypeDescriptor> {
    match vector {
        HostVector::Int(_) | HostVector::Sequence(_) => Ok(TypeDescriptor::Int),
        HostVector::Double(_) => Ok(TypeDescriptor::Double),
        HostVector::Logical(_) => Ok(TypeDescriptor::Boolean),
        HostVector::List(_) => Err(RuntimeTypeError::TypeInference { found: "list" }),
    }
}

/// Descriptor for a primary vector zipped with its companions.
///
/// Arity 1 yields the scalar descriptor. Arity above four is fatal.
pub fn infer_tuple(primary: &HostVector, companions: &[HostVector]) -> RuntimeResult<TypeDescriptor> {
    let arity = 1 + companions.len();
    if arity > MAX_TUPLE_ARITY {
        return Err(RuntimeTypeError::UnsupportedArity { arity });
    }
    let first = infer_vector(primary)?;
    if companions.is_empty() {
        return Ok(first);
    }
    let mut kinds = SmallVec::<[ScalarKind; MAX_TUPLE_ARITY]>::new();
    for ty in std::iter::once(Ok(first)).chain(companions.iter().map(infer_vector)) {
        let ty = ty?;
        let kind = ty
            .scalar_kind()
            .ok_or_else(|| RuntimeTypeError::unsupported("a scalar vector", &ty))?;
        kinds.push(kind);
    }
    TypeDescriptor::tuple(kinds)
}
