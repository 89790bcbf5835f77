// crates/offload-runtime/src/value.rs
//! Host-side values and vectors.
//!
//! `Value` is the boxed value a host evaluator produces. `HostVector` is the
//! homogeneous vector the operators consume and return; its storage is a shared
//! `Arc<[T]>` so that marshaling and deferred materialization can hand out views
//! without copying. Arithmetic integer sequences stay compact as an
//! [`IntSequence`] all the way to the device.

use std::sync::Arc;

use crate::types::ScalarKind;

/// Snapshot of a function's captured lexical scope, indexed by slot.
///
/// Captured vectors appear as `Value::List`.
pub type ScopeSnapshot = Arc<[Value]>;

/// A boxed host value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i32),
    Double(f64),
    Bool(bool),
    Str(Arc<str>),
    List(Vec<Value>),
}

impl Value {
    /// Short name of the value's host type, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "integer",
            Value::Double(_) => "double",
            Value::Bool(_) => "logical",
            Value::Str(_) => "character",
            Value::List(_) => "list",
        }
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        match *self {
            Value::Int(v) => Some(Scalar::Int(v)),
            Value::Double(v) => Some(Scalar::Double(v)),
            Value::Bool(v) => Some(Scalar::Bool(v)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_scalar().map(Scalar::as_f64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        match s {
            Scalar::Int(v) => Value::Int(v),
            Scalar::Double(v) => Value::Double(v),
            Scalar::Bool(v) => Value::Bool(v),
        }
    }
}

/// An unboxed scalar, the unit of device computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i32),
    Double(f64),
    Bool(bool),
}

impl Scalar {
    pub fn kind(self) -> ScalarKind {
        match self {
            Scalar::Int(_) => ScalarKind::Int,
            Scalar::Double(_) => ScalarKind::Double,
            Scalar::Bool(_) => ScalarKind::Boolean,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Int(v) => f64::from(v),
            Scalar::Double(v) => v,
            Scalar::Bool(v) => f64::from(u8::from(v)),
        }
    }

    pub fn as_bool(self) -> bool {
        match self {
            Scalar::Int(v) => v != 0,
            Scalar::Double(v) => v != 0.0,
            Scalar::Bool(v) => v,
        }
    }
}

/// `start, start + stride, ...` with `len` elements, none of which overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntSequence {
    start: i32,
    stride: i32,
    len: usize,
}

impl IntSequence {
    /// `None` when the last element does not fit an `i32`.
    pub fn new(start: i32, stride: i32, len: usize) -> Option<Self> {
        if len > 0 {
            let steps = i64::try_from(len - 1).ok()?;
            let last = i64::from(stride)
                .checked_mul(steps)?
                .checked_add(i64::from(start))?;
            i32::try_from(last).ok()?;
        }
        Some(Self { start, stride, len })
    }

    /// `from..=to`, counting down when `to < from`.
    pub fn inclusive(from: i32, to: i32) -> Self {
        let stride = if to < from { -1 } else { 1 };
        let len = from.abs_diff(to) as usize + 1;
        Self {
            start: from,
            stride,
            len,
        }
    }

    pub fn start(&self) -> i32 {
        self.start
    }

    pub fn stride(&self) -> i32 {
        self.stride
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Option<i32> {
        if index >= self.len {
            return None;
        }
        let offset = i64::from(self.stride) * i64::try_from(index).ok()?;
        i32::try_from(i64::from(self.start) + offset).ok()
    }

    /// The first `len` elements.
    #[must_use]
    pub fn prefix(self, len: usize) -> Self {
        Self {
            len: len.min(self.len),
            ..self
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }
}

/// A homogeneous host vector.
#[derive(Debug, Clone, PartialEq)]
pub enum HostVector {
    Int(Arc<[i32]>),
    Double(Arc<[f64]>),
    Logical(Arc<[bool]>),
    List(Arc<[Value]>),
    /// An integer vector kept as start and stride.
    Sequence(IntSequence),
}

impl HostVector {
    pub fn ints(values: impl IntoIterator<Item = i32>) -> Self {
        HostVector::Int(values.into_iter().collect())
    }

    pub fn doubles(values: impl IntoIterator<Item = f64>) -> Self {
        HostVector::Double(values.into_iter().collect())
    }

    pub fn logicals(values: impl IntoIterator<Item = bool>) -> Self {
        HostVector::Logical(values.into_iter().collect())
    }

    pub fn list(values: impl IntoIterator<Item = Value>) -> Self {
        HostVector::List(values.into_iter().collect())
    }

    /// The integers `from..=to` without materializing them.
    pub fn range(from: i32, to: i32) -> Self {
        HostVector::Sequence(IntSequence::inclusive(from, to))
    }

    pub fn len(&self) -> usize {
        match self {
            HostVector::Int(v) => v.len(),
            HostVector::Double(v) => v.len(),
            HostVector::Logical(v) => v.len(),
            HostVector::List(v) => v.len(),
            HostVector::Sequence(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Boxed element at `index`.
    pub fn get(&self, index: usize) -> Option<Value> {
        match self {
            HostVector::Int(v) => v.get(index).copied().map(Value::Int),
            HostVector::Double(v) => v.get(index).copied().map(Value::Double),
            HostVector::Logical(v) => v.get(index).copied().map(Value::Bool),
            HostVector::List(v) => v.get(index).cloned(),
            HostVector::Sequence(s) => s.get(index).map(Value::Int),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            HostVector::Int(_) | HostVector::Sequence(_) => "integer vector",
            HostVector::Double(_) => "double vector",
            HostVector::Logical(_) => "logical vector",
            HostVector::List(_) => "list",
        }
    }

    /// Whether two vectors share the same backing storage.
    pub fn shares_storage(&self, other: &HostVector) -> bool {
        match (self, other) {
            (HostVector::Int(a), HostVector::Int(b)) => Arc::ptr_eq(a, b),
            (HostVector::Double(a), HostVector::Double(b)) => Arc::ptr_eq(a, b),
            (HostVector::Logical(a), HostVector::Logical(b)) => Arc::ptr_eq(a, b),
            (HostVector::List(a), HostVector::List(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
