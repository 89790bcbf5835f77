// crates/offload-runtime/src/errors.rs
//! Type inference and marshaling errors (E4xxx).

#![allow(unused_assignments)] // False positives from thiserror derive

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum RuntimeTypeError {
    #[error("cannot infer an offloadable type for {found} value")]
    #[diagnostic(
        code(E4001),
        help("only Int, Double and Boolean scalars can be offloaded")
    )]
    TypeInference { found: &'static str },

    #[error("tuple arity {arity} is not supported")]
    #[diagnostic(code(E4002), help("tuples may combine at most 4 vectors"))]
    UnsupportedArity { arity: usize },

    #[error("companion vector {position} has {found} elements, expected {expected}")]
    #[diagnostic(code(E4003))]
    LengthMismatch {
        position: usize,
        expected: usize,
        found: usize,
    },

    #[error("data type not supported: expected {expected}, found {found}")]
    #[diagnostic(code(E4004))]
    UnsupportedDataType { expected: String, found: String },

    #[error("element {index} is {found}, expected {expected}")]
    #[diagnostic(code(E4005))]
    ElementType {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
}

impl RuntimeTypeError {
    /// Whether the caller can recover by running the computation interpreted.
    ///
    /// Only a failed scalar classification is recoverable; arity and layout
    /// violations abort the call.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RuntimeTypeError::TypeInference { .. })
    }

    pub(crate) fn unsupported(expected: impl ToString, found: impl ToString) -> Self {
        RuntimeTypeError::UnsupportedDataType {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// Result type alias for runtime type operations.
pub type RuntimeResult<T> = Result<T, RuntimeTypeError>;
