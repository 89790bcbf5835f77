// src/errors/offload.rs
//! Operator errors (E6xxx).

#![allow(unused_assignments)] // False positives from thiserror derive

use miette::Diagnostic;
use offload_jit::JitError;
use offload_runtime::RuntimeTypeError;
use thiserror::Error;

use crate::options::ConfigError;

/// An ordinary host-language evaluation error raised by a user function.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
#[error("{message}")]
#[diagnostic(code(E6001))]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum OffloadError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Type(#[from] RuntimeTypeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Jit(#[from] JitError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("no pending composition with handle {handle}")]
    #[diagnostic(
        code(E6002),
        help("compositions are single-use; a chain is cleared once executed")
    )]
    UnknownComposition { handle: u64 },

    #[error("function takes {expected} argument(s) but the operator supplies {found}")]
    #[diagnostic(code(E6003))]
    ArgumentCount { expected: usize, found: usize },

    #[error("failed to start a worker pool of {threads} thread(s): {reason}")]
    #[diagnostic(code(E6004))]
    WorkerPool { threads: usize, reason: String },
}

/// Result type alias for operator calls.
pub type OffloadResult<T> = Result<T, OffloadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_error_message() {
        let err = OffloadError::from(EvalError::new("object 'y' not found"));
        assert_eq!(err.to_string(), "object 'y' not found");
    }

    #[test]
    fn argument_count_message() {
        let err = OffloadError::ArgumentCount {
            expected: 1,
            found: 2,
        };
        assert_eq!(
            err.to_string(),
            "function takes 1 argument(s) but the operator supplies 2"
        );
    }
}
