// crates/offload-jit/src/errors.rs
//! Kernel compilation and device errors (E5xxx).

#![allow(unused_assignments)] // False positives from thiserror derive

use miette::Diagnostic;
use offload_runtime::RuntimeTypeError;
use thiserror::Error;

use crate::graph::NodeId;

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum CompileError {
    #[error("node {node} ({op}) cannot run on the device")]
    #[diagnostic(
        code(E5001),
        help("interpreter-only nodes must be removed by the shaping passes")
    )]
    InterpreterOnly { node: NodeId, op: &'static str },

    #[error("node {node}: expected {expected}, found {found}")]
    #[diagnostic(code(E5002))]
    TypeMismatch {
        node: NodeId,
        expected: String,
        found: String,
    },

    #[error("parameter {index} is out of range for input {input}")]
    #[diagnostic(code(E5003))]
    ParamOutOfRange { index: u8, input: String },

    #[error("scope slot {slot} is missing or not offloadable")]
    #[diagnostic(code(E5004))]
    ScopeSlot { slot: u32 },

    #[error("graph produces {found} output(s), kernel needs {expected}")]
    #[diagnostic(code(E5005))]
    OutputArity { expected: usize, found: usize },

    #[error("node {node} produces no value")]
    #[diagnostic(code(E5006))]
    NoValue { node: NodeId },

    #[error("node {node} refers to {input}, which is not defined before it")]
    #[diagnostic(code(E5007))]
    ForwardReference { node: NodeId, input: NodeId },
}

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum DeviceError {
    #[error("device out of memory: requested {requested} bytes, {available} available")]
    #[diagnostic(code(E5101))]
    OutOfMemory { requested: usize, available: usize },

    #[error("unknown device buffer {id}")]
    #[diagnostic(code(E5102))]
    UnknownBuffer { id: u64 },

    #[error("buffer {id} holds {found}, expected {expected}")]
    #[diagnostic(code(E5103))]
    BufferLayout {
        id: u64,
        expected: String,
        found: String,
    },

    #[error("kernel launch failed: {reason}")]
    #[diagnostic(code(E5104))]
    Launch { reason: String },
}

/// Any failure on the offload path.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum JitError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Type(#[from] RuntimeTypeError),
}

impl JitError {
    /// Whether the call can still complete through the interpreted path.
    pub fn is_recoverable(&self) -> bool {
        match self {
            JitError::Compile(_) | JitError::Device(_) => true,
            JitError::Type(e) => e.is_recoverable(),
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
pub type DeviceResult<T> = Result<T, DeviceError>;
pub type JitResult<T> = Result<T, JitError>;
