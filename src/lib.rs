// src/lib.rs
//! Optimistic offload of element-wise `map`, `apply` and `reduce`.
//!
//! Calls run interpreted until the graph provider hands over a lowered graph
//! for the function. That graph is then shaped, compiled once per trace
//! identity and launched on the device for later calls. When the device
//! cannot finish a call, it is redone interpreted. Alternatively a fixed-size
//! CPU worker pool runs the elements with no tracing at all.
//!
//! ```no_run
//! use offload::{Function, HostVector, OffloadOptions, RuntimeContext, Value, map};
//!
//! offload::logging::init_from_env();
//! let mut ctx = RuntimeContext::new(OffloadOptions::from_env()?);
//! let inc = Function::native(&["x"], |args| match args {
//!     [Value::Int(x)] => Ok(Value::Int(x + 1)),
//!     _ => Err(offload::EvalError::new("non-numeric argument")),
//! });
//! let out = map(&mut ctx, HostVector::ints([1, 2, 3]), &inc, &[])?;
//! # Ok::<(), offload::OffloadError>(())
//! ```
pub mod composition;
pub mod context;
pub mod errors;
mod fallback;
pub mod function;
pub mod function_registry;
pub mod logging;
pub mod ops;
pub mod options;
mod results;
mod trigger;
mod worker_pool;

pub use composition::{
    CompositionHandle, CompositionRegistry, PendingComposition, Stage, StageInput,
};
pub use context::{RuntimeContext, RuntimeContextBuilder};
pub use errors::{EvalError, OffloadError, OffloadResult};
pub use function::{CallTarget, Callable, Function, NativeFunction};
pub use function_registry::{FunctionHandle, FunctionRegistry};
pub use ops::{
    Operand, apply, device_info, execute, map, pending_map, reduce, terminal_reduce,
};
pub use options::{CompositionMode, ConfigError, ExecutionMode, OffloadOptions};

pub use offload_jit as jit;
pub use offload_runtime::{
    FunctionId, HostVector, Materialization, Scalar, ScalarKind, ScopeSnapshot, TypeDescriptor,
    Value,
};
