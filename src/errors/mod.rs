// src/errors/mod.rs
//! Structured error reporting for the offload operators.
//!
//! Error codes are grouped by crate:
//! - E4xxx: type inference and marshaling (`offload-runtime`)
//! - E5xxx: kernel compilation and device execution (`offload-jit`)
//! - E6xxx: operator, composition and configuration errors (this crate)

pub mod offload;
pub mod report;

pub use offload::{EvalError, OffloadError, OffloadResult};
pub use report::render_to_string;
