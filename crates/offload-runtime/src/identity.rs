// crates/offload-runtime/src/identity.rs
//! Identity for host function values.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a host function value.
///
/// Allocated once when the host creates a function object. Clones of the
/// function share the id; a rewritten function is a new object with a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(u64);

impl FunctionId {
    /// Allocate a fresh, process-unique id.
    pub fn fresh() -> Self {
        Self(NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for FunctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}
