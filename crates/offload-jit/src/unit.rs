// crates/offload-jit/src/unit.rs
//! Compiled kernels keyed by trace identity.

use std::collections::hash_map::Entry;
use std::sync::Arc;

use offload_runtime::{ScopeSnapshot, TypeDescriptor};
use rustc_hash::FxHashMap;

use crate::compiler::KernelHandle;
use crate::graph::TraceId;
use crate::passes::ScopeBinding;

/// A kernel plus everything needed to launch it. Immutable once built.
#[derive(Debug)]
pub struct CompilationUnit {
    kernel: KernelHandle,
    input: TypeDescriptor,
    output: TypeDescriptor,
    scope: ScopeSnapshot,
    bindings: Vec<ScopeBinding>,
}

impl CompilationUnit {
    pub fn new(
        kernel: KernelHandle,
        input: TypeDescriptor,
        output: TypeDescriptor,
        scope: ScopeSnapshot,
        bindings: Vec<ScopeBinding>,
    ) -> Self {
        Self {
            kernel,
            input,
            output,
            scope,
            bindings,
        }
    }

    pub fn kernel(&self) -> &KernelHandle {
        &self.kernel
    }

    pub fn input(&self) -> &TypeDescriptor {
        &self.input
    }

    pub fn output(&self) -> &TypeDescriptor {
        &self.output
    }

    /// Captured scope values, taken when the unit was compiled.
    pub fn scope(&self) -> &ScopeSnapshot {
        &self.scope
    }

    /// Scope slots the kernel reads; executors pass only these to the device.
    pub fn bindings(&self) -> &[ScopeBinding] {
        &self.bindings
    }
}

/// At most one unit per trace identity, never evicted.
#[derive(Debug, Default)]
pub struct UnitCache {
    units: FxHashMap<TraceId, Arc<CompilationUnit>>,
}

impl UnitCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `unit` for `trace` unless one is already there.
    ///
    /// Returns whichever unit ends up installed.
    pub fn install(&mut self, trace: TraceId, unit: CompilationUnit) -> Arc<CompilationUnit> {
        match self.units.entry(trace) {
            Entry::Occupied(existing) => {
                tracing::debug!(%trace, "unit already installed, keeping the first");
                Arc::clone(existing.get())
            }
            Entry::Vacant(slot) => {
                tracing::debug!(%trace, kernel = %unit.kernel.id(), "installed unit");
                Arc::clone(slot.insert(Arc::new(unit)))
            }
        }
    }

    pub fn get(&self, trace: TraceId) -> Option<Arc<CompilationUnit>> {
        self.units.get(&trace).cloned()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
