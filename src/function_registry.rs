// src/function_registry.rs
//! Stable identity from a function value to its entry point and metadata.

use std::sync::Arc;

use offload_runtime::{FunctionId, ScopeSnapshot, TypeDescriptor, Value};
use rustc_hash::FxHashMap;

use crate::function::{Callable, CallTarget, Function};

/// Everything the runtime remembers about one function.
#[derive(Debug, Clone)]
pub struct FunctionHandle {
    target: CallTarget,
    arity: usize,
    arg_names: Vec<Arc<str>>,
    sample: Option<Value>,
    output: Option<TypeDescriptor>,
    scope: ScopeSnapshot,
    deopts: u32,
    candidate: bool,
    rewrite_tried: bool,
    specialized: bool,
}

impl FunctionHandle {
    fn for_target(target: CallTarget) -> Self {
        let body = target.body();
        Self {
            arity: body.arity(),
            arg_names: body.arg_names().to_vec(),
            scope: body.captured_scope(),
            target,
            sample: None,
            output: None,
            deopts: 0,
            candidate: false,
            rewrite_tried: false,
            specialized: false,
        }
    }

    pub fn target(&self) -> &CallTarget {
        &self.target
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn arg_names(&self) -> &[Arc<str>] {
        &self.arg_names
    }

    /// Result of the first recorded call, if any.
    pub fn sample(&self) -> Option<&Value> {
        self.sample.as_ref()
    }

    pub fn output(&self) -> Option<&TypeDescriptor> {
        self.output.as_ref()
    }

    pub fn scope(&self) -> &ScopeSnapshot {
        &self.scope
    }

    pub fn deopts(&self) -> u32 {
        self.deopts
    }

    pub fn is_specialized(&self) -> bool {
        self.specialized
    }
}

/// Function identity to [`FunctionHandle`].
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    handles: FxHashMap<FunctionId, FunctionHandle>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry point for `function`, registering its own entry point if unseen.
    ///
    /// Write-once: later lookups return the stored entry point unchanged.
    pub fn lookup(&mut self, function: &Function) -> CallTarget {
        self.handles
            .entry(function.id())
            .or_insert_with(|| {
                tracing::trace!(function = %function.id(), "registered function");
                FunctionHandle::for_target(function.default_target())
            })
            .target
            .clone()
    }

    /// Replace the record for `function` with a rewritten body.
    ///
    /// The new entry point gets a fresh identity, so tracing starts over and
    /// samples and deopt counts of the old body are dropped.
    pub fn update(&mut self, function: &Function, rewritten: Arc<dyn Callable>) -> CallTarget {
        let target = CallTarget::rewritten(rewritten);
        let mut handle = FunctionHandle::for_target(target.clone());
        handle.rewrite_tried = true;
        handle.specialized = true;
        tracing::debug!(function = %function.id(), target = %target.id(), "replaced entry point");
        self.handles.insert(function.id(), handle);
        target
    }

    /// Store the first-call sample and its output type, keeping an existing one.
    pub fn record_sample(&mut self, function: FunctionId, sample: Value, ty: Option<TypeDescriptor>) {
        if let Some(handle) = self.handles.get_mut(&function)
            && handle.sample.is_none()
        {
            handle.sample = Some(sample);
            handle.output = ty;
        }
    }

    /// Count a deoptimization; returns the new total.
    pub fn record_deopt(&mut self, function: FunctionId) -> u32 {
        match self.handles.get_mut(&function) {
            Some(handle) => {
                handle.deopts = handle.deopts.saturating_add(1);
                handle.deopts
            }
            None => 0,
        }
    }

    /// Flag the function as an offload candidate. True only the first time.
    pub fn mark_candidate(&mut self, function: FunctionId) -> bool {
        match self.handles.get_mut(&function) {
            Some(handle) if !handle.candidate => {
                handle.candidate = true;
                true
            }
            _ => false,
        }
    }

    /// Whether a scope rewrite may still be tried for the function.
    pub(crate) fn awaiting_specialization(&self, function: FunctionId) -> bool {
        self.handles
            .get(&function)
            .is_some_and(|handle| !handle.rewrite_tried)
    }

    pub(crate) fn mark_specialization_tried(&mut self, function: FunctionId) {
        if let Some(handle) = self.handles.get_mut(&function) {
            handle.rewrite_tried = true;
        }
    }

    pub fn get(&self, function: FunctionId) -> Option<&FunctionHandle> {
        self.handles.get(&function)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::NativeFunction;

    fn identity() -> Function {
        Function::native(&["x"], |args| Ok(args[0].clone()))
    }

    #[test]
    fn lookup_is_write_once() {
        let mut registry = FunctionRegistry::new();
        let f = identity();
        let first = registry.lookup(&f);
        let second = registry.lookup(&f.clone());
        assert!(first.same_entry(&second));
        assert_eq!(first.id(), f.id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn handle_copies_metadata() {
        let mut registry = FunctionRegistry::new();
        let f = Function::new(
            NativeFunction::new(&["x", "y"], |args| Ok(args[0].clone())).with_scope([Value::Int(7)]),
        );
        registry.lookup(&f);
        let handle = registry.get(f.id()).unwrap();
        assert_eq!(handle.arity(), 2);
        assert_eq!(handle.arg_names()[1].as_ref(), "y");
        assert_eq!(handle.scope().as_ref(), &[Value::Int(7)]);
    }

    #[test]
    fn update_replaces_entry_point() {
        let mut registry = FunctionRegistry::new();
        let f = identity();
        let original = registry.lookup(&f);
        registry.record_deopt(f.id());
        let rewritten = registry.update(&f, Arc::clone(identity().body()));
        assert!(!rewritten.same_entry(&original));
        assert!(registry.lookup(&f).same_entry(&rewritten));
        let handle = registry.get(f.id()).unwrap();
        assert_eq!(handle.deopts(), 0);
        assert!(handle.is_specialized());
    }

    #[test]
    fn first_sample_is_kept() {
        let mut registry = FunctionRegistry::new();
        let f = identity();
        registry.lookup(&f);
        registry.record_sample(f.id(), Value::Int(1), Some(TypeDescriptor::Int));
        registry.record_sample(f.id(), Value::Double(2.0), Some(TypeDescriptor::Double));
        let handle = registry.get(f.id()).unwrap();
        assert_eq!(handle.sample(), Some(&Value::Int(1)));
        assert_eq!(handle.output(), Some(&TypeDescriptor::Int));
    }

    #[test]
    fn deopts_and_candidates_are_counted() {
        let mut registry = FunctionRegistry::new();
        let f = identity();
        registry.lookup(&f);
        assert!(registry.mark_candidate(f.id()));
        assert!(!registry.mark_candidate(f.id()));
        assert_eq!(registry.record_deopt(f.id()), 1);
        assert_eq!(registry.record_deopt(f.id()), 2);
        assert_eq!(registry.record_deopt(FunctionId::fresh()), 0);
    }
}
