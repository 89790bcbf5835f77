// src/composition.rs
//! Pending chains of composed map and reduce stages.
//!
//! A lazy `map` or `reduce` records a stage here instead of running. Each
//! stage keeps a sample output computed from its input's first element, so
//! the next stage can infer its type before anything is materialized. A chain
//! is single-use: executing its terminal stage clears it.

use std::fmt;

use offload_runtime::{FunctionId, HostVector, MarshaledArray, TypeDescriptor, Value};
use rustc_hash::FxHashMap;

use crate::function::Function;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositionHandle(u64);

impl CompositionHandle {
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CompositionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "composition#{}", self.0)
    }
}

/// What a stage does with its input.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Map,
    Reduce { neutral: Value },
}

/// Where a stage's elements come from.
#[derive(Debug, Clone)]
pub enum StageInput {
    /// Host vectors given at registration, with their columnar form when offloadable.
    Source {
        primary: HostVector,
        companions: Vec<HostVector>,
        marshaled: Option<MarshaledArray>,
    },
    /// The result of an earlier stage.
    Parent {
        parent: CompositionHandle,
        companions: Vec<HostVector>,
    },
}

impl StageInput {
    pub fn parent(&self) -> Option<CompositionHandle> {
        match self {
            StageInput::Source { .. } => None,
            StageInput::Parent { parent, .. } => Some(*parent),
        }
    }

    pub fn companions(&self) -> &[HostVector] {
        match self {
            StageInput::Source { companions, .. } | StageInput::Parent { companions, .. } => {
                companions
            }
        }
    }
}

/// One registered stage.
#[derive(Debug, Clone)]
pub struct PendingComposition {
    pub(crate) stage: Stage,
    pub(crate) function: Function,
    pub(crate) input: StageInput,
    pub(crate) output: Option<TypeDescriptor>,
    pub(crate) sample: Option<Value>,
    pub(crate) result: Option<HostVector>,
}

impl PendingComposition {
    pub fn new(
        stage: Stage,
        function: Function,
        input: StageInput,
        sample: Option<Value>,
        output: Option<TypeDescriptor>,
    ) -> Self {
        Self {
            stage,
            function,
            input,
            output,
            sample,
            result: None,
        }
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    pub fn input(&self) -> &StageInput {
        &self.input
    }

    pub fn output(&self) -> Option<&TypeDescriptor> {
        self.output.as_ref()
    }

    pub fn sample(&self) -> Option<&Value> {
        self.sample.as_ref()
    }

    /// Memoized result, present for eagerly computed stages.
    pub fn result(&self) -> Option<&HostVector> {
        self.result.as_ref()
    }
}

/// Registered stages by handle, plus the most recently registered one.
#[derive(Debug, Default)]
pub struct CompositionRegistry {
    pending: FxHashMap<CompositionHandle, PendingComposition>,
    by_function: FxHashMap<FunctionId, CompositionHandle>,
    current: Option<CompositionHandle>,
    next: u64,
}

impl CompositionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a deferred stage and make it current.
    pub fn add_promise(&mut self, composition: PendingComposition) -> CompositionHandle {
        self.insert(composition)
    }

    /// Record a stage computed on registration and make it current.
    pub fn add_future(
        &mut self,
        mut composition: PendingComposition,
        result: HostVector,
    ) -> CompositionHandle {
        composition.result = Some(result);
        self.insert(composition)
    }

    fn insert(&mut self, composition: PendingComposition) -> CompositionHandle {
        self.next += 1;
        let handle = CompositionHandle::new(self.next);
        tracing::debug!(
            %handle,
            function = %composition.function.id(),
            parent = ?composition.input.parent(),
            eager = composition.result.is_some(),
            "registered composition stage"
        );
        self.by_function.insert(composition.function.id(), handle);
        self.pending.insert(handle, composition);
        self.current = Some(handle);
        handle
    }

    /// Latest stage registered for a composed function.
    pub fn package_for(&self, function: FunctionId) -> Option<(CompositionHandle, &PendingComposition)> {
        let handle = *self.by_function.get(&function)?;
        self.pending.get(&handle).map(|c| (handle, c))
    }

    pub fn get(&self, handle: CompositionHandle) -> Option<&PendingComposition> {
        self.pending.get(&handle)
    }

    pub(crate) fn memoize(&mut self, handle: CompositionHandle, result: HostVector) {
        if let Some(composition) = self.pending.get_mut(&handle) {
            composition.result = Some(result);
        }
    }

    pub fn current(&self) -> Option<CompositionHandle> {
        self.current
    }

    /// Drop every pending stage.
    pub fn clean(&mut self) {
        self.pending.clear();
        self.by_function.clear();
        self.current = None;
    }

    /// Drop `handle` and its ancestors. Returns how many stages went.
    ///
    /// Walking up stops at the first ancestor another pending stage still
    /// reads from; that branch keeps it until it is cleaned in turn.
    pub fn clean_chain(&mut self, handle: CompositionHandle) -> usize {
        let mut removed = 0;
        let mut next = Some(handle);
        while let Some(handle) = next {
            let Some(composition) = self.pending.remove(&handle) else {
                break;
            };
            removed += 1;
            self.by_function.retain(|_, h| *h != handle);
            if self.current == Some(handle) {
                self.current = None;
            }
            next = composition
                .input
                .parent()
                .filter(|parent| !self.has_child(*parent));
        }
        tracing::debug!(%handle, removed, "cleared composition chain");
        removed
    }

    fn has_child(&self, parent: CompositionHandle) -> bool {
        self.pending
            .values()
            .any(|c| c.input.parent() == Some(parent))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
