// crates/offload-jit/src/provider.rs
//! The lowering collaborator: hot-path detection and graph hand-over.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use offload_runtime::FunctionId;
use rustc_hash::FxHashMap;

use crate::graph::{Graph, TraceId};

/// Decides when a call target is hot and exposes its lowered graph.
///
/// The existence of a graph for a trace identity is the compile trigger.
pub trait GraphProvider: Send + Sync {
    /// Tell the detector that `target` is worth tracing.
    fn mark_offload_candidate(&self, target: FunctionId);

    /// Stable identity of the traced code behind `target`.
    fn trace_identity(&self, target: FunctionId) -> TraceId;

    /// The lowered graph, once the detector considers the trace hot.
    fn lowered_graph(&self, trace: TraceId) -> Option<Arc<Graph>>;
}

/// Never produces a graph; every call stays interpreted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGraphs;

impl GraphProvider for NoGraphs {
    fn mark_offload_candidate(&self, _target: FunctionId) {}

    fn trace_identity(&self, target: FunctionId) -> TraceId {
        TraceId::new(target.as_raw())
    }

    fn lowered_graph(&self, _trace: TraceId) -> Option<Arc<Graph>> {
        None
    }
}

#[derive(Debug)]
struct Script {
    graph: Arc<Graph>,
    hot_after: usize,
    probes: usize,
    candidate: bool,
}

#[derive(Debug, Default)]
struct ScriptState {
    traces: FxHashMap<FunctionId, TraceId>,
    scripts: FxHashMap<TraceId, Script>,
    next_trace: u64,
}

impl ScriptState {
    fn trace_for(&mut self, target: FunctionId) -> TraceId {
        if let Some(trace) = self.traces.get(&target) {
            return *trace;
        }
        self.next_trace += 1;
        let trace = TraceId::new(self.next_trace);
        self.traces.insert(target, trace);
        trace
    }
}

/// Hands out pre-built graphs after a fixed number of probes.
///
/// A graph registered for a function becomes visible once the function has
/// been marked as a candidate and `lowered_graph` has been asked `hot_after`
/// times. Functions without a script never become hot.
#[derive(Debug, Default)]
pub struct ScriptedGraphProvider {
    state: Mutex<ScriptState>,
    marks: AtomicUsize,
}

impl ScriptedGraphProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `graph` the lowering of `target` once it has been probed `hot_after` times.
    pub fn register(&self, target: FunctionId, graph: Graph, hot_after: usize) -> TraceId {
        let mut state = self.lock();
        let trace = state.trace_for(target);
        state.scripts.insert(
            trace,
            Script {
                graph: Arc::new(graph),
                hot_after,
                probes: 0,
                candidate: false,
            },
        );
        trace
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with_graph(self, target: FunctionId, graph: Graph, hot_after: usize) -> Self {
        self.register(target, graph, hot_after);
        self
    }

    /// Total `mark_offload_candidate` calls.
    pub fn mark_count(&self) -> usize {
        self.marks.load(Ordering::SeqCst)
    }

    /// How often the graph for `trace` has been asked for.
    pub fn probe_count(&self, trace: TraceId) -> usize {
        self.lock().scripts.get(&trace).map_or(0, |s| s.probes)
    }
}

impl GraphProvider for ScriptedGraphProvider {
    fn mark_offload_candidate(&self, target: FunctionId) {
        self.marks.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        let trace = state.trace_for(target);
        if let Some(script) = state.scripts.get_mut(&trace) {
            script.candidate = true;
        }
    }

    fn trace_identity(&self, target: FunctionId) -> TraceId {
        self.lock().trace_for(target)
    }

    fn lowered_graph(&self, trace: TraceId) -> Option<Arc<Graph>> {
        let mut state = self.lock();
        let script = state.scripts.get_mut(&trace)?;
        if !script.candidate {
            return None;
        }
        script.probes += 1;
        (script.probes >= script.hot_after).then(|| Arc::clone(&script.graph))
    }
}
