// src/context.rs
//! The runtime context: registries, caches and collaborators.
//!
//! Everything the operators remember between calls hangs off one
//! [`RuntimeContext`]. Mutation goes through `&mut RuntimeContext`, so the
//! registries need no locking of their own.

use std::sync::Arc;

use offload_jit::{
    DeviceInfo, DeviceRuntime, ExecutorCache, GraphProvider, HostDevice, HostKernelCompiler,
    KernelCompiler, NoGraphs, UnitCache,
};
use rustc_hash::FxHashMap;

use crate::composition::CompositionRegistry;
use crate::errors::{OffloadError, OffloadResult};
use crate::function_registry::FunctionRegistry;
use crate::options::OffloadOptions;

pub struct RuntimeContext {
    pub(crate) options: OffloadOptions,
    pub(crate) functions: FunctionRegistry,
    pub(crate) units: UnitCache,
    pub(crate) executors: ExecutorCache,
    pub(crate) compositions: CompositionRegistry,
    pub(crate) graphs: Arc<dyn GraphProvider>,
    pub(crate) compiler: Arc<dyn KernelCompiler>,
    pub(crate) device: Arc<dyn DeviceRuntime>,
    pools: FxHashMap<usize, Arc<rayon::ThreadPool>>,
}

impl RuntimeContext {
    /// A context that never sees a lowered graph and runs kernels on the host.
    pub fn new(options: OffloadOptions) -> Self {
        Self::builder(options).build()
    }

    pub fn builder(options: OffloadOptions) -> RuntimeContextBuilder {
        RuntimeContextBuilder {
            options,
            graphs: Arc::new(NoGraphs),
            compiler: Arc::new(HostKernelCompiler::new()),
            device: Arc::new(HostDevice::new()),
        }
    }

    pub fn options(&self) -> &OffloadOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut OffloadOptions {
        &mut self.options
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn units(&self) -> &UnitCache {
        &self.units
    }

    pub fn executors(&self) -> &ExecutorCache {
        &self.executors
    }

    pub fn compositions(&self) -> &CompositionRegistry {
        &self.compositions
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.device.info()
    }

    /// Fixed-size worker pool, created on first use and kept per size.
    pub(crate) fn pool(&mut self, threads: usize) -> OffloadResult<Arc<rayon::ThreadPool>> {
        let threads = threads.max(1);
        if let Some(pool) = self.pools.get(&threads) {
            return Ok(Arc::clone(pool));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("offload-worker-{i}"))
            .build()
            .map_err(|e| OffloadError::WorkerPool {
                threads,
                reason: e.to_string(),
            })?;
        tracing::debug!(threads, "started worker pool");
        let pool = Arc::new(pool);
        self.pools.insert(threads, Arc::clone(&pool));
        Ok(pool)
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new(OffloadOptions::default())
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("options", &self.options)
            .field("functions", &self.functions.len())
            .field("units", &self.units.len())
            .field("executors", &self.executors.len())
            .field("pools", &self.pools.len())
            .finish()
    }
}

/// Builder for swapping in collaborators.
pub struct RuntimeContextBuilder {
    options: OffloadOptions,
    graphs: Arc<dyn GraphProvider>,
    compiler: Arc<dyn KernelCompiler>,
    device: Arc<dyn DeviceRuntime>,
}

impl RuntimeContextBuilder {
    #[must_use]
    pub fn graph_provider(mut self, graphs: Arc<dyn GraphProvider>) -> Self {
        self.graphs = graphs;
        self
    }

    #[must_use]
    pub fn kernel_compiler(mut self, compiler: Arc<dyn KernelCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    #[must_use]
    pub fn device(mut self, device: Arc<dyn DeviceRuntime>) -> Self {
        self.device = device;
        self
    }

    pub fn build(self) -> RuntimeContext {
        RuntimeContext {
            options: self.options,
            functions: FunctionRegistry::new(),
            units: UnitCache::new(),
            executors: ExecutorCache::new(),
            compositions: CompositionRegistry::new(),
            graphs: self.graphs,
            compiler: self.compiler,
            device: self.device,
            pools: FxHashMap::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_is_empty() {
        let ctx = RuntimeContext::default();
        assert!(ctx.functions().is_empty());
        assert!(ctx.units().is_empty());
        assert!(ctx.executors().is_empty());
        assert_eq!(ctx.device_info().name, "host");
    }

    #[test]
    fn pools_are_cached_per_size() {
        let mut ctx = RuntimeContext::default();
        let a = ctx.pool(2).unwrap();
        let b = ctx.pool(2).unwrap();
        let c = ctx.pool(3).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.current_num_threads(), 2);
    }
}
