// crates/offload-jit/src/compiler.rs
//! The kernel-compiler collaborator.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use offload_runtime::{TypeDescriptor, Value};

use crate::errors::CompileResult;
use crate::graph::Graph;
use crate::kernel::HostKernel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelId(u64);

impl KernelId {
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kernel#{}", self.0)
    }
}

/// An opaque compiled kernel.
///
/// The payload belongs to whichever backend produced it; a device runtime
/// downcasts it to the kernel form it knows how to launch.
#[derive(Clone)]
pub struct KernelHandle {
    id: KernelId,
    payload: Arc<dyn Any + Send + Sync>,
}

impl KernelHandle {
    pub fn new<K: Any + Send + Sync>(id: KernelId, kernel: K) -> Self {
        Self {
            id,
            payload: Arc::new(kernel),
        }
    }

    pub fn id(&self) -> KernelId {
        self.id
    }

    pub fn downcast<K: Any>(&self) -> Option<&K> {
        self.payload.downcast_ref::<K>()
    }
}

impl fmt::Debug for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelHandle").field("id", &self.id).finish()
    }
}

/// Turns a shaped graph plus its types into a device kernel.
pub trait KernelCompiler: Send + Sync {
    fn compile(
        &self,
        graph: &Graph,
        input: &TypeDescriptor,
        output: &TypeDescriptor,
        scope: &[Value],
    ) -> CompileResult<KernelHandle>;
}

/// Compiles graphs into [`HostKernel`]s for the [`HostDevice`](crate::HostDevice).
#[derive(Debug, Default)]
pub struct HostKernelCompiler {
    next_id: AtomicU64,
    compiled: AtomicUsize,
}

impl HostKernelCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful compilations so far.
    pub fn compile_count(&self) -> usize {
        self.compiled.load(Ordering::SeqCst)
    }
}

impl KernelCompiler for HostKernelCompiler {
    #[tracing::instrument(level = "debug", skip_all, fields(input = %input, output = %output))]
    fn compile(
        &self,
        graph: &Graph,
        input: &TypeDescriptor,
        output: &TypeDescriptor,
        scope: &[Value],
    ) -> CompileResult<KernelHandle> {
        let kernel = HostKernel::check(graph.clone(), input, output, scope)?;
        let id = KernelId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.compiled.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(%id, nodes = graph.len(), "compiled host kernel");
        Ok(KernelHandle::new(id, kernel))
    }
}
