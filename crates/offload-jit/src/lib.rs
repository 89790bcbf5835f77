// crates/offload-jit/src/lib.rs
//! Offload JIT: lowered graphs, shaping passes, kernel compilation and device execution.
//!
//! The collaborator contracts live here ([`GraphProvider`], [`KernelCompiler`],
//! [`DeviceRuntime`]) together with reference implementations that run
//! everything on the host, so the pipeline can be exercised without an
//! accelerator.
pub mod compiler;
pub mod device;
pub mod errors;
pub mod executor;
pub mod graph;
pub mod kernel;
pub mod passes;
pub mod provider;
pub mod unit;

pub use compiler::{HostKernelCompiler, KernelCompiler, KernelHandle, KernelId};
pub use device::{BufferId, DeviceBuffer, DeviceInfo, DeviceRuntime, HostDevice, Launch};
pub use errors::{
    CompileError, CompileResult, DeviceError, DeviceResult, JitError, JitResult,
};
pub use executor::{Executor, ExecutorCache};
pub use graph::{BinaryOp, CompareOp, Graph, GraphBuilder, Node, NodeId, TraceId, UnaryOp};
pub use kernel::{Deopt, HostKernel};
pub use passes::{ScopeBinding, detect_scope, shape};
pub use provider::{GraphProvider, NoGraphs, ScriptedGraphProvider};
pub use unit::{CompilationUnit, UnitCache};
