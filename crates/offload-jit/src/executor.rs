// crates/offload-jit/src/executor.rs
//! Per-unit device execution: copy in, launch, copy out, inspect the deopt flag.

use std::sync::Arc;

use offload_runtime::{
    Column, MAX_TUPLE_ARITY, MarshaledArray, RuntimeTypeError, Scalar, ScalarKind, TypeDescriptor,
    Value,
};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::device::{DeviceBuffer, DeviceRuntime, Launch};
use crate::errors::{DeviceError, JitResult};
use crate::graph::TraceId;
use crate::unit::CompilationUnit;

/// Owns the device buffers of one compilation unit.
///
/// Buffers are kept between launches and only reallocated when the element
/// count changes; the layout is fixed by the unit's descriptors. Only the
/// scope slots the kernel reads are passed to the device.
pub struct Executor {
    unit: Arc<CompilationUnit>,
    device: Arc<dyn DeviceRuntime>,
    scope: Vec<Value>,
    inputs: SmallVec<[DeviceBuffer; MAX_TUPLE_ARITY]>,
    outputs: SmallVec<[DeviceBuffer; MAX_TUPLE_ARITY]>,
    deopt: Option<DeviceBuffer>,
    allocated_len: usize,
    len: usize,
}

impl Executor {
    pub fn new(unit: Arc<CompilationUnit>, device: Arc<dyn DeviceRuntime>) -> Self {
        let scope = bind_scope(&unit);
        Self {
            unit,
            device,
            scope,
            inputs: SmallVec::new(),
            outputs: SmallVec::new(),
            deopt: None,
            allocated_len: 0,
            len: 0,
        }
    }

    pub fn unit(&self) -> &Arc<CompilationUnit> {
        &self.unit
    }

    /// Copy `input` into device buffers, clearing the deopt flag.
    #[tracing::instrument(level = "debug", skip_all, fields(len = input.len()))]
    pub fn copy_to_device(&mut self, input: &MarshaledArray) -> JitResult<()> {
        check_layout(self.unit.input(), input.ty())?;
        self.ensure_buffers(input.len())?;
        for (buffer, column) in self.inputs.iter().zip(input.columns()) {
            self.device.write(*buffer, column)?;
        }
        let flag = self.deopt_buffer()?;
        self.device.write(flag, &Column::Int(Arc::from([0].as_slice())))?;
        self.len = input.len();
        Ok(())
    }

    /// Launch the unit's kernel over the copied input with its bound scope.
    #[tracing::instrument(level = "debug", skip_all, fields(kernel = %self.unit.kernel().id(), len = self.len))]
    pub fn execute_on_device(&mut self) -> JitResult<()> {
        let deopt = self.deopt_buffer()?;
        self.device.launch(&Launch {
            kernel: self.unit.kernel(),
            inputs: &self.inputs,
            outputs: &self.outputs,
            deopt,
            scope: &self.scope,
            len: self.len,
        })?;
        Ok(())
    }

    /// Read the output buffers back as a columnar array.
    #[tracing::instrument(level = "debug", skip_all, fields(len = self.len))]
    pub fn copy_to_host(&self) -> JitResult<MarshaledArray> {
        let mut columns = SmallVec::<[Column; MAX_TUPLE_ARITY]>::new();
        for buffer in &self.outputs {
            columns.push(truncate(self.device.read(*buffer)?, self.len));
        }
        Ok(MarshaledArray::new(self.unit.output().clone(), columns)?)
    }

    /// Whether the last launch asked for the whole call to be redone.
    pub fn deopt_flag(&self) -> JitResult<bool> {
        let flag = self.device.read(self.deopt_buffer()?)?;
        Ok(!matches!(flag.get(0), Some(Scalar::Int(0))))
    }

    fn deopt_buffer(&self) -> JitResult<DeviceBuffer> {
        self.deopt.ok_or_else(|| {
            DeviceError::Launch {
                reason: "no input has been copied to the device".to_string(),
            }
            .into()
        })
    }

    fn ensure_buffers(&mut self, len: usize) -> JitResult<()> {
        if self.deopt.is_some() && self.allocated_len == len {
            return Ok(());
        }
        self.release_all();
        let input_kinds = self.unit.input().column_kinds();
        let output_kinds = self.unit.output().column_kinds();
        for kind in input_kinds {
            let buffer = self.device.allocate(kind, len)?;
            self.inputs.push(buffer);
        }
        for kind in output_kinds {
            let buffer = self.device.allocate(kind, len)?;
            self.outputs.push(buffer);
        }
        self.deopt = Some(self.device.allocate(ScalarKind::Int, 1)?);
        self.allocated_len = len;
        tracing::trace!(len, "allocated executor buffers");
        Ok(())
    }

    fn release_all(&mut self) {
        for buffer in self.inputs.drain(..).chain(self.outputs.drain(..)) {
            self.device.release(buffer);
        }
        if let Some(flag) = self.deopt.take() {
            self.device.release(flag);
        }
        self.allocated_len = 0;
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("kernel", &self.unit.kernel().id())
            .field("allocated_len", &self.allocated_len)
            .field("len", &self.len)
            .finish()
    }
}

/// Scope values at the slots the unit's bindings name; other slots stay null.
fn bind_scope(unit: &CompilationUnit) -> Vec<Value> {
    let captured = unit.scope();
    let mut bound = vec![Value::Null; captured.len()];
    for binding in unit.bindings() {
        let slot = binding.slot as usize;
        if let (Some(dst), Some(src)) = (bound.get_mut(slot), captured.get(slot)) {
            *dst = src.clone();
        }
    }
    bound
}

fn check_layout(expected: &TypeDescriptor, found: &TypeDescriptor) -> JitResult<()> {
    if expected == found {
        return Ok(());
    }
    Err(RuntimeTypeError::UnsupportedDataType {
        expected: expected.to_string(),
        found: found.to_string(),
    }
    .into())
}

fn truncate(column: Column, len: usize) -> Column {
    if column.len() == len {
        return column;
    }
    match column {
        Column::Int(c) => Column::Int(c.iter().copied().take(len).collect()),
        Column::Double(c) => Column::Double(c.iter().copied().take(len).collect()),
        Column::Boolean(c) => Column::Boolean(c.iter().copied().take(len).collect()),
        Column::IntSequence(seq) => Column::IntSequence(seq.prefix(len)),
    }
}

/// One memoized executor per trace identity.
#[derive(Debug, Default)]
pub struct ExecutorCache {
    executors: FxHashMap<TraceId, Executor>,
}

impl ExecutorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &mut self,
        trace: TraceId,
        unit: &Arc<CompilationUnit>,
        device: &Arc<dyn DeviceRuntime>,
    ) -> &mut Executor {
        self.executors.entry(trace).or_insert_with(|| {
            tracing::debug!(%trace, "created executor");
            Executor::new(Arc::clone(unit), Arc::clone(device))
        })
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
