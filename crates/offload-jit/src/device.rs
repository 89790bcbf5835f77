// crates/offload-jit/src/device.rs
//! The device-runtime collaborator and the host reference device.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use offload_runtime::{Column, IntSequence, Scalar, ScalarKind, Value};
use rustc_hash::FxHashMap;

use crate::compiler::KernelHandle;
use crate::errors::{DeviceError, DeviceResult};
use crate::kernel::{Deopt, HostKernel, Row};

/// Read-only description of a device, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub kind: String,
    pub driver: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}, driver {})",
            self.name, self.vendor, self.kind, self.driver
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl BufferId {
    pub fn index(self) -> u64 {
        self.0
    }
}

/// Handle to a typed buffer living on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBuffer {
    pub id: BufferId,
    pub kind: ScalarKind,
    pub len: usize,
}

/// Everything a single kernel launch needs.
#[derive(Debug)]
pub struct Launch<'a> {
    pub kernel: &'a KernelHandle,
    pub inputs: &'a [DeviceBuffer],
    pub outputs: &'a [DeviceBuffer],
    /// One Int element; non-zero after the launch means the result is unusable.
    pub deopt: DeviceBuffer,
    pub scope: &'a [Value],
    pub len: usize,
}

/// Allocation, transfer and launch primitives of a device.
///
/// Launches are synchronous: when `launch` returns, outputs and the deopt
/// flag are final.
pub trait DeviceRuntime: Send + Sync {
    fn info(&self) -> DeviceInfo;
    fn allocate(&self, kind: ScalarKind, len: usize) -> DeviceResult<DeviceBuffer>;
    fn write(&self, buffer: DeviceBuffer, data: &Column) -> DeviceResult<()>;
    fn launch(&self, launch: &Launch<'_>) -> DeviceResult<()>;
    fn read(&self, buffer: DeviceBuffer) -> DeviceResult<Column>;
    fn release(&self, buffer: DeviceBuffer);
}

// ============================================================================
// Host device
// ============================================================================

#[derive(Debug, Clone)]
enum Storage {
    Int(Vec<i32>),
    Double(Vec<f64>),
    Boolean(Vec<bool>),
    /// Read-only Int input written as start and stride.
    IntSequence(IntSequence),
}

impl Storage {
    fn zeroed(kind: ScalarKind, len: usize) -> Self {
        match kind {
            ScalarKind::Int => Storage::Int(vec![0; len]),
            ScalarKind::Double => Storage::Double(vec![0.0; len]),
            ScalarKind::Boolean => Storage::Boolean(vec![false; len]),
        }
    }

    fn kind(&self) -> ScalarKind {
        match self {
            Storage::Int(_) | Storage::IntSequence(_) => ScalarKind::Int,
            Storage::Double(_) => ScalarKind::Double,
            Storage::Boolean(_) => ScalarKind::Boolean,
        }
    }

    fn len(&self) -> usize {
        match self {
            Storage::Int(v) => v.len(),
            Storage::Double(v) => v.len(),
            Storage::Boolean(v) => v.len(),
            Storage::IntSequence(seq) => seq.len(),
        }
    }

    fn get(&self, index: usize) -> Option<Scalar> {
        match self {
            Storage::Int(v) => v.get(index).copied().map(Scalar::Int),
            Storage::Double(v) => v.get(index).copied().map(Scalar::Double),
            Storage::Boolean(v) => v.get(index).copied().map(Scalar::Bool),
            Storage::IntSequence(seq) => seq.get(index).map(Scalar::Int),
        }
    }

    fn set(&mut self, index: usize, value: Scalar) -> bool {
        match (self, value) {
            (Storage::Int(v), Scalar::Int(x)) => v.get_mut(index).map(|slot| *slot = x).is_some(),
            (Storage::Double(v), Scalar::Double(x)) => {
                v.get_mut(index).map(|slot| *slot = x).is_some()
            }
            (Storage::Boolean(v), Scalar::Bool(x)) => {
                v.get_mut(index).map(|slot| *slot = x).is_some()
            }
            _ => false,
        }
    }

    fn to_column(&self) -> Column {
        match self {
            Storage::Int(v) => Column::Int(Arc::from(v.as_slice())),
            Storage::Double(v) => Column::Double(Arc::from(v.as_slice())),
            Storage::Boolean(v) => Column::Boolean(Arc::from(v.as_slice())),
            Storage::IntSequence(seq) => Column::IntSequence(*seq),
        }
    }
}

/// Bytes moved to the device for `data`.
fn transfer_size(data: &Column) -> usize {
    match data {
        Column::IntSequence(_) => 2 * size_of::<i32>() + size_of::<u64>(),
        other => element_size(other.kind()) * other.len(),
    }
}

fn element_size(kind: ScalarKind) -> usize {
    match kind {
        ScalarKind::Int => size_of::<i32>(),
        ScalarKind::Double => size_of::<f64>(),
        ScalarKind::Boolean => size_of::<bool>(),
    }
}

#[derive(Debug, Default)]
struct HostDeviceState {
    buffers: FxHashMap<BufferId, Storage>,
    next_id: u64,
    used: usize,
}

impl HostDeviceState {
    fn storage(&self, buffer: DeviceBuffer) -> DeviceResult<&Storage> {
        self.buffers
            .get(&buffer.id)
            .ok_or(DeviceError::UnknownBuffer { id: buffer.id.0 })
    }

    fn storage_mut(&mut self, buffer: DeviceBuffer) -> DeviceResult<&mut Storage> {
        self.buffers
            .get_mut(&buffer.id)
            .ok_or(DeviceError::UnknownBuffer { id: buffer.id.0 })
    }
}

/// Runs [`HostKernel`]s on the calling thread.
///
/// Supports a memory cap, to exercise allocation failures, and a forced
/// deopt switch that raises the flag after every launch has written its
/// outputs.
#[derive(Debug, Default)]
pub struct HostDevice {
    state: Mutex<HostDeviceState>,
    capacity: Option<usize>,
    force_deopt: AtomicBool,
    launches: AtomicUsize,
    allocations: AtomicUsize,
    bytes_written: AtomicUsize,
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit total live buffer memory to `bytes`.
    #[must_use]
    pub fn with_capacity(mut self, bytes: usize) -> Self {
        self.capacity = Some(bytes);
        self
    }

    pub fn set_force_deopt(&self, on: bool) {
        self.force_deopt.store(on, Ordering::SeqCst);
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Total bytes copied in by `write`.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written.load(Ordering::SeqCst)
    }

    pub fn live_buffers(&self) -> usize {
        self.lock().buffers.len()
    }

    fn lock(&self) -> MutexGuard<'_, HostDeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceRuntime for HostDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "host".to_string(),
            vendor: "offload".to_string(),
            kind: "CPU".to_string(),
            driver: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn allocate(&self, kind: ScalarKind, len: usize) -> DeviceResult<DeviceBuffer> {
        let bytes = element_size(kind) * len;
        let mut state = self.lock();
        if let Some(capacity) = self.capacity
            && state.used + bytes > capacity
        {
            return Err(DeviceError::OutOfMemory {
                requested: bytes,
                available: capacity.saturating_sub(state.used),
            });
        }
        state.next_id += 1;
        let id = BufferId(state.next_id);
        state.buffers.insert(id, Storage::zeroed(kind, len));
        state.used += bytes;
        self.allocations.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(id = id.0, %kind, len, "allocated buffer");
        Ok(DeviceBuffer { id, kind, len })
    }

    fn write(&self, buffer: DeviceBuffer, data: &Column) -> DeviceResult<()> {
        let mut state = self.lock();
        let storage = state.storage_mut(buffer)?;
        if storage.kind() != data.kind() || storage.len() != data.len() {
            return Err(DeviceError::BufferLayout {
                id: buffer.id.0,
                expected: format!("{} x {}", storage.kind(), storage.len()),
                found: format!("{} x {}", data.kind(), data.len()),
            });
        }
        *storage = match data {
            Column::Int(c) => Storage::Int(c.to_vec()),
            Column::Double(c) => Storage::Double(c.to_vec()),
            Column::Boolean(c) => Storage::Boolean(c.to_vec()),
            Column::IntSequence(seq) => Storage::IntSequence(*seq),
        };
        self.bytes_written
            .fetch_add(transfer_size(data), Ordering::SeqCst);
        Ok(())
    }

    fn launch(&self, launch: &Launch<'_>) -> DeviceResult<()> {
        let kernel = launch
            .kernel
            .downcast::<HostKernel>()
            .ok_or_else(|| DeviceError::Launch {
                reason: format!("{} was not built for the host device", launch.kernel.id()),
            })?;
        self.launches.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        let mut results: Vec<Row> = Vec::with_capacity(launch.len);
        let mut flag = 0i32;
        {
            let inputs = launch
                .inputs
                .iter()
                .map(|b| state.storage(*b))
                .collect::<DeviceResult<Vec<_>>>()?;
            for i in 0..launch.len {
                let row: Row = inputs
                    .iter()
                    .map(|s| s.get(i))
                    .collect::<Option<Row>>()
                    .ok_or_else(|| DeviceError::Launch {
                        reason: format!("input buffers are shorter than {}", launch.len),
                    })?;
                match kernel.run(&row, launch.scope) {
                    Ok(out) => results.push(out),
                    Err(Deopt) => {
                        flag = i32::try_from(i + 1).unwrap_or(i32::MAX);
                        break;
                    }
                }
            }
        }

        for (i, row) in results.iter().enumerate() {
            for (field, buffer) in launch.outputs.iter().enumerate() {
                let value = row.get(field).copied();
                let storage = state.storage_mut(*buffer)?;
                if !value.is_some_and(|v| storage.set(i, v)) {
                    return Err(DeviceError::BufferLayout {
                        id: buffer.id.0,
                        expected: format!("{} x {}", buffer.kind, launch.len),
                        found: format!("{value:?} at {i}"),
                    });
                }
            }
        }

        if flag == 0 && self.force_deopt.load(Ordering::SeqCst) {
            flag = 1;
        }
        if flag != 0 {
            tracing::debug!(element = flag - 1, "kernel raised deopt flag");
        }
        let deopt = state.storage_mut(launch.deopt)?;
        if !deopt.set(0, Scalar::Int(flag)) {
            return Err(DeviceError::BufferLayout {
                id: launch.deopt.id.0,
                expected: "Int x 1".to_string(),
                found: format!("{} x {}", deopt.kind(), deopt.len()),
            });
        }
        Ok(())
    }

    fn read(&self, buffer: DeviceBuffer) -> DeviceResult<Column> {
        Ok(self.lock().storage(buffer)?.to_column())
    }

    fn release(&self, buffer: DeviceBuffer) {
        let mut state = self.lock();
        if let Some(storage) = state.buffers.remove(&buffer.id) {
            state.used = state
                .used
                .saturating_sub(element_size(storage.kind()) * storage.len());
        }
    }
}
