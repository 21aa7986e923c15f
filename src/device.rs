//! The device execution boundary.
//!
//! A [`ComputeDevice`] owns kernel compilation, buffer storage and a single
//! in-order command queue. The dispatch layer only talks to it through
//! this trait: it looks kernels up by name, binds arguments slot by slot,
//! enqueues launches and, for the loss readback, maps a buffer back to host
//! memory. Buffers are created and released by callers.

use crate::error::{DispatchError, Result, StatusCode};
use crate::work::WorkSize;
use bytemuck::Pod;
use core::fmt;
use core::hash::{Hash, Hasher};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Opaque handle to a device buffer with its length in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceBuffer {
    id: u64,
    len_bytes: usize,
}

impl DeviceBuffer {
    /// Wraps a device-assigned id. Only devices should mint buffers.
    pub const fn new(id: u64, len_bytes: usize) -> Self {
        Self { id, len_bytes }
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    pub const fn len_bytes(&self) -> usize {
        self.len_bytes
    }

    /// Number of whole `T` elements that fit in the buffer.
    pub const fn len_of<T>(&self) -> usize {
        self.len_bytes / core::mem::size_of::<T>()
    }
}

/// A compiled kernel, cheap to clone.
///
/// Argument slots live on the device and belong to the compiled artifact, so
/// every clone of a handle shares one launch lock. The dispatcher holds it
/// from the first bound argument until the launch is enqueued.
#[derive(Clone)]
pub struct KernelHandle {
    name: Arc<str>,
    id: u64,
    launch: Arc<Mutex<()>>,
}

impl KernelHandle {
    pub fn new(name: &str, id: u64) -> Self {
        Self {
            name: Arc::from(name),
            id,
            launch: Arc::new(Mutex::new(())),
        }
    }

    /// Full kernel name including the precision suffix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device-assigned identity of the compiled artifact.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Exclusive access to the argument slots of this kernel.
    pub(crate) fn serialize(&self) -> MutexGuard<'_, ()> {
        self.launch.lock()
    }
}

impl PartialEq for KernelHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name
    }
}

impl Eq for KernelHandle {}

impl Hash for KernelHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Debug for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelHandle")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

/// Value bound to one kernel argument slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    /// 32-bit signed integer.
    Int(i32),
    /// 32-bit unsigned integer.
    Uint(u32),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Boolean flag.
    Bool(bool),
    /// Four-word counter block for counter-based generators.
    Counter([u32; 4]),
    /// Device buffer reference.
    Buffer(DeviceBuffer),
    /// Explicit null buffer for optional outputs.
    NullBuffer,
    /// Local scratch reservation, size in bytes.
    LocalScratch(usize),
}

impl KernelArg {
    /// Size in bytes the argument occupies in the launch record.
    pub const fn size(&self) -> usize {
        match self {
            Self::Int(_) | Self::Uint(_) | Self::Float(_) | Self::Bool(_) => 4,
            Self::Double(_) | Self::Buffer(_) | Self::NullBuffer => 8,
            Self::Counter(_) => 16,
            Self::LocalScratch(bytes) => *bytes,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Uint(_) => "uint",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Bool(_) => "bool",
            Self::Counter(_) => "counter",
            Self::Buffer(_) => "buffer",
            Self::NullBuffer => "null",
            Self::LocalScratch(_) => "scratch",
        }
    }
}

impl From<&DeviceBuffer> for KernelArg {
    fn from(buffer: &DeviceBuffer) -> Self {
        Self::Buffer(*buffer)
    }
}

/// Device execution context consumed by the dispatcher.
///
/// Status-returning methods mirror the device runtime: they report a code and
/// leave aggregation and logging to the caller.
pub trait ComputeDevice: Send + Sync {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Looks up or compiles the kernel with the given full name.
    ///
    /// Each call yields a fresh handle; caching is the registry's job.
    fn load_kernel(&self, name: &str) -> core::result::Result<KernelHandle, StatusCode>;

    /// Binds one argument slot of a kernel.
    fn set_kernel_arg(&self, kernel: &KernelHandle, index: u32, arg: &KernelArg) -> StatusCode;

    /// Enqueues a launch of the kernel with its currently bound arguments.
    fn enqueue(&self, kernel: &KernelHandle, work: &WorkSize) -> StatusCode;

    /// Allocates a zero-filled buffer.
    fn create_buffer(&self, len_bytes: usize) -> core::result::Result<DeviceBuffer, StatusCode>;

    /// Copies host bytes into a buffer at a byte offset.
    fn write_buffer(&self, buffer: &DeviceBuffer, offset: usize, data: &[u8]) -> StatusCode;

    /// Blocking map, read and unmap of a byte range.
    ///
    /// Completes all previously enqueued work before reading.
    fn read_buffer(&self, buffer: &DeviceBuffer, offset: usize, out: &mut [u8]) -> StatusCode;

    /// Frees a buffer. Unknown buffers are ignored.
    fn release_buffer(&self, buffer: DeviceBuffer);

    /// Blocks until the queue is drained.
    fn finish(&self) -> StatusCode;

    /// Largest number of work-items allowed in one work-group.
    fn max_work_group_size(&self) -> usize;
}

/// Allocates a buffer holding a copy of `data`.
pub fn upload<T: Pod>(device: &dyn ComputeDevice, data: &[T]) -> Result<DeviceBuffer> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    let buffer = device
        .create_buffer(bytes.len())
        .map_err(|code| DispatchError::TransferFailed { stage: "create buffer", code })?;
    let code = device.write_buffer(&buffer, 0, bytes);
    if !code.is_success() {
        device.release_buffer(buffer);
        return Err(DispatchError::TransferFailed { stage: "write buffer", code });
    }
    Ok(buffer)
}

/// Allocates a zero-filled buffer of `len` elements of `T`.
pub fn zeroed<T: Pod>(device: &dyn ComputeDevice, len: usize) -> Result<DeviceBuffer> {
    device
        .create_buffer(len * core::mem::size_of::<T>())
        .map_err(|code| DispatchError::TransferFailed { stage: "create buffer", code })
}

/// Overwrites the start of a buffer with `data`.
pub fn write<T: Pod>(device: &dyn ComputeDevice, buffer: &DeviceBuffer, data: &[T]) -> Result<()> {
    device
        .write_buffer(buffer, 0, bytemuck::cast_slice(data))
        .check()
        .map_err(|code| DispatchError::TransferFailed { stage: "write buffer", code })
}

/// Reads the whole buffer back as elements of `T`.
pub fn download<T: Pod>(device: &dyn ComputeDevice, buffer: &DeviceBuffer) -> Result<Vec<T>> {
    let mut out = vec![T::zeroed(); buffer.len_of::<T>()];
    device
        .read_buffer(buffer, 0, bytemuck::cast_slice_mut(&mut out))
        .check()
        .map_err(|code| DispatchError::TransferFailed { stage: "map buffer", code })?;
    Ok(out)
}
