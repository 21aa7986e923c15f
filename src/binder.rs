//! Positional argument binding with aggregated failure reporting.
//!
//! Arguments are bound strictly in ascending slot order. Every slot is bound
//! even after a failure so the error names all rejected slots; the caller
//! checks once with [`ArgBinder::finish`] and enqueues the returned
//! [`BoundKernel`].
//!
//! A binder holds the kernel's launch lock until the bound launch is
//! enqueued or dropped. Threads sharing a [`Dispatcher`] therefore never see
//! each other's arguments.

use crate::context::Dispatcher;
use crate::device::{DeviceBuffer, KernelArg, KernelHandle};
use crate::error::{BindFailure, DispatchError, Result};
use crate::precision::Dtype;
use crate::work::WorkSize;
use core::fmt;
use parking_lot::MutexGuard;

/// Binds the argument list of one kernel launch.
#[must_use = "binding errors are only reported by `finish`"]
pub struct ArgBinder<'a> {
    ctx: &'a Dispatcher,
    kernel: &'a KernelHandle,
    serial: MutexGuard<'a, ()>,
    next: u32,
    failures: Vec<BindFailure>,
    precondition: Option<DispatchError>,
}

impl<'a> ArgBinder<'a> {
    /// Takes the launch lock of `kernel`, blocking while another binder holds it.
    pub fn new(ctx: &'a Dispatcher, kernel: &'a KernelHandle) -> Self {
        Self {
            ctx,
            kernel,
            serial: kernel.serialize(),
            next: 0,
            failures: Vec::new(),
            precondition: None,
        }
    }

    /// Binds the next slot.
    pub fn arg(mut self, arg: KernelArg) -> Self {
        let index = self.next;
        self.next += 1;
        let code = self.ctx.device().set_kernel_arg(self.kernel, index, &arg);
        if !code.is_success() {
            log::trace!("{} arg {index} ({}) rejected: {code}", self.kernel.name(), arg.kind());
            self.failures.push(BindFailure { index, code });
        }
        self
    }

    pub fn int(self, value: i32) -> Self {
        self.arg(KernelArg::Int(value))
    }

    pub fn uint(self, value: u32) -> Self {
        self.arg(KernelArg::Uint(value))
    }

    /// Binds a problem size as the device's 32-bit `int`.
    ///
    /// Sizes that do not fit are recorded as a precondition violation and
    /// the slot is bound as `0` to keep later indices aligned.
    pub fn size(mut self, value: usize) -> Self {
        let bound = match i32::try_from(value) {
            Ok(v) => v,
            Err(_) => {
                if self.precondition.is_none() {
                    self.precondition = Some(DispatchError::precondition(
                        "bind",
                        format!(
                            "{} arg {}: size {value} exceeds i32::MAX",
                            self.kernel.name(),
                            self.next
                        ),
                    ));
                }
                0
            }
        };
        self.int(bound)
    }

    /// Binds consecutive problem sizes.
    pub fn sizes(self, values: &[usize]) -> Self {
        values.iter().fold(self, |binder, &value| binder.size(value))
    }

    /// Binds a precision-matched scalar.
    pub fn real<T: Dtype>(self, value: T) -> Self {
        self.arg(value.into_arg())
    }

    /// Binds a single-precision scalar regardless of the kernel precision.
    pub fn single(self, value: f32) -> Self {
        self.arg(KernelArg::Float(value))
    }

    pub fn flag(self, value: bool) -> Self {
        self.arg(KernelArg::Bool(value))
    }

    pub fn counter(self, value: [u32; 4]) -> Self {
        self.arg(KernelArg::Counter(value))
    }

    pub fn buffer(self, buffer: &DeviceBuffer) -> Self {
        self.arg(KernelArg::Buffer(*buffer))
    }

    /// Binds a buffer or an explicit null.
    pub fn optional(self, buffer: Option<&DeviceBuffer>) -> Self {
        self.arg(buffer.map_or(KernelArg::NullBuffer, KernelArg::from))
    }

    /// Reserves local scratch memory.
    pub fn scratch(self, bytes: usize) -> Self {
        self.arg(KernelArg::LocalScratch(bytes))
    }

    /// Number of slots bound so far.
    pub fn bound(&self) -> u32 {
        self.next
    }

    /// Checks every bind at once.
    ///
    /// On failure the launch lock is released with the binder.
    pub fn finish(self) -> Result<BoundKernel<'a>> {
        if let Some(err) = self.precondition {
            log::error!("{err}");
            return Err(err);
        }
        if self.failures.is_empty() {
            return Ok(BoundKernel {
                ctx: self.ctx,
                kernel: self.kernel,
                _serial: self.serial,
            });
        }
        let err = DispatchError::ArgumentBindingFailed {
            kernel: self.kernel.name().to_owned(),
            failures: self.failures,
        };
        log::error!("{err}");
        Err(err)
    }
}

/// A kernel whose every argument is bound, still holding its launch lock.
#[must_use = "a bound kernel does nothing until enqueued"]
pub struct BoundKernel<'a> {
    ctx: &'a Dispatcher,
    kernel: &'a KernelHandle,
    _serial: MutexGuard<'a, ()>,
}

impl BoundKernel<'_> {
    pub fn kernel(&self) -> &KernelHandle {
        self.kernel
    }

    /// Enqueues the launch and releases the lock.
    pub fn enqueue(self, work: &WorkSize) -> Result<()> {
        self.ctx.launch(self.kernel, work)
    }
}

impl fmt::Debug for BoundKernel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BoundKernel").field(&self.kernel.name()).finish()
    }
}
