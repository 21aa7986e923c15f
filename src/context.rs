//! The dispatch context.
//!
//! [`Dispatcher`] bundles everything a catalog operation needs: the device,
//! the kernel cache, the random counter and the configuration. It is passed
//! by reference into every operation, so there is no hidden global state.

use crate::binder::ArgBinder;
use crate::config::DispatchConfig;
use crate::device::{ComputeDevice, DeviceBuffer, KernelHandle};
use crate::error::{DispatchError, Result};
use crate::precision::{Dtype, Precision};
use crate::registry::KernelRegistry;
use crate::work::{LinearPolicy, WorkSize};
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Monotonic counter seeding the counter-based random generator.
///
/// Each draw returns the current value and advances by one, wrapping at
/// `u32::MAX`. There is no reset; pin a sequence by constructing the
/// counter with a known start.
#[derive(Debug, Default)]
pub struct RandomCounter {
    next: AtomicU32,
}

impl RandomCounter {
    pub const fn starting_at(start: u32) -> Self {
        Self {
            next: AtomicU32::new(start),
        }
    }

    /// Takes the next counter value.
    pub fn advance(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The value the next draw will return.
    pub fn peek(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Owned dispatch context.
pub struct Dispatcher {
    device: Arc<dyn ComputeDevice>,
    registry: KernelRegistry,
    counter: RandomCounter,
    config: DispatchConfig,
    policy: LinearPolicy,
}

impl Dispatcher {
    /// Context with the default configuration and a counter starting at 0.
    pub fn new(device: Arc<dyn ComputeDevice>) -> Self {
        let config = DispatchConfig::default();
        Self {
            device,
            registry: KernelRegistry::new(),
            counter: RandomCounter::default(),
            policy: LinearPolicy::new(config.local_size),
            config,
        }
    }

    /// Context with a validated configuration.
    pub fn with_config(device: Arc<dyn ComputeDevice>, config: DispatchConfig) -> Result<Self> {
        let config = config.checked()?;
        let mut ctx = Self::new(device);
        ctx.policy = LinearPolicy::new(config.local_size);
        ctx.config = config;
        Ok(ctx)
    }

    /// Replaces the random counter with one starting at `start`.
    pub fn with_counter_start(mut self, start: u32) -> Self {
        self.counter = RandomCounter::starting_at(start);
        self
    }

    pub fn device(&self) -> &dyn ComputeDevice {
        self.device.as_ref()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }

    pub fn counter(&self) -> &RandomCounter {
        &self.counter
    }

    /// Resolves `op` at the precision of `T`.
    pub fn kernel<T: Dtype>(&self, op: &str) -> Result<KernelHandle> {
        self.resolve(op, T::PRECISION)
    }

    /// Resolves `op` at an explicit precision.
    pub fn resolve(&self, op: &str, precision: Precision) -> Result<KernelHandle> {
        self.registry.resolve(self.device.as_ref(), op, precision)
    }

    /// Starts binding arguments of `kernel`, taking its launch lock.
    pub fn bind<'a>(&'a self, kernel: &'a KernelHandle) -> ArgBinder<'a> {
        ArgBinder::new(self, kernel)
    }

    /// Default one-dimensional work size for `extent` items.
    pub fn linear(&self, extent: usize) -> WorkSize {
        self.policy.size(extent)
    }

    /// Launches `kernel` again with whatever arguments are bound.
    ///
    /// Must not be called while a binder for the same kernel is alive on
    /// this thread; use [`BoundKernel::enqueue`](crate::binder::BoundKernel::enqueue) after binding.
    pub fn enqueue(&self, kernel: &KernelHandle, work: &WorkSize) -> Result<()> {
        let _serial = kernel.serialize();
        self.launch(kernel, work)
    }

    /// Enqueues with the launch lock already held by the caller.
    pub(crate) fn launch(&self, kernel: &KernelHandle, work: &WorkSize) -> Result<()> {
        log::trace!(
            "enqueue {} global={:?} local={:?}",
            kernel.name(),
            work.global(),
            work.local()
        );
        let code = self.device.enqueue(kernel, work);
        if code.is_success() {
            return Ok(());
        }
        log::error!("enqueue of {} failed: {code}", kernel.name());
        Err(DispatchError::EnqueueFailed {
            kernel: kernel.name().to_owned(),
            code,
        })
    }

    /// Blocking map-read of the element at `index`.
    pub fn read_scalar<T: Dtype>(&self, buffer: &DeviceBuffer, index: usize) -> Result<T> {
        let mut value = T::zero();
        let offset = index * core::mem::size_of::<T>();
        let code = self.device.read_buffer(
            buffer,
            offset,
            bytemuck::bytes_of_mut(&mut value),
        );
        if !code.is_success() {
            log::error!("map of buffer {} failed: {code}", buffer.id());
            return Err(DispatchError::TransferFailed {
                stage: "map buffer",
                code,
            });
        }
        Ok(value)
    }
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("device", &self.device.name())
            .field("kernels", &self.registry.len())
            .field("counter", &self.counter.peek())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_wraps_and_advances() {
        let counter = RandomCounter::starting_at(u32::MAX);
        assert_eq!(counter.advance(), u32::MAX);
        assert_eq!(counter.advance(), 0);
        assert_eq!(counter.peek(), 1);
    }
}
