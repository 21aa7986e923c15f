//! Kernel registry: `(operation, precision)` to a cached kernel handle.

use crate::device::{ComputeDevice, KernelHandle};
use crate::error::{DispatchError, Result};
use crate::precision::Precision;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Composes `<op><suffix>`.
pub fn kernel_name(op: &str, precision: Precision) -> String {
    let suffix = precision.suffix();
    let mut name = String::with_capacity(op.len() + suffix.len());
    name.push_str(op);
    name.push_str(suffix);
    name
}

/// Process-lifetime cache of loaded kernels. Grows only; nothing is evicted.
#[derive(Debug, Default)]
pub struct KernelRegistry {
    cache: Mutex<HashMap<String, KernelHandle>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a kernel, loading it on first use.
    ///
    /// The cache lock is held across the load so concurrent first lookups
    /// compile the kernel once.
    pub fn resolve(
        &self,
        device: &dyn ComputeDevice,
        op: &str,
        precision: Precision,
    ) -> Result<KernelHandle> {
        let name = kernel_name(op, precision);
        let mut cache = self.cache.lock();
        if let Some(handle) = cache.get(&name) {
            return Ok(handle.clone());
        }

        let handle = device.load_kernel(&name).map_err(|code| {
            log::error!("kernel {name} unavailable on {}: {code}", device.name());
            DispatchError::KernelNotFound {
                name: name.clone(),
                code,
            }
        })?;
        log::debug!("loaded kernel {name} on {}", device.name());
        cache.insert(name, handle.clone());
        Ok(handle)
    }

    /// Number of cached kernels.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    /// Whether a full kernel name is already cached.
    pub fn contains(&self, name: &str) -> bool {
        self.cache.lock().contains_key(name)
    }
}
