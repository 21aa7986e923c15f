//! Backend selection.
//!
//! A backend names a kind of [`ComputeDevice`] and knows how to open one.
//!
//! # Supported Backends
//!
//! - `Host`: every kernel on the host with `rayon` (default, always available).
//! - `Wgpu`: WGSL compute shaders through `wgpu`, behind the `wgpu` feature.
//!   It ships the single-precision elementwise, activation and dropout
//!   kernels only; every other lookup fails with `KernelNotFound`.
//!
//! The choice can come from `LAYER_KERNELS_BACKEND` (`host` or `wgpu`).
//!
//! # Example
//!
//! ```
//! use layer_kernels::backend::Backend;
//! use layer_kernels::context::Dispatcher;
//!
//! let device = Backend::Host.open().unwrap();
//! let ctx = Dispatcher::new(device);
//! assert_eq!(ctx.device().name(), "host");
//! ```

use crate::device::ComputeDevice;
use crate::error::{DispatchError, Result};
use crate::host::HostDevice;
use core::convert::TryFrom;
use core::fmt;
use core::str::FromStr;
use std::sync::Arc;

/// Environment variable read by [`Backend::from_env`].
pub const BACKEND_ENV: &str = "LAYER_KERNELS_BACKEND";

/// Enumeration of supported compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Backend {
    /// In-process reference device (default).
    #[default]
    Host = 0,
    /// GPU device using `wgpu`.
    Wgpu,
}

impl TryFrom<u8> for Backend {
    type Error = DispatchError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Host),
            1 => Ok(Self::Wgpu),
            _ => Err(DispatchError::InvalidConfig(format!("backend id {value}"))),
        }
    }
}

impl FromStr for Backend {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" | "cpu" => Ok(Self::Host),
            "wgpu" | "gpu" => Ok(Self::Wgpu),
            other => Err(DispatchError::InvalidConfig(format!(
                "{BACKEND_ENV}: unknown backend `{other}`"
            ))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Host => "host",
            Self::Wgpu => "wgpu",
        })
    }
}

impl Backend {
    /// Reads [`BACKEND_ENV`], defaulting to [`Backend::Host`] when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(BACKEND_ENV) {
            Ok(value) => value.parse(),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Whether this build can open the backend at all.
    pub const fn is_compiled(self) -> bool {
        match self {
            Self::Host => true,
            Self::Wgpu => cfg!(feature = "wgpu"),
        }
    }

    /// Opens a device of this kind.
    pub fn open(self) -> Result<Arc<dyn ComputeDevice>> {
        let device: Arc<dyn ComputeDevice> = match self {
            Self::Host => Arc::new(HostDevice::new()),
            #[cfg(feature = "wgpu")]
            Self::Wgpu => Arc::new(crate::wgpu::WgpuDevice::new()?),
            #[cfg(not(feature = "wgpu"))]
            Self::Wgpu => {
                let err = DispatchError::DeviceUnavailable(
                    "wgpu backend not compiled in; enable the `wgpu` feature".into(),
                );
                log::error!("{err}");
                return Err(err);
            }
        };
        log::debug!("opened {self} device `{}`", device.name());
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_ids_round_trip() {
        assert_eq!("HOST".parse::<Backend>().unwrap(), Backend::Host);
        assert_eq!(" wgpu ".parse::<Backend>().unwrap(), Backend::Wgpu);
        assert!("cuda".parse::<Backend>().is_err());
        assert_eq!(Backend::try_from(1).unwrap(), Backend::Wgpu);
        assert!(Backend::try_from(7).is_err());
    }

    #[test]
    fn host_always_opens() {
        assert!(Backend::Host.is_compiled());
        assert_eq!(Backend::Host.open().unwrap().name(), "host");
    }

    #[cfg(not(feature = "wgpu"))]
    #[test]
    fn wgpu_without_feature_is_unavailable() {
        assert!(matches!(
            Backend::Wgpu.open(),
            Err(DispatchError::DeviceUnavailable(_))
        ));
    }
}
