//! layer_kernels: host-side dispatch of neural-network layer kernels.
//!
//! Every layer computation (pooling, softmax and its loss, LRN, ReLU/PReLU,
//! dropout, Bernoulli masks, elementwise math, im2col-style packing, direct
//! convolution) runs as a named kernel on a compute device. This crate is
//! the layer between the layer code and that device: it composes kernel
//! names from an operation and a precision, caches compiled kernels, binds
//! arguments in the exact order each kernel expects, sizes the launch and
//! enqueues it.
//!
//! # Modules
//!
//! - [`precision`]: precision tags and the [`Dtype`](precision::Dtype) trait.
//! - [`device`]: the [`ComputeDevice`](device::ComputeDevice) boundary.
//! - [`registry`]: name composition and the thread-safe kernel cache.
//! - [`binder`]: ordered argument binding with aggregated failures.
//! - [`work`]: linear work sizes and the convolution tiling tables.
//! - [`config`]: dispatch tunables, validated.
//! - [`context`]: the [`Dispatcher`] tying the above together.
//! - [`ops`]: the kernel catalog, one function per kernel.
//! - [`host`]: the reference device running every kernel with `rayon`.
//! - [`backend`]: choosing and opening a device.
//! - `wgpu`: a GPU device for a subset of kernels, behind the `wgpu` feature.
//!
//! # Example
//!
//! ```rust
//! use layer_kernels::device::{download, upload};
//! use layer_kernels::{ops, Dispatcher, HostDevice};
//! use std::sync::Arc;
//!
//! let ctx = Dispatcher::new(Arc::new(HostDevice::new()));
//! let a = upload(ctx.device(), &[1.0f32, 2.0, 3.0]).unwrap();
//! let b = upload(ctx.device(), &[10.0f32, 20.0, 30.0]).unwrap();
//! let y = upload(ctx.device(), &[0.0f32; 3]).unwrap();
//! ops::elementwise::add::<f32>(&ctx, 3, &a, &b, &y).unwrap();
//! assert_eq!(download::<f32>(ctx.device(), &y).unwrap(), vec![11.0, 22.0, 33.0]);
//! ```

pub mod approx;
pub mod backend;
pub mod binder;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod host;
pub mod ops;
pub mod precision;
pub mod registry;
pub mod work;

#[cfg(feature = "wgpu")]
pub mod wgpu;

pub use context::Dispatcher;
pub use error::{DispatchError, Result};
pub use host::HostDevice;
pub use precision::{Dtype, Precision};
