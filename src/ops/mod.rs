//! # Primitive Catalog
//!
//! One module per operation family. Every operation follows the same four
//! steps against a [`Dispatcher`](crate::context::Dispatcher):
//!
//! 1. resolve `<Op><suffix>` for the element type `T` through the registry,
//! 2. bind the arguments in the kernel's slot order,
//! 3. pick a work size (1-D linear policy unless stated otherwise),
//! 4. enqueue and return without waiting.
//!
//! Failures at any step come back as a [`DispatchError`](crate::error::DispatchError)
//! and are logged at `error` level with the kernel name and device code.
//! Nothing is retried.
//!
//! ## Submodules
//!
//! - [`elementwise`]: add, multiply, divide, scalar add, power, sign
//! - [`random`]: bernoulli mask generation
//! - [`transform`]: packed-convolution layout transforms and [`transform::PackingPlan`]
//! - [`softmax`]: channel reductions, softmax loss and the legacy row-wise helpers
//! - [`pooling`]: max, average and stochastic pooling, forward and backward
//! - [`lrn`]: local response normalization
//! - [`activation`]: ReLU and PReLU
//! - [`dropout`]: dropout forward and backward
//! - [`conv`]: direct convolution on the tiled 3-D launch
//!
//! ## Example
//!
//! ```rust
//! use layer_kernels::context::Dispatcher;
//! use layer_kernels::device::{download, upload};
//! use layer_kernels::host::HostDevice;
//! use layer_kernels::ops::activation::relu_forward;
//! use std::sync::Arc;
//!
//! let ctx = Dispatcher::new(Arc::new(HostDevice::new()));
//! let x = upload(ctx.device(), &[-2.0f32, 0.0, 3.0]).unwrap();
//! let y = upload(ctx.device(), &[0.0f32; 3]).unwrap();
//! relu_forward::<f32>(&ctx, 3, &x, &y, 0.5).unwrap();
//! assert_eq!(download::<f32>(ctx.device(), &y).unwrap(), [-1.0, 0.0, 3.0]);
//! ```
//!
//! ## Legacy helpers
//!
//! A few older layers resolve their kernel once and keep the handle. The
//! helpers serving them take a [`KernelHandle`](crate::device::KernelHandle)
//! instead of resolving by name; they are marked as such in their module.

pub mod activation;
pub mod conv;
pub mod dropout;
pub mod elementwise;
pub mod lrn;
pub mod pooling;
pub mod random;
pub mod softmax;
pub mod transform;
