//! Leaky ReLU and PReLU.
//!
//! An input of exactly zero is treated as non-positive: forward maps it to
//! `0 * slope = 0` and backward passes `slope * top_diff`.
//!
//! PReLU slopes are indexed by channel `(i / dim) % channels / div_factor`;
//! `div_factor = channels` shares a single slope across all channels.

#![allow(clippy::too_many_arguments)]

use crate::context::Dispatcher;
use crate::device::DeviceBuffer;
use crate::error::Result;
use crate::precision::Dtype;

pub fn relu_forward<T: Dtype>(
    ctx: &Dispatcher,
    count: usize,
    bottom: &DeviceBuffer,
    top: &DeviceBuffer,
    negative_slope: T,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("ReLUForward")?;
    ctx.bind(&kernel)
        .size(count)
        .buffer(bottom)
        .buffer(top)
        .real(negative_slope)
        .finish()?
        .enqueue(&ctx.linear(count))
}

pub fn relu_backward<T: Dtype>(
    ctx: &Dispatcher,
    count: usize,
    top_diff: &DeviceBuffer,
    bottom_data: &DeviceBuffer,
    bottom_diff: &DeviceBuffer,
    negative_slope: T,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("ReLUBackward")?;
    ctx.bind(&kernel)
        .size(count)
        .buffer(top_diff)
        .buffer(bottom_data)
        .buffer(bottom_diff)
        .real(negative_slope)
        .finish()?
        .enqueue(&ctx.linear(count))
}

pub fn prelu_forward<T: Dtype>(
    ctx: &Dispatcher,
    count: usize,
    channels: usize,
    dim: usize,
    bottom: &DeviceBuffer,
    top: &DeviceBuffer,
    slope: &DeviceBuffer,
    div_factor: usize,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("PReLUForward")?;
    ctx.bind(&kernel)
        .size(count)
        .size(channels)
        .size(dim)
        .buffer(bottom)
        .buffer(top)
        .buffer(slope)
        .size(div_factor)
        .finish()?
        .enqueue(&ctx.linear(count))
}

pub fn prelu_backward<T: Dtype>(
    ctx: &Dispatcher,
    count: usize,
    channels: usize,
    dim: usize,
    top_diff: &DeviceBuffer,
    bottom_data: &DeviceBuffer,
    bottom_diff: &DeviceBuffer,
    slope: &DeviceBuffer,
    div_factor: usize,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("PReLUBackward")?;
    ctx.bind(&kernel)
        .size(count)
        .size(channels)
        .size(dim)
        .buffer(top_diff)
        .buffer(bottom_data)
        .buffer(bottom_diff)
        .buffer(slope)
        .size(div_factor)
        .finish()?
        .enqueue(&ctx.linear(count))
}

/// Per-element slope gradient, `top_diff * bottom_data` where the input is
/// non-positive and 0 elsewhere. Reducing it per channel is the caller's job.
pub fn prelu_param_backward<T: Dtype>(
    ctx: &Dispatcher,
    count: usize,
    top_diff: &DeviceBuffer,
    bottom_data: &DeviceBuffer,
    bottom_diff: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("PReLUParamBackward")?;
    ctx.bind(&kernel)
        .size(count)
        .buffer(top_diff)
        .buffer(bottom_data)
        .buffer(bottom_diff)
        .finish()?
        .enqueue(&ctx.linear(count))
}
