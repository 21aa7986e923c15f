//! Cross-channel local response normalization.
//!
//! The forward pass is two launches: [`lrn_fill_scale`] computes
//! `scale = k + alpha / size * sum(x^2)` over a window of `size` channels,
//! then [`lrn_compute_output`] applies `top = bottom * scale^-beta`. The
//! window walk runs one work-item per `(n, h, w)` column.

#![allow(clippy::too_many_arguments)]

use crate::context::Dispatcher;
use crate::device::DeviceBuffer;
use crate::error::Result;
use crate::precision::Dtype;

pub fn lrn_fill_scale<T: Dtype>(
    ctx: &Dispatcher,
    nthreads: usize,
    input: &DeviceBuffer,
    num: usize,
    channels: usize,
    height: usize,
    width: usize,
    size: usize,
    alpha_over_size: T,
    k: T,
    scale: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("LRNFillScale")?;
    ctx.bind(&kernel)
        .size(nthreads)
        .buffer(input)
        .size(num)
        .size(channels)
        .size(height)
        .size(width)
        .size(size)
        .real(alpha_over_size)
        .real(k)
        .buffer(scale)
        .finish()?
        .enqueue(&ctx.linear(nthreads))
}

pub fn lrn_compute_output<T: Dtype>(
    ctx: &Dispatcher,
    nthreads: usize,
    input: &DeviceBuffer,
    scale: &DeviceBuffer,
    negative_beta: T,
    output: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("LRNComputeOutput")?;
    ctx.bind(&kernel)
        .size(nthreads)
        .buffer(input)
        .buffer(scale)
        .real(negative_beta)
        .buffer(output)
        .finish()?
        .enqueue(&ctx.linear(nthreads))
}

/// Gradient of the normalization, with
/// `cache_ratio = 2 * alpha * beta / size`.
pub fn lrn_compute_diff<T: Dtype>(
    ctx: &Dispatcher,
    nthreads: usize,
    bottom_data: &DeviceBuffer,
    top_data: &DeviceBuffer,
    scale: &DeviceBuffer,
    top_diff: &DeviceBuffer,
    num: usize,
    channels: usize,
    height: usize,
    width: usize,
    size: usize,
    negative_beta: T,
    cache_ratio: T,
    bottom_diff: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("LRNComputeDiff")?;
    ctx.bind(&kernel)
        .size(nthreads)
        .buffer(bottom_data)
        .buffer(top_data)
        .buffer(scale)
        .buffer(top_diff)
        .size(num)
        .size(channels)
        .size(height)
        .size(width)
        .size(size)
        .real(negative_beta)
        .real(cache_ratio)
        .buffer(bottom_diff)
        .finish()?
        .enqueue(&ctx.linear(nthreads))
}
