//! Softmax building blocks and the softmax loss.
//!
//! Tensors are `[num][channels][spatial_dim]`. The channel reductions run one
//! work-item per `(n, s)` position; the broadcasts one per element. Labels
//! are stored as floating-point class indices.

#![allow(clippy::too_many_arguments)]

use crate::context::Dispatcher;
use crate::device::{DeviceBuffer, KernelHandle};
use crate::error::Result;
use crate::precision::Dtype;
use crate::work::WorkSize;

fn reduce<T: Dtype>(
    ctx: &Dispatcher,
    op: &str,
    num: usize,
    channels: usize,
    spatial_dim: usize,
    data: &DeviceBuffer,
    out: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>(op)?;
    ctx.bind(&kernel)
        .size(num)
        .size(channels)
        .size(spatial_dim)
        .buffer(data)
        .buffer(out)
        .finish()?
        .enqueue(&ctx.linear(num * spatial_dim))
}

fn broadcast<T: Dtype>(
    ctx: &Dispatcher,
    op: &str,
    count: usize,
    num: usize,
    channels: usize,
    spatial_dim: usize,
    per_position: &DeviceBuffer,
    data: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>(op)?;
    ctx.bind(&kernel)
        .size(count)
        .size(num)
        .size(channels)
        .size(spatial_dim)
        .buffer(per_position)
        .buffer(data)
        .finish()?
        .enqueue(&ctx.linear(count))
}

/// Maximum over channels at every position.
pub fn channel_max<T: Dtype>(
    ctx: &Dispatcher,
    num: usize,
    channels: usize,
    spatial_dim: usize,
    data: &DeviceBuffer,
    out: &DeviceBuffer,
) -> Result<()> {
    reduce::<T>(ctx, "kernel_channel_max", num, channels, spatial_dim, data, out)
}

/// `data -= channel_max`, broadcast over channels.
pub fn channel_subtract<T: Dtype>(
    ctx: &Dispatcher,
    count: usize,
    num: usize,
    channels: usize,
    spatial_dim: usize,
    channel_max: &DeviceBuffer,
    data: &DeviceBuffer,
) -> Result<()> {
    broadcast::<T>(
        ctx,
        "kernel_channel_subtract",
        count,
        num,
        channels,
        spatial_dim,
        channel_max,
        data,
    )
}

pub fn exp<T: Dtype>(ctx: &Dispatcher, count: usize, data: &DeviceBuffer, out: &DeviceBuffer) -> Result<()> {
    let kernel = ctx.kernel::<T>("kernel_exp")?;
    ctx.bind(&kernel).size(count).buffer(data).buffer(out).finish()?
        .enqueue(&ctx.linear(count))
}

/// Sum over channels at every position.
pub fn channel_sum<T: Dtype>(
    ctx: &Dispatcher,
    num: usize,
    channels: usize,
    spatial_dim: usize,
    data: &DeviceBuffer,
    channel_sum: &DeviceBuffer,
) -> Result<()> {
    reduce::<T>(ctx, "kernel_channel_sum", num, channels, spatial_dim, data, channel_sum)
}

/// `data /= channel_sum`, broadcast over channels.
pub fn channel_div<T: Dtype>(
    ctx: &Dispatcher,
    count: usize,
    num: usize,
    channels: usize,
    spatial_dim: usize,
    channel_sum: &DeviceBuffer,
    data: &DeviceBuffer,
) -> Result<()> {
    broadcast::<T>(
        ctx,
        "kernel_channel_div",
        count,
        num,
        channels,
        spatial_dim,
        channel_sum,
        data,
    )
}

/// Dot product of two tensors over channels at every position.
pub fn channel_dot<T: Dtype>(
    ctx: &Dispatcher,
    num: usize,
    channels: usize,
    spatial_dim: usize,
    data_1: &DeviceBuffer,
    data_2: &DeviceBuffer,
    channel_dot: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("kernel_channel_dot")?;
    ctx.bind(&kernel)
        .size(num)
        .size(channels)
        .size(spatial_dim)
        .buffer(data_1)
        .buffer(data_2)
        .buffer(channel_dot)
        .finish()?
        .enqueue(&ctx.linear(num * spatial_dim))
}

fn loss_launch<T: Dtype>(
    ctx: &Dispatcher,
    op: &str,
    nthreads: usize,
    first: &DeviceBuffer,
    label: &DeviceBuffer,
    written: &DeviceBuffer,
    num: usize,
    dim: usize,
    spatial_dim: usize,
    has_ignore_label: bool,
    ignore_label: i32,
    counts: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>(op)?;
    ctx.bind(&kernel)
        .size(nthreads)
        .buffer(first)
        .buffer(label)
        .buffer(written)
        .size(num)
        .size(dim)
        .size(spatial_dim)
        .flag(has_ignore_label)
        .int(ignore_label)
        .buffer(counts)
        .finish()?
        .enqueue(&ctx.linear(nthreads))
}

/// Per-position negative log-likelihood `-ln(max(prob[label], FLT_MIN))`.
///
/// With `has_ignore_label` set, positions whose label equals `ignore_label`
/// get a loss and a count of 0; the others a count of 1.
pub fn softmax_loss_forward<T: Dtype>(
    ctx: &Dispatcher,
    nthreads: usize,
    prob: &DeviceBuffer,
    label: &DeviceBuffer,
    loss: &DeviceBuffer,
    num: usize,
    dim: usize,
    spatial_dim: usize,
    has_ignore_label: bool,
    ignore_label: i32,
    counts: &DeviceBuffer,
) -> Result<()> {
    loss_launch::<T>(
        ctx,
        "SoftmaxLossForwardGPU",
        nthreads,
        prob,
        label,
        loss,
        num,
        dim,
        spatial_dim,
        has_ignore_label,
        ignore_label,
        counts,
    )
}

/// Subtracts 1 at the labelled class of `bottom_diff`, which must already
/// hold the probabilities. Ignored positions are zeroed across classes.
pub fn softmax_loss_backward<T: Dtype>(
    ctx: &Dispatcher,
    nthreads: usize,
    top: &DeviceBuffer,
    label: &DeviceBuffer,
    bottom_diff: &DeviceBuffer,
    num: usize,
    dim: usize,
    spatial_dim: usize,
    has_ignore_label: bool,
    ignore_label: i32,
    counts: &DeviceBuffer,
) -> Result<()> {
    loss_launch::<T>(
        ctx,
        "SoftmaxLossBackwardGPU",
        nthreads,
        top,
        label,
        bottom_diff,
        num,
        dim,
        spatial_dim,
        has_ignore_label,
        ignore_label,
        counts,
    )
}

// Pre-resolved helpers of the row-wise softmax layer. The caller owns the
// kernel handle; the data is `[num][dim]`.

/// Row maxima. Legacy: takes a resolved `get_max` kernel.
pub fn get_max(
    ctx: &Dispatcher,
    kernel: &KernelHandle,
    num: usize,
    dim: usize,
    bottom: &DeviceBuffer,
    scale: &DeviceBuffer,
) -> Result<()> {
    ctx.bind(kernel).size(num).size(dim).buffer(bottom).buffer(scale).finish()?
        .enqueue(&ctx.linear(num))
}

/// Elementwise exponential over `num` elements. Legacy: takes `exp`.
pub fn exp_rows(
    ctx: &Dispatcher,
    kernel: &KernelHandle,
    num: usize,
    data: &DeviceBuffer,
    out: &DeviceBuffer,
) -> Result<()> {
    ctx.bind(kernel).size(num).buffer(data).buffer(out).finish()?
        .enqueue(&ctx.linear(num))
}

/// Divides each row by its scale. Legacy: takes `softmax_div`.
pub fn softmax_div(
    ctx: &Dispatcher,
    kernel: &KernelHandle,
    num: usize,
    dim: usize,
    scale: &DeviceBuffer,
    data: &DeviceBuffer,
) -> Result<()> {
    ctx.bind(kernel).size(num).size(dim).buffer(scale).buffer(data).finish()?
        .enqueue(&ctx.linear(num * dim))
}

/// Work-group size of the single-group loss reduction.
pub const LOSS_GROUP: usize = 256;

/// Mean negative log-likelihood of `label` under `prob`, reduced on the
/// device by one work-group into `loss[0]` and read back.
///
/// This is the one blocking call of the catalog. Legacy: takes `softmax`.
pub fn softmax_loss<T: Dtype>(
    ctx: &Dispatcher,
    kernel: &KernelHandle,
    num: usize,
    dim: usize,
    prob: &DeviceBuffer,
    label: &DeviceBuffer,
    loss: &DeviceBuffer,
) -> Result<T> {
    ctx.bind(kernel)
        .buffer(prob)
        .buffer(loss)
        .buffer(label)
        .size(num)
        .size(dim)
        .scratch(LOSS_GROUP * core::mem::size_of::<T>())
        .finish()?
        .enqueue(&WorkSize::linear(LOSS_GROUP, LOSS_GROUP))?;
    ctx.read_scalar(loss, 0)
}

/// `data *= alpha`. Legacy: takes `scal`.
pub fn scal<T: Dtype>(
    ctx: &Dispatcher,
    kernel: &KernelHandle,
    num: usize,
    alpha: T,
    data: &DeviceBuffer,
) -> Result<()> {
    ctx.bind(kernel).size(num).real(alpha).buffer(data).finish()?
        .enqueue(&ctx.linear(num))
}

/// Subtracts 1 at each row's label. Legacy: takes `diff`.
pub fn diff(
    ctx: &Dispatcher,
    kernel: &KernelHandle,
    num: usize,
    dim: usize,
    data: &DeviceBuffer,
    label: &DeviceBuffer,
) -> Result<()> {
    ctx.bind(kernel).size(num).size(dim).buffer(data).buffer(label).finish()?
        .enqueue(&ctx.linear(num))
}
