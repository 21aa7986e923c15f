//! Dropout with an integer keep mask, usually produced by
//! [`bernoulli`](crate::ops::random::bernoulli).

use crate::context::Dispatcher;
use crate::device::DeviceBuffer;
use crate::error::Result;
use crate::precision::Dtype;

/// `top = bottom * mask * scale`.
pub fn dropout_forward<T: Dtype>(
    ctx: &Dispatcher,
    count: usize,
    bottom: &DeviceBuffer,
    mask: &DeviceBuffer,
    scale: T,
    top: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("DropoutForward")?;
    ctx.bind(&kernel)
        .size(count)
        .buffer(bottom)
        .buffer(mask)
        .real(scale)
        .buffer(top)
        .finish()?
        .enqueue(&ctx.linear(count))
}

/// `bottom_diff = top_diff * scale * (mask > threshold)`.
///
/// `threshold` is single precision for both element types.
pub fn dropout_backward<T: Dtype>(
    ctx: &Dispatcher,
    count: usize,
    top_diff: &DeviceBuffer,
    mask: &DeviceBuffer,
    threshold: f32,
    scale: T,
    bottom_diff: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("DropoutBackward")?;
    ctx.bind(&kernel)
        .size(count)
        .buffer(top_diff)
        .buffer(mask)
        .single(threshold)
        .real(scale)
        .buffer(bottom_diff)
        .finish()?
        .enqueue(&ctx.linear(count))
}
