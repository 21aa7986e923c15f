//! Elementwise arithmetic over `n` contiguous elements.
//!
//! Output buffers may alias inputs.

use crate::context::Dispatcher;
use crate::device::DeviceBuffer;
use crate::error::Result;
use crate::precision::Dtype;

fn binary<T: Dtype>(
    ctx: &Dispatcher,
    op: &str,
    n: usize,
    a: &DeviceBuffer,
    b: &DeviceBuffer,
    y: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>(op)?;
    ctx.bind(&kernel).size(n).buffer(a).buffer(b).buffer(y).finish()?
        .enqueue(&ctx.linear(n))
}

/// `y = a + b`.
pub fn add<T: Dtype>(
    ctx: &Dispatcher,
    n: usize,
    a: &DeviceBuffer,
    b: &DeviceBuffer,
    y: &DeviceBuffer,
) -> Result<()> {
    binary::<T>(ctx, "add", n, a, b, y)
}

/// `y = a * b`.
pub fn mul<T: Dtype>(
    ctx: &Dispatcher,
    n: usize,
    a: &DeviceBuffer,
    b: &DeviceBuffer,
    y: &DeviceBuffer,
) -> Result<()> {
    binary::<T>(ctx, "element_mul", n, a, b, y)
}

/// `y = a / b`.
pub fn div<T: Dtype>(
    ctx: &Dispatcher,
    n: usize,
    a: &DeviceBuffer,
    b: &DeviceBuffer,
    y: &DeviceBuffer,
) -> Result<()> {
    binary::<T>(ctx, "div", n, a, b, y)
}

/// `y += alpha`, in place.
pub fn add_scalar<T: Dtype>(ctx: &Dispatcher, n: usize, alpha: T, y: &DeviceBuffer) -> Result<()> {
    let kernel = ctx.kernel::<T>("add_scalar")?;
    ctx.bind(&kernel).size(n).real(alpha).buffer(y).finish()?
        .enqueue(&ctx.linear(n))
}

/// `y = a ^ alpha`.
pub fn powx<T: Dtype>(
    ctx: &Dispatcher,
    n: usize,
    a: &DeviceBuffer,
    alpha: T,
    y: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("powx")?;
    ctx.bind(&kernel).size(n).buffer(a).real(alpha).buffer(y).finish()?
        .enqueue(&ctx.linear(n))
}

/// `y = sign(x)` with `sign(0) = 0`.
pub fn sign<T: Dtype>(ctx: &Dispatcher, n: usize, x: &DeviceBuffer, y: &DeviceBuffer) -> Result<()> {
    let kernel = ctx.kernel::<T>("sign")?;
    ctx.bind(&kernel).size(n).buffer(x).buffer(y).finish()?
        .enqueue(&ctx.linear(n))
}
