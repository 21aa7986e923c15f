//! Max, average and stochastic pooling.
//!
//! Forward launches run one work-item per pooled element (`count`), backward
//! launches one per bottom element (`nthreads`). Geometry is bound in the
//! kernels' fixed order `num, channels, height, width, pooled_h, pooled_w,
//! kernel_h, kernel_w, stride_h, stride_w[, pad_h, pad_w]`.
//!
//! Max pooling records the winning position either in an integer `mask` or
//! in a float `top_mask`; exactly one of the two must be non-null.

use crate::context::Dispatcher;
use crate::device::{DeviceBuffer, KernelHandle};
use crate::error::{DispatchError, Result};
use crate::precision::Dtype;

/// Pooled extent along one axis.
///
/// `pooled = ceil((extent + 2 * pad - kernel) / stride) + 1`, dropping the
/// last window when padding would make it start past the input.
pub fn pooled_extent(extent: usize, kernel: usize, stride: usize, pad: usize) -> Result<usize> {
    if stride == 0 || kernel == 0 || extent + 2 * pad < kernel {
        return Err(DispatchError::precondition(
            "pooling",
            format!("kernel {kernel} stride {stride} pad {pad} over extent {extent}"),
        ));
    }
    let mut pooled = (extent + 2 * pad - kernel).div_ceil(stride) + 1;
    if pad > 0 && (pooled - 1) * stride >= extent + pad {
        pooled -= 1;
    }
    Ok(pooled)
}

fn exactly_one_mask(op: &'static str, mask: Option<&DeviceBuffer>, top_mask: Option<&DeviceBuffer>) -> Result<()> {
    if mask.is_some() == top_mask.is_some() {
        let err = DispatchError::precondition(op, "exactly one of mask and top_mask must be given");
        log::error!("{err}");
        return Err(err);
    }
    Ok(())
}

/// Max over each window, recording the in-plane offset of the winner.
#[allow(clippy::too_many_arguments)]
pub fn max_pool_forward<T: Dtype>(
    ctx: &Dispatcher,
    count: usize,
    bottom: &DeviceBuffer,
    num: usize,
    channels: usize,
    height: usize,
    width: usize,
    pooled_h: usize,
    pooled_w: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
    pad_h: usize,
    pad_w: usize,
    top: &DeviceBuffer,
    mask: Option<&DeviceBuffer>,
    top_mask: Option<&DeviceBuffer>,
) -> Result<()> {
    exactly_one_mask("max pool forward", mask, top_mask)?;
    let kernel = ctx.kernel::<T>("MaxPoolForward")?;
    ctx.bind(&kernel)
        .size(count)
        .buffer(bottom)
        .sizes(&[num, channels, height, width, pooled_h, pooled_w])
        .sizes(&[kernel_h, kernel_w, stride_h, stride_w, pad_h, pad_w])
        .buffer(top)
        .optional(mask)
        .optional(top_mask)
        .finish()?
        .enqueue(&ctx.linear(count))
}

/// Window mean. The divisor is `kernel_h * kernel_w` whether or not the
/// window reaches into the padding.
#[allow(clippy::too_many_arguments)]
pub fn ave_pool_forward<T: Dtype>(
    ctx: &Dispatcher,
    count: usize,
    bottom: &DeviceBuffer,
    num: usize,
    channels: usize,
    height: usize,
    width: usize,
    pooled_h: usize,
    pooled_w: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
    pad_h: usize,
    pad_w: usize,
    top: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("AvePoolForward")?;
    ctx.bind(&kernel)
        .size(count)
        .buffer(bottom)
        .sizes(&[num, channels, height, width, pooled_h, pooled_w])
        .sizes(&[kernel_h, kernel_w, stride_h, stride_w, pad_h, pad_w])
        .buffer(top)
        .finish()?
        .enqueue(&ctx.linear(count))
}

/// Samples one cell per window with probability proportional to its value.
///
/// `rand_idx` holds one uniform `[0, 1)` draw per pooled element on entry and
/// the absolute bottom index of the chosen cell on return.
#[allow(clippy::too_many_arguments)]
pub fn sto_pool_forward_train<T: Dtype>(
    ctx: &Dispatcher,
    count: usize,
    bottom: &DeviceBuffer,
    num: usize,
    channels: usize,
    height: usize,
    width: usize,
    pooled_h: usize,
    pooled_w: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
    rand_idx: &DeviceBuffer,
    top: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("StoPoolForwardTrain")?;
    ctx.bind(&kernel)
        .size(count)
        .buffer(bottom)
        .sizes(&[num, channels, height, width, pooled_h, pooled_w])
        .sizes(&[kernel_h, kernel_w, stride_h, stride_w])
        .buffer(rand_idx)
        .buffer(top)
        .finish()?
        .enqueue(&ctx.linear(count))
}

/// Value-weighted window mean `sum(x^2) / sum(x)`.
#[allow(clippy::too_many_arguments)]
pub fn sto_pool_forward_test<T: Dtype>(
    ctx: &Dispatcher,
    count: usize,
    bottom: &DeviceBuffer,
    num: usize,
    channels: usize,
    height: usize,
    width: usize,
    pooled_h: usize,
    pooled_w: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
    top: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("StoPoolForwardTest")?;
    ctx.bind(&kernel)
        .size(count)
        .buffer(bottom)
        .sizes(&[num, channels, height, width, pooled_h, pooled_w])
        .sizes(&[kernel_h, kernel_w, stride_h, stride_w])
        .buffer(top)
        .finish()?
        .enqueue(&ctx.linear(count))
}

#[allow(clippy::too_many_arguments)]
pub fn max_pool_backward<T: Dtype>(
    ctx: &Dispatcher,
    nthreads: usize,
    top_diff: &DeviceBuffer,
    mask: Option<&DeviceBuffer>,
    top_mask: Option<&DeviceBuffer>,
    num: usize,
    channels: usize,
    height: usize,
    width: usize,
    pooled_h: usize,
    pooled_w: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
    pad_h: usize,
    pad_w: usize,
    bottom_diff: &DeviceBuffer,
) -> Result<()> {
    exactly_one_mask("max pool backward", mask, top_mask)?;
    let kernel = ctx.kernel::<T>("MaxPoolBackward")?;
    ctx.bind(&kernel)
        .size(nthreads)
        .buffer(top_diff)
        .optional(mask)
        .optional(top_mask)
        .sizes(&[num, channels, height, width, pooled_h, pooled_w])
        .sizes(&[kernel_h, kernel_w, stride_h, stride_w, pad_h, pad_w])
        .buffer(bottom_diff)
        .finish()?
        .enqueue(&ctx.linear(nthreads))
}

#[allow(clippy::too_many_arguments)]
pub fn ave_pool_backward<T: Dtype>(
    ctx: &Dispatcher,
    nthreads: usize,
    top_diff: &DeviceBuffer,
    num: usize,
    channels: usize,
    height: usize,
    width: usize,
    pooled_h: usize,
    pooled_w: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
    pad_h: usize,
    pad_w: usize,
    bottom_diff: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("AvePoolBackward")?;
    ctx.bind(&kernel)
        .size(nthreads)
        .buffer(top_diff)
        .sizes(&[num, channels, height, width, pooled_h, pooled_w])
        .sizes(&[kernel_h, kernel_w, stride_h, stride_w, pad_h, pad_w])
        .buffer(bottom_diff)
        .finish()?
        .enqueue(&ctx.linear(nthreads))
}

/// Routes each pooled gradient to the bottom cell recorded in `rand_idx`.
#[allow(clippy::too_many_arguments)]
pub fn sto_pool_backward<T: Dtype>(
    ctx: &Dispatcher,
    nthreads: usize,
    rand_idx: &DeviceBuffer,
    top_diff: &DeviceBuffer,
    num: usize,
    channels: usize,
    height: usize,
    width: usize,
    pooled_h: usize,
    pooled_w: usize,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
    bottom_diff: &DeviceBuffer,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("StoPoolBackward")?;
    ctx.bind(&kernel)
        .size(nthreads)
        .buffer(rand_idx)
        .buffer(top_diff)
        .sizes(&[num, channels, height, width, pooled_h, pooled_w])
        .sizes(&[kernel_h, kernel_w, stride_h, stride_w])
        .buffer(bottom_diff)
        .finish()?
        .enqueue(&ctx.linear(nthreads))
}

/// Legacy: takes a resolved `max_pool_fp` kernel. No mask is recorded.
#[allow(clippy::too_many_arguments)]
pub fn max_pool_fp(
    ctx: &Dispatcher,
    kernel: &KernelHandle,
    count: usize,
    bottom: &DeviceBuffer,
    clnum: usize,
    channels: usize,
    height: usize,
    width: usize,
    pooled_h: usize,
    pooled_w: usize,
    kernel_size: usize,
    stride: usize,
    top: &DeviceBuffer,
) -> Result<()> {
    ctx.bind(kernel)
        .size(count)
        .buffer(bottom)
        .sizes(&[clnum, channels, height, width, pooled_h, pooled_w, kernel_size, stride])
        .buffer(top)
        .finish()?
        .enqueue(&ctx.linear(count))
}

/// Legacy: takes a resolved `ave_pool_fp` kernel.
#[allow(clippy::too_many_arguments)]
pub fn ave_pool_fp(
    ctx: &Dispatcher,
    kernel: &KernelHandle,
    count: usize,
    bottom: &DeviceBuffer,
    clnum: usize,
    channels: usize,
    height: usize,
    width: usize,
    pooled_h: usize,
    pooled_w: usize,
    kernel_size: usize,
    stride: usize,
    pad: usize,
    top: &DeviceBuffer,
) -> Result<()> {
    ctx.bind(kernel)
        .size(count)
        .buffer(bottom)
        .sizes(&[clnum, channels, height, width, pooled_h, pooled_w, kernel_size, stride, pad])
        .buffer(top)
        .finish()?
        .enqueue(&ctx.linear(count))
}

/// Legacy: takes a resolved `max_pool_bp` kernel. Without a mask the
/// gradient reaches every bottom cell equal to its window maximum.
#[allow(clippy::too_many_arguments)]
pub fn max_pool_bp(
    ctx: &Dispatcher,
    kernel: &KernelHandle,
    count: usize,
    bottom_data: &DeviceBuffer,
    top_data: &DeviceBuffer,
    top_diff: &DeviceBuffer,
    clnum: usize,
    channels: usize,
    height: usize,
    width: usize,
    pooled_h: usize,
    pooled_w: usize,
    kernel_size: usize,
    stride: usize,
    bottom_diff: &DeviceBuffer,
) -> Result<()> {
    ctx.bind(kernel)
        .size(count)
        .buffer(bottom_data)
        .buffer(top_data)
        .buffer(top_diff)
        .sizes(&[clnum, channels, height, width, pooled_h, pooled_w, kernel_size, stride])
        .buffer(bottom_diff)
        .finish()?
        .enqueue(&ctx.linear(count))
}

/// Legacy: takes a resolved `ave_pool_bp` kernel.
#[allow(clippy::too_many_arguments)]
pub fn ave_pool_bp(
    ctx: &Dispatcher,
    kernel: &KernelHandle,
    count: usize,
    top_diff: &DeviceBuffer,
    clnum: usize,
    channels: usize,
    height: usize,
    width: usize,
    pooled_h: usize,
    pooled_w: usize,
    kernel_size: usize,
    stride: usize,
    pad: usize,
    bottom_diff: &DeviceBuffer,
) -> Result<()> {
    ctx.bind(kernel)
        .size(count)
        .buffer(top_diff)
        .sizes(&[clnum, channels, height, width, pooled_h, pooled_w, kernel_size, stride, pad])
        .buffer(bottom_diff)
        .finish()?
        .enqueue(&ctx.linear(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pooled_extent_matches_layer_setup() {
        assert_eq!(pooled_extent(5, 2, 2, 0).unwrap(), 3);
        assert_eq!(pooled_extent(4, 3, 2, 1).unwrap(), 3);
        assert_eq!(pooled_extent(4, 2, 3, 1).unwrap(), 2);
        assert!(pooled_extent(2, 3, 1, 0).is_err());
        assert!(pooled_extent(4, 2, 0, 0).is_err());
    }
}
