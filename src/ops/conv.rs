//! Direct convolution.
//!
//! Production convolution goes through the packed scheme in
//! [`transform`](crate::ops::transform) followed by a matrix multiply. The
//! direct kernel is kept as an extension point: its launch is planned by
//! [`ConvTiling`] from the decision tables in [`crate::work`].

use crate::context::Dispatcher;
use crate::device::DeviceBuffer;
use crate::error::{DispatchError, Result};
use crate::precision::Dtype;
use crate::work::{ConvShape, ConvTiling};

/// Output extent `(extent + 2 * pad - kernel) / stride + 1` along one axis.
pub fn output_extent(extent: usize, kernel: usize, stride: usize, pad: usize) -> Result<usize> {
    if stride == 0 || kernel == 0 || extent + 2 * pad < kernel {
        return Err(DispatchError::precondition(
            "conv",
            format!("kernel {kernel} stride {stride} pad {pad} over extent {extent}"),
        ));
    }
    Ok((extent + 2 * pad - kernel) / stride + 1)
}

/// Launches `Conv` over the tiled 3-D range and returns the plan it used.
///
/// Weights are `[channel_out][channel_in][kernel_h][kernel_w]`, input and
/// output are dense NCHW. The kernel itself takes the four buffers followed
/// by twenty derived sizes and strides.
#[allow(clippy::too_many_arguments)]
pub fn conv_direct<T: Dtype>(
    ctx: &Dispatcher,
    bottom: &DeviceBuffer,
    weights: &DeviceBuffer,
    bias: &DeviceBuffer,
    top: &DeviceBuffer,
    channel_in: usize,
    width: usize,
    height: usize,
    channel_out: usize,
    width_out: usize,
    height_out: usize,
    kernel_w: usize,
    kernel_h: usize,
    stride: usize,
    pad: usize,
    batch: usize,
) -> Result<ConvTiling> {
    if stride == 0 {
        return Err(DispatchError::precondition("conv", "stride is 0"));
    }
    let shape = ConvShape {
        channel_out,
        width_out,
        height_out,
        kernel_w,
        batch,
    };
    let tiling = ConvTiling::plan(&shape, ctx.config().conv_tile);
    let kernel = ctx.kernel::<T>("Conv")?;

    let bot_channel_stride = width * height;
    let top_channel_stride = width_out * height_out;
    let bound = ctx
        .bind(&kernel)
        .buffer(bottom)
        .buffer(weights)
        .buffer(bias)
        .buffer(top)
        .size(kernel_w)
        .size(kernel_h)
        .size(channel_out)
        .size(channel_in)
        .size(pad)
        .size(stride)
        .size(tiling.pix_horiz)
        .size(tiling.pix_vert)
        .size(bot_channel_stride * channel_in)
        .size(bot_channel_stride)
        .size(width)
        .size(top_channel_stride * channel_out)
        .size(top_channel_stride)
        .size(width_out)
        .size((width_out * stride).saturating_sub(2 * pad))
        .size((height_out * stride).saturating_sub(2 * pad))
        .size(kernel_w * kernel_h)
        .size(width_out)
        .size(height_out)
        .size(tiling.outs_per_item)
        .finish()?;
    log::trace!("conv tiling {tiling:?}");
    bound.enqueue(&tiling.work_size())?;
    Ok(tiling)
}
