//! Direct convolution on a tiled 3-D launch.
//!
//! Axis 0 walks groups of `pix_horiz` output columns, axis 1 groups of
//! `pix_vert` output rows, axis 2 the pairs (image, output-channel group of
//! `n_outs` channels). Outputs whose work-item falls outside the launched
//! range are left untouched.

use super::{IN, KernelDef, OUT, Param, kernel};
use crate::error::StatusCode;
use crate::host::launch::Launch;
use crate::precision::Dtype;
use rayon::prelude::*;

const I: Param = Param::Int;

pub(crate) const KERNELS: &[KernelDef] = &[kernel!(
    "Conv",
    conv,
    [
        IN, IN, IN, OUT, I, I, I, I, I, I, I, I, I, I, I, I, I, I, I, I, I, I, I, I
    ]
)];

struct Geometry {
    kernel_w: usize,
    kernel_h: usize,
    channel_out: usize,
    channel_in: usize,
    pad: usize,
    stride: usize,
    pix_horiz: usize,
    pix_vert: usize,
    bot_batch_stride: usize,
    bot_channel_stride: usize,
    bot_stride: usize,
    top_batch_stride: usize,
    top_channel_stride: usize,
    top_stride: usize,
    weights_stride: usize,
    width_out: usize,
    height_out: usize,
    n_outs: usize,
}

impl Geometry {
    // Slots 18 and 19 carry the visible input extent used by device
    // builds for their tile loads; the host reads borders from the strides.
    fn read(k: &Launch) -> Result<Self, StatusCode> {
        let s = &k.scalars;
        let g = Self {
            kernel_w: s.extent(4)?,
            kernel_h: s.extent(5)?,
            channel_out: s.extent(6)?,
            channel_in: s.extent(7)?,
            pad: s.extent(8)?,
            stride: s.extent(9)?,
            pix_horiz: s.extent(10)?,
            pix_vert: s.extent(11)?,
            bot_batch_stride: s.extent(12)?,
            bot_channel_stride: s.extent(13)?,
            bot_stride: s.extent(14)?,
            top_batch_stride: s.extent(15)?,
            top_channel_stride: s.extent(16)?,
            top_stride: s.extent(17)?,
            weights_stride: s.extent(20)?,
            width_out: s.extent(21)?,
            height_out: s.extent(22)?,
            n_outs: s.extent(23)?,
        };
        let consistent = g.stride > 0
            && g.pix_horiz > 0
            && g.pix_vert > 0
            && g.bot_stride > 0
            && g.n_outs > 0
            && g.channel_out % g.n_outs == 0
            && g.weights_stride >= g.kernel_w * g.kernel_h
            && g.bot_batch_stride >= g.channel_in * g.bot_channel_stride
            && g.top_stride >= g.width_out
            && g.top_channel_stride >= g.height_out * g.top_stride
            && g.top_batch_stride >= g.channel_out * g.top_channel_stride;
        if consistent {
            Ok(g)
        } else {
            Err(StatusCode::INVALID_ARG_VALUE)
        }
    }

    fn height(&self) -> usize {
        self.bot_channel_stride / self.bot_stride
    }

    fn output<T: Dtype>(
        &self,
        image: &[T],
        weights: &[T],
        bias: T,
        oc: usize,
        oy: usize,
        ox: usize,
    ) -> T {
        let (width, height) = (self.bot_stride, self.height());
        let mut sum = bias;
        for ic in 0..self.channel_in {
            let plane = &image[ic * self.bot_channel_stride..];
            let filter = &weights[(oc * self.channel_in + ic) * self.weights_stride..];
            for kh in 0..self.kernel_h {
                let Some(y) = (oy * self.stride + kh).checked_sub(self.pad) else {
                    continue;
                };
                if y >= height {
                    continue;
                }
                for kw in 0..self.kernel_w {
                    let Some(x) = (ox * self.stride + kw).checked_sub(self.pad) else {
                        continue;
                    };
                    if x < width {
                        sum = sum + plane[y * self.bot_stride + x] * filter[kh * self.kernel_w + kw];
                    }
                }
            }
        }
        sum
    }
}

fn conv<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let g = Geometry::read(k)?;
    let [cols, rows, depth] = k.work.padded_global();
    let n_outputs = g.channel_out / g.n_outs;
    if n_outputs == 0 || g.top_batch_stride == 0 {
        return Ok(());
    }
    let batch = depth.div_ceil(n_outputs);

    let bottom = k.inputs.get::<T>(0, batch * g.bot_batch_stride)?;
    let weights = k.inputs.get::<T>(1, g.channel_out * g.channel_in * g.weights_stride)?;
    let bias = k.inputs.get::<T>(2, g.channel_out)?;
    let top = k.outputs.get::<T>(3, batch * g.top_batch_stride)?;

    let width_out = g.width_out.min(cols * g.pix_horiz);
    let height_out = g.height_out.min(rows * g.pix_vert);
    top.par_chunks_mut(g.top_batch_stride)
        .take(batch)
        .enumerate()
        .for_each(|(b, top)| {
            let image = &bottom[b * g.bot_batch_stride..];
            for oc in 0..g.channel_out {
                if b * n_outputs + oc / g.n_outs >= depth {
                    break;
                }
                for oy in 0..height_out {
                    let row = oc * g.top_channel_stride + oy * g.top_stride;
                    for ox in 0..width_out {
                        top[row + ox] = g.output(image, weights, bias[oc], oc, oy, ox);
                    }
                }
            }
        });
    Ok(())
}
