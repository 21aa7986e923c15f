//! Layout transforms of the packed-convolution scheme.
//!
//! The packed scheme lowers `packing_num` images at once, runs one matrix
//! multiply over the whole pack and then unpacks the result per image.
//! [`opttrans`] interleaves a pack of images channel by channel before the
//! lowering; [`transform`] scatters the packed product back.

use crate::context::Dispatcher;
use crate::device::DeviceBuffer;
use crate::error::{DispatchError, Result};
use crate::precision::Dtype;

/// Unpacks `src[n][p][m]` (`n_rows` rows, `packing_num` images, `m_cols`
/// columns) into `dst[top_offset + p * n_rows * m_cols + n * m_cols + m]`.
pub fn transform<T: Dtype>(
    ctx: &Dispatcher,
    src: &DeviceBuffer,
    dst: &DeviceBuffer,
    top_offset: usize,
    n_rows: usize,
    m_cols: usize,
    packing_num: usize,
) -> Result<()> {
    let kernel = ctx.kernel::<T>("transform")?;
    ctx.bind(&kernel)
        .buffer(src)
        .buffer(dst)
        .size(top_offset)
        .size(n_rows)
        .size(m_cols)
        .size(packing_num)
        .finish()?
        .enqueue(&ctx.linear(m_cols * packing_num))
}

/// Rearranges `optnum` images `[i][c][y][x]` starting at `im_offset` into
/// `[c][i][y][x]` starting at `opt_offset`.
#[allow(clippy::too_many_arguments)]
pub fn opttrans<T: Dtype>(
    ctx: &Dispatcher,
    data_im: &DeviceBuffer,
    im_offset: usize,
    channels: usize,
    height: usize,
    width: usize,
    data_opt: &DeviceBuffer,
    opt_offset: usize,
    optnum: usize,
) -> Result<()> {
    let num_kernels = channels * height * width * optnum;
    let kernel = ctx.kernel::<T>("opttrans")?;
    ctx.bind(&kernel)
        .size(num_kernels)
        .buffer(data_im)
        .size(im_offset)
        .size(height)
        .size(width)
        .size(channels)
        .buffer(data_opt)
        .size(opt_offset)
        .size(optnum)
        .finish()?
        .enqueue(&ctx.linear(num_kernels))
}

/// Splits a batch into consecutive packs for the packed scheme.
///
/// ```rust
/// use layer_kernels::ops::transform::PackingPlan;
///
/// let packs: Vec<_> = PackingPlan::new(37, 16).unwrap().collect();
/// assert_eq!(packs, [(0, 16), (16, 16), (32, 5)]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackingPlan {
    num: usize,
    packing_num: usize,
    next: usize,
}

impl PackingPlan {
    pub fn new(num: usize, packing_num: usize) -> Result<Self> {
        if packing_num == 0 {
            return Err(DispatchError::precondition("packing plan", "packing_num is 0"));
        }
        Ok(Self {
            num,
            packing_num,
            next: 0,
        })
    }

    /// Plan using the dispatcher's configured pack size.
    pub fn for_batch(ctx: &Dispatcher, num: usize) -> Result<Self> {
        Self::new(num, ctx.config().packing_num)
    }

    /// Total number of packs.
    pub fn packs(&self) -> usize {
        self.num.div_ceil(self.packing_num)
    }
}

impl Iterator for PackingPlan {
    /// `(first image, images in this pack)`.
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.num {
            return None;
        }
        let start = self.next;
        let count = self.packing_num.min(self.num - start);
        self.next += count;
        Some((start, count))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.num - self.next).div_ceil(self.packing_num);
        (left, Some(left))
    }
}

impl ExactSizeIterator for PackingPlan {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_batches_have_no_short_pack() {
        let plan = PackingPlan::new(32, 16).unwrap();
        assert_eq!(plan.packs(), 2);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.collect::<Vec<_>>(), [(0, 16), (16, 16)]);
    }

    #[test]
    fn empty_batch_and_zero_pack() {
        assert_eq!(PackingPlan::new(0, 4).unwrap().next(), None);
        assert!(PackingPlan::new(4, 0).is_err());
    }
}
