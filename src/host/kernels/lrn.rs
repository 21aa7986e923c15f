//! Local response normalization across channels.

use super::{IN, KernelDef, OUT, Param, kernel};
use crate::error::StatusCode;
use crate::host::launch::Launch;
use crate::precision::Dtype;
use rayon::prelude::*;

const I: Param = Param::Int;
const R: Param = Param::Real;

pub(crate) const KERNELS: &[KernelDef] = &[
    kernel!("LRNFillScale", fill_scale, [I, IN, I, I, I, I, I, R, R, OUT]),
    kernel!("LRNComputeOutput", compute_output, [I, IN, IN, R, OUT]),
    kernel!(
        "LRNComputeDiff",
        compute_diff,
        [I, IN, IN, IN, IN, I, I, I, I, I, R, R, OUT]
    ),
];

/// Slides a window of `size` channels along one `(n, h, w)` column.
///
/// `add(c)` is the contribution of channel `c`; `emit(c, accum)` is called
/// once per channel with the window centred on it.
fn slide<T: Dtype>(
    channels: usize,
    size: usize,
    add: impl Fn(usize) -> T,
    mut emit: impl FnMut(usize, T),
) {
    let pre_pad = (size.saturating_sub(1)) / 2;
    let post_pad = size.saturating_sub(pre_pad + 1);
    let mut accum = T::zero();
    for head in 0..channels + post_pad {
        if head < channels {
            accum = accum + add(head);
        }
        if head >= size {
            accum = accum - add(head - size);
        }
        if head >= post_pad {
            emit(head - post_pad, accum);
        }
    }
}

fn fill_scale<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let nthreads = k.scalars.extent(0)?;
    let num = k.scalars.extent(2)?;
    let channels = k.scalars.extent(3)?;
    let plane = k.scalars.extent(4)? * k.scalars.extent(5)?;
    let size = k.scalars.extent(6)?;
    let alpha_over_size = k.scalars.real::<T>(7)?;
    let offset = k.scalars.real::<T>(8)?;
    let items = k.items(nthreads).min(num * plane);
    let image = channels * plane;

    let input = k.inputs.get::<T>(1, num * image)?;
    let scale = k.outputs.get::<T>(9, num * image)?;
    if image == 0 {
        return Ok(());
    }
    scale
        .par_chunks_mut(image)
        .zip(input.par_chunks(image))
        .enumerate()
        .for_each(|(n, (scale, input))| {
            for pixel in 0..plane {
                if n * plane + pixel >= items {
                    break;
                }
                slide(
                    channels,
                    size,
                    |c| {
                        let x = input[c * plane + pixel];
                        x * x
                    },
                    |c, accum| scale[c * plane + pixel] = offset + accum * alpha_over_size,
                );
            }
        });
    Ok(())
}

fn compute_output<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let n = k.items(k.scalars.extent(0)?);
    let negative_beta = k.scalars.real::<T>(3)?;
    let input = k.inputs.get::<T>(1, n)?;
    let scale = k.inputs.get::<T>(2, n)?;
    let out = k.outputs.get::<T>(4, n)?;
    out.par_iter_mut()
        .zip(input.par_iter().zip(scale.par_iter()))
        .for_each(|(out, (&x, &s))| *out = x * s.powf(negative_beta));
    Ok(())
}

fn compute_diff<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let nthreads = k.scalars.extent(0)?;
    let num = k.scalars.extent(5)?;
    let channels = k.scalars.extent(6)?;
    let plane = k.scalars.extent(7)? * k.scalars.extent(8)?;
    let size = k.scalars.extent(9)?;
    let negative_beta = k.scalars.real::<T>(10)?;
    let cache_ratio = k.scalars.real::<T>(11)?;
    let items = k.items(nthreads).min(num * plane);
    let image = channels * plane;
    let total = num * image;

    let bottom_data = k.inputs.get::<T>(1, total)?;
    let top_data = k.inputs.get::<T>(2, total)?;
    let scale = k.inputs.get::<T>(3, total)?;
    let top_diff = k.inputs.get::<T>(4, total)?;
    let bottom_diff = k.outputs.get::<T>(12, total)?;
    if image == 0 {
        return Ok(());
    }
    bottom_diff
        .par_chunks_mut(image)
        .enumerate()
        .for_each(|(n, bottom_diff)| {
            let base = n * image;
            for pixel in 0..plane {
                if n * plane + pixel >= items {
                    break;
                }
                let at = |c: usize| base + c * plane + pixel;
                slide(
                    channels,
                    size,
                    |c| top_diff[at(c)] * top_data[at(c)] / scale[at(c)],
                    |c, accum| {
                        bottom_diff[c * plane + pixel] = top_diff[at(c)]
                            * scale[at(c)].powf(negative_beta)
                            - cache_ratio * bottom_data[at(c)] * accum;
                    },
                );
            }
        });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_of_three_sums_neighbours() {
        let values = [1.0f64, 2.0, 3.0, 4.0];
        let mut sums = [0.0; 4];
        slide(4, 3, |c| values[c], |c, accum| sums[c] = accum);
        assert_eq!(sums, [3.0, 6.0, 9.0, 7.0]);
    }

    #[test]
    fn window_of_one_is_identity() {
        let values = [5.0f64, -1.0];
        let mut sums = [0.0; 2];
        slide(2, 1, |c| values[c], |c, accum| sums[c] = accum);
        assert_eq!(sums, values);
    }
}
