//! Layout transforms of the packed-convolution scheme.

use super::{IN, KernelDef, OUT, Param, kernel};
use crate::error::StatusCode;
use crate::host::launch::Launch;
use crate::precision::Dtype;
use rayon::prelude::*;

pub(crate) const KERNELS: &[KernelDef] = &[
    kernel!(
        "transform",
        transform,
        [IN, OUT, Param::Int, Param::Int, Param::Int, Param::Int]
    ),
    kernel!(
        "opttrans",
        opttrans,
        [Param::Int, IN, Param::Int, Param::Int, Param::Int, Param::Int, OUT, Param::Int, Param::Int]
    ),
];

/// Unpacks `src[n][p][m]` into `dst[top_offset + p*N*M + n*M + m]`.
///
/// Work-item `p * M + m` owns one column and walks every row.
fn transform<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let top_offset = k.scalars.extent(2)?;
    let rows = k.scalars.extent(3)?;
    let cols = k.scalars.extent(4)?;
    let packing = k.scalars.extent(5)?;
    let columns = k.items(cols * packing);
    let plane = rows * cols;

    let src = k.inputs.get::<T>(0, rows * packing * cols)?;
    let dst = k.outputs.get::<T>(1, top_offset + packing * plane)?;
    dst[top_offset..]
        .par_iter_mut()
        .enumerate()
        .for_each(|(j, out)| {
            let p = j / plane;
            let n = (j / cols) % rows;
            let m = j % cols;
            if p * cols + m < columns {
                *out = src[(n * packing + p) * cols + m];
            }
        });
    Ok(())
}

/// Interleaves `optnum` images `[i][c][y][x]` into `[c][i][y][x]`.
fn opttrans<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let total = k.items(k.scalars.extent(0)?);
    let im_offset = k.scalars.extent(2)?;
    let height = k.scalars.extent(3)?;
    let width = k.scalars.extent(4)?;
    let channels = k.scalars.extent(5)?;
    let opt_offset = k.scalars.extent(7)?;
    let optnum = k.scalars.extent(8)?;
    let plane = height * width;
    if total > optnum * channels * plane {
        return Err(StatusCode::OUT_OF_RESOURCES);
    }

    let image = k.inputs.get::<T>(1, im_offset + optnum * channels * plane)?;
    let packed = k.outputs.get::<T>(6, opt_offset + total)?;
    packed[opt_offset..opt_offset + total]
        .par_iter_mut()
        .enumerate()
        .for_each(|(o, out)| {
            let c = o / (optnum * plane);
            let i = (o / plane) % optnum;
            let pixel = o % plane;
            *out = image[im_offset + (i * channels + c) * plane + pixel];
        });
    Ok(())
}
