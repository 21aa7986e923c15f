use super::{IN, KernelDef, OUT, Param, kernel};
use crate::error::StatusCode;
use crate::host::launch::Launch;
use crate::precision::Dtype;
use rayon::prelude::*;

pub(crate) const KERNELS: &[KernelDef] = &[
    kernel!("DropoutForward", forward, [Param::Int, IN, IN, Param::Real, OUT]),
    kernel!(
        "DropoutBackward",
        backward,
        [Param::Int, IN, IN, Param::Single, Param::Real, OUT]
    ),
];

/// `top = bottom * mask * scale` with an integer keep mask.
fn forward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let n = k.items(k.scalars.extent(0)?);
    let scale = k.scalars.real::<T>(3)?;
    let bottom = k.inputs.get::<T>(1, n)?;
    let mask = k.inputs.get::<i32>(2, n)?;
    let top = k.outputs.get::<T>(4, n)?;
    top.par_iter_mut()
        .zip(bottom.par_iter().zip(mask.par_iter()))
        .for_each(|(y, (&x, &m))| *y = x * T::from_f64(f64::from(m)) * scale);
    Ok(())
}

/// Passes the gradient where the mask exceeds `threshold`.
fn backward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let n = k.items(k.scalars.extent(0)?);
    let threshold = k.scalars.single(3)?;
    let scale = k.scalars.real::<T>(4)?;
    let top_diff = k.inputs.get::<T>(1, n)?;
    let mask = k.inputs.get::<i32>(2, n)?;
    let bottom_diff = k.outputs.get::<T>(5, n)?;
    bottom_diff
        .par_iter_mut()
        .zip(top_diff.par_iter().zip(mask.par_iter()))
        .for_each(|(dx, (&dy, &m))| {
            *dx = if m as f32 > threshold { dy * scale } else { T::zero() };
        });
    Ok(())
}
