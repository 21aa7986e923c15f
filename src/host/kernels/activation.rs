//! Leaky and parametric ReLU. Zero counts as non-positive.

use super::{IN, KernelDef, OUT, Param, kernel};
use crate::error::StatusCode;
use crate::host::launch::Launch;
use crate::precision::Dtype;
use rayon::prelude::*;

const I: Param = Param::Int;

pub(crate) const KERNELS: &[KernelDef] = &[
    kernel!("ReLUForward", relu_forward, [I, IN, OUT, Param::Real]),
    kernel!("ReLUBackward", relu_backward, [I, IN, IN, OUT, Param::Real]),
    kernel!("PReLUForward", prelu_forward, [I, I, I, IN, OUT, IN, I]),
    kernel!("PReLUBackward", prelu_backward, [I, I, I, IN, IN, OUT, IN, I]),
    kernel!("PReLUParamBackward", prelu_param_backward, [I, IN, IN, OUT]),
];

#[inline]
fn leaky<T: Dtype>(x: T, slope: T) -> T {
    if x > T::zero() { x } else { x * slope }
}

#[inline]
fn leaky_grad<T: Dtype>(x: T, slope: T) -> T {
    if x > T::zero() { T::one() } else { slope }
}

fn relu_forward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let n = k.items(k.scalars.extent(0)?);
    let slope = k.scalars.real::<T>(3)?;
    let bottom = k.inputs.get::<T>(1, n)?;
    let top = k.outputs.get::<T>(2, n)?;
    top.par_iter_mut()
        .zip(bottom.par_iter())
        .for_each(|(y, &x)| *y = leaky(x, slope));
    Ok(())
}

fn relu_backward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let n = k.items(k.scalars.extent(0)?);
    let slope = k.scalars.real::<T>(4)?;
    let top_diff = k.inputs.get::<T>(1, n)?;
    let bottom = k.inputs.get::<T>(2, n)?;
    let bottom_diff = k.outputs.get::<T>(3, n)?;
    bottom_diff
        .par_iter_mut()
        .zip(top_diff.par_iter().zip(bottom.par_iter()))
        .for_each(|(dx, (&dy, &x))| *dx = dy * leaky_grad(x, slope));
    Ok(())
}

/// Channel layout shared by the parametric kernels: `[?][channels][dim]`
/// with slopes shared by `div_factor` consecutive channels.
struct SlopeLayout {
    channels: usize,
    dim: usize,
    div_factor: usize,
}

impl SlopeLayout {
    fn read(k: &Launch, div_factor_slot: usize) -> Result<Self, StatusCode> {
        let layout = Self {
            channels: k.scalars.extent(1)?,
            dim: k.scalars.extent(2)?,
            div_factor: k.scalars.extent(div_factor_slot)?,
        };
        if layout.channels == 0 || layout.dim == 0 || layout.div_factor == 0 {
            return Err(StatusCode::INVALID_ARG_VALUE);
        }
        Ok(layout)
    }

    fn slopes(&self) -> usize {
        self.channels.div_ceil(self.div_factor)
    }

    fn slope_of(&self, index: usize) -> usize {
        (index / self.dim) % self.channels / self.div_factor
    }
}

fn prelu_forward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let n = k.items(k.scalars.extent(0)?);
    let layout = SlopeLayout::read(k, 6)?;
    let bottom = k.inputs.get::<T>(3, n)?;
    let slope = k.inputs.get::<T>(5, layout.slopes())?;
    let top = k.outputs.get::<T>(4, n)?;
    top.par_iter_mut()
        .zip(bottom.par_iter())
        .enumerate()
        .for_each(|(i, (y, &x))| *y = leaky(x, slope[layout.slope_of(i)]));
    Ok(())
}

fn prelu_backward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let n = k.items(k.scalars.extent(0)?);
    let layout = SlopeLayout::read(k, 7)?;
    let top_diff = k.inputs.get::<T>(3, n)?;
    let bottom = k.inputs.get::<T>(4, n)?;
    let slope = k.inputs.get::<T>(6, layout.slopes())?;
    let bottom_diff = k.outputs.get::<T>(5, n)?;
    bottom_diff
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, dx)| *dx = top_diff[i] * leaky_grad(bottom[i], slope[layout.slope_of(i)]));
    Ok(())
}

/// Per-element slope gradient `dy * x` on the non-positive side, zero elsewhere.
fn prelu_param_backward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let n = k.items(k.scalars.extent(0)?);
    let top_diff = k.inputs.get::<T>(1, n)?;
    let bottom = k.inputs.get::<T>(2, n)?;
    let slope_diff = k.outputs.get::<T>(3, n)?;
    slope_diff
        .par_iter_mut()
        .zip(top_diff.par_iter().zip(bottom.par_iter()))
        .for_each(|(out, (&dy, &x))| {
            *out = if x > T::zero() { T::zero() } else { dy * x };
        });
    Ok(())
}
