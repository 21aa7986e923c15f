//! Elementwise arithmetic.

use super::{IN, INOUT, KernelDef, OUT, Param, kernel};
use crate::error::StatusCode;
use crate::host::launch::Launch;
use crate::precision::Dtype;
use rayon::prelude::*;

pub(crate) const KERNELS: &[KernelDef] = &[
    kernel!("add", add, [Param::Int, IN, IN, OUT]),
    kernel!("element_mul", element_mul, [Param::Int, IN, IN, OUT]),
    kernel!("div", div, [Param::Int, IN, IN, OUT]),
    kernel!("add_scalar", add_scalar, [Param::Int, Param::Real, INOUT]),
    kernel!("powx", powx, [Param::Int, IN, Param::Real, OUT]),
    kernel!("sign", sign, [Param::Int, IN, OUT]),
];

fn zip_with<T: Dtype>(k: &mut Launch, f: impl Fn(T, T) -> T + Sync) -> Result<(), StatusCode> {
    let n = k.items(k.scalars.extent(0)?);
    let a = k.inputs.get::<T>(1, n)?;
    let b = k.inputs.get::<T>(2, n)?;
    let y = k.outputs.get::<T>(3, n)?;
    y.par_iter_mut()
        .zip(a.par_iter().zip(b.par_iter()))
        .for_each(|(y, (&a, &b))| *y = f(a, b));
    Ok(())
}

fn add<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    zip_with::<T>(k, |a, b| a + b)
}

fn element_mul<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    zip_with::<T>(k, |a, b| a * b)
}

fn div<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    zip_with::<T>(k, |a, b| a / b)
}

fn add_scalar<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let n = k.items(k.scalars.extent(0)?);
    let alpha = k.scalars.real::<T>(1)?;
    let y = k.outputs.get::<T>(2, n)?;
    y.par_iter_mut().for_each(|y| *y = *y + alpha);
    Ok(())
}

fn powx<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let n = k.items(k.scalars.extent(0)?);
    let alpha = k.scalars.real::<T>(2)?;
    let a = k.inputs.get::<T>(1, n)?;
    let y = k.outputs.get::<T>(3, n)?;
    y.par_iter_mut()
        .zip(a.par_iter())
        .for_each(|(y, &a)| *y = a.powf(alpha));
    Ok(())
}

fn sign<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let n = k.items(k.scalars.extent(0)?);
    let x = k.inputs.get::<T>(1, n)?;
    let y = k.outputs.get::<T>(2, n)?;
    y.par_iter_mut().zip(x.par_iter()).for_each(|(y, &x)| {
        let positive = if x > T::zero() { T::one() } else { T::zero() };
        let negative = if x < T::zero() { T::one() } else { T::zero() };
        *y = positive - negative;
    });
    Ok(())
}
