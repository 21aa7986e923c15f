//! Softmax, channel reductions and the softmax loss.

use super::{IN, INOUT, KernelDef, OUT, Param, kernel};
use crate::error::StatusCode;
use crate::host::launch::{Launch, required};
use crate::precision::Dtype;
use rayon::prelude::*;

pub(crate) const KERNELS: &[KernelDef] = &[
    kernel!(
        "kernel_channel_max",
        channel_max,
        [Param::Int, Param::Int, Param::Int, IN, OUT]
    ),
    kernel!(
        "kernel_channel_subtract",
        channel_subtract,
        [Param::Int, Param::Int, Param::Int, Param::Int, IN, INOUT]
    ),
    kernel!("kernel_exp", exp, [Param::Int, IN, OUT]),
    kernel!(
        "kernel_channel_sum",
        channel_sum,
        [Param::Int, Param::Int, Param::Int, IN, OUT]
    ),
    kernel!(
        "kernel_channel_div",
        channel_div,
        [Param::Int, Param::Int, Param::Int, Param::Int, IN, INOUT]
    ),
    kernel!(
        "kernel_channel_dot",
        channel_dot,
        [Param::Int, Param::Int, Param::Int, IN, IN, OUT]
    ),
    kernel!(
        "SoftmaxLossForwardGPU",
        loss_forward,
        [Param::Int, IN, IN, OUT, Param::Int, Param::Int, Param::Int, Param::Flag, Param::Int, OUT]
    ),
    kernel!(
        "SoftmaxLossBackwardGPU",
        loss_backward,
        [Param::Int, IN, IN, INOUT, Param::Int, Param::Int, Param::Int, Param::Flag, Param::Int, OUT]
    ),
    kernel!("get_max", row_max, [Param::Int, Param::Int, IN, OUT]),
    kernel!("exp", exp, [Param::Int, IN, OUT]),
    kernel!("softmax_div", row_div, [Param::Int, Param::Int, IN, INOUT]),
    kernel!("softmax", mean_log_loss, [IN, OUT, IN, Param::Int, Param::Int, Param::Scratch]),
    kernel!("scal", scal, [Param::Int, Param::Real, INOUT]),
    kernel!("diff", diff, [Param::Int, Param::Int, INOUT, IN]),
];

/// Reads a label stored as a float and checks it addresses one of `classes`.
fn class_of<T: Dtype>(label: T, classes: usize) -> Result<usize, StatusCode> {
    let class = label.into_f64() as i64;
    usize::try_from(class)
        .ok()
        .filter(|&c| c < classes)
        .ok_or(StatusCode::OUT_OF_RESOURCES)
}

/// Reduces over channels at every `(n, s)` of a `[num][channels][spatial]` tensor.
fn reduce_channels<T: Dtype>(
    k: &mut Launch,
    reduce: impl Fn(&mut dyn Iterator<Item = usize>) -> T + Sync,
) -> Result<(), StatusCode> {
    let num = k.scalars.extent(0)?;
    let channels = k.scalars.extent(1)?;
    let spatial = k.scalars.extent(2)?;
    let items = k.items(num * spatial);
    if spatial == 0 {
        return Ok(());
    }
    let out = k.outputs.get::<T>(4, items)?;
    out.par_iter_mut().enumerate().for_each(|(index, out)| {
        let n = index / spatial;
        let s = index % spatial;
        let mut offsets = (0..channels).map(|c| (n * channels + c) * spatial + s);
        *out = reduce(&mut offsets);
    });
    Ok(())
}

fn channel_max<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let need = k.scalars.extent(0)? * k.scalars.extent(1)? * k.scalars.extent(2)?;
    let data = k.inputs.get::<T>(3, need)?.to_vec();
    reduce_channels::<T>(k, |offsets| {
        offsets.fold(T::min_value(), |acc, i| acc.max(data[i]))
    })
}

fn channel_sum<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let need = k.scalars.extent(0)? * k.scalars.extent(1)? * k.scalars.extent(2)?;
    let data = k.inputs.get::<T>(3, need)?.to_vec();
    reduce_channels::<T>(k, |offsets| offsets.fold(T::zero(), |acc, i| acc + data[i]))
}

fn channel_dot<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let num = k.scalars.extent(0)?;
    let channels = k.scalars.extent(1)?;
    let spatial = k.scalars.extent(2)?;
    let items = k.items(num * spatial);
    if spatial == 0 {
        return Ok(());
    }
    let need = num * channels * spatial;
    let a = k.inputs.get::<T>(3, need)?;
    let b = k.inputs.get::<T>(4, need)?;
    let dot = k.outputs.get::<T>(5, items)?;
    dot.par_iter_mut().enumerate().for_each(|(index, out)| {
        let n = index / spatial;
        let s = index % spatial;
        *out = (0..channels)
            .map(|c| (n * channels + c) * spatial + s)
            .fold(T::zero(), |acc, i| acc + a[i] * b[i]);
    });
    Ok(())
}

/// Applies `f(data[index], per_position[n * spatial + s])` in place.
fn broadcast_channels<T: Dtype>(
    k: &mut Launch,
    f: impl Fn(T, T) -> T + Sync,
) -> Result<(), StatusCode> {
    let count = k.scalars.extent(0)?;
    let channels = k.scalars.extent(2)?;
    let spatial = k.scalars.extent(3)?;
    let items = k.items(count);
    if items == 0 {
        return Ok(());
    }
    if channels == 0 || spatial == 0 {
        return Err(StatusCode::INVALID_ARG_VALUE);
    }
    let per_position = k.inputs.get::<T>(4, (count - 1) / channels / spatial * spatial + spatial)?;
    let data = k.outputs.get::<T>(5, items)?;
    data.par_iter_mut().enumerate().for_each(|(index, value)| {
        let n = index / channels / spatial;
        let s = index % spatial;
        *value = f(*value, per_position[n * spatial + s]);
    });
    Ok(())
}

fn channel_subtract<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    broadcast_channels::<T>(k, |value, max| value - max)
}

fn channel_div<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    broadcast_channels::<T>(k, |value, sum| value / sum)
}

fn exp<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let n = k.items(k.scalars.extent(0)?);
    let data = k.inputs.get::<T>(1, n)?;
    let out = k.outputs.get::<T>(2, n)?;
    out.par_iter_mut()
        .zip(data.par_iter())
        .for_each(|(out, &x)| *out = x.exp());
    Ok(())
}

fn loss_forward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let items = k.items(k.scalars.extent(0)?);
    let num = k.scalars.extent(4)?;
    let dim = k.scalars.extent(5)?;
    let spatial = k.scalars.extent(6)?;
    let has_ignore = k.scalars.flag(7)?;
    let ignore = k.scalars.int(8)?;
    if items == 0 {
        return Ok(());
    }
    if spatial == 0 {
        return Err(StatusCode::INVALID_ARG_VALUE);
    }
    let classes = dim / spatial;
    let prob = k.inputs.get::<T>(1, num * dim)?;
    let label = k.inputs.get::<T>(2, items)?;
    let [loss, counts] = k.outputs.blocks([3, 9])?;
    let loss = required(loss)?.slice_mut::<T>(items)?;
    let counts = required(counts)?.slice_mut::<T>(items)?;

    loss.par_iter_mut()
        .zip(counts.par_iter_mut())
        .enumerate()
        .try_for_each(|(index, (loss, count))| {
            let n = index / spatial;
            let s = index % spatial;
            let raw = label[index];
            if has_ignore && raw.into_f64() as i64 == i64::from(ignore) {
                *loss = T::zero();
                *count = T::zero();
                return Ok(());
            }
            let class = class_of(raw, classes)?;
            let p = *prob
                .get(n * dim + class * spatial + s)
                .ok_or(StatusCode::OUT_OF_RESOURCES)?;
            *loss = -p.max(T::log_floor()).ln();
            *count = T::one();
            Ok(())
        })
}

/// Expects `bottom_diff` to already hold the probabilities.
fn loss_backward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let items = k.items(k.scalars.extent(0)?);
    let num = k.scalars.extent(4)?;
    let dim = k.scalars.extent(5)?;
    let spatial = k.scalars.extent(6)?;
    let has_ignore = k.scalars.flag(7)?;
    let ignore = k.scalars.int(8)?;
    if items == 0 {
        return Ok(());
    }
    if spatial == 0 {
        return Err(StatusCode::INVALID_ARG_VALUE);
    }
    let classes = dim / spatial;
    let label = k.inputs.get::<T>(2, items)?;
    let [bottom_diff, counts] = k.outputs.blocks([3, 9])?;
    let bottom_diff = required(bottom_diff)?.slice_mut::<T>(num * dim)?;
    let counts = required(counts)?.slice_mut::<T>(items)?;

    for (index, count) in counts.iter_mut().enumerate() {
        let n = index / spatial;
        let s = index % spatial;
        if n >= num {
            return Err(StatusCode::OUT_OF_RESOURCES);
        }
        let raw = label[index];
        if has_ignore && raw.into_f64() as i64 == i64::from(ignore) {
            for c in 0..classes {
                bottom_diff[n * dim + c * spatial + s] = T::zero();
            }
            *count = T::zero();
        } else {
            let class = class_of(raw, classes)?;
            let slot = &mut bottom_diff[n * dim + class * spatial + s];
            *slot = *slot - T::one();
            *count = T::one();
        }
    }
    Ok(())
}

fn row_max<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let num = k.scalars.extent(0)?;
    let dim = k.scalars.extent(1)?;
    let items = k.items(num);
    let bottom = k.inputs.get::<T>(2, num * dim)?;
    let scale = k.outputs.get::<T>(3, items)?;
    scale.par_iter_mut().enumerate().for_each(|(i, out)| {
        *out = bottom[i * dim..(i + 1) * dim]
            .iter()
            .fold(T::min_value(), |acc, &x| acc.max(x));
    });
    Ok(())
}

fn row_div<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let num = k.scalars.extent(0)?;
    let dim = k.scalars.extent(1)?;
    let items = k.items(num * dim);
    let scale = k.inputs.get::<T>(2, num)?;
    let data = k.outputs.get::<T>(3, items)?;
    data.par_iter_mut()
        .enumerate()
        .for_each(|(i, value)| *value = *value / scale[i / dim]);
    Ok(())
}

/// `loss[0] = -sum_i ln(max(prob[i * dim + label[i]], floor)) / num`,
/// computed by one work-group.
fn mean_log_loss<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let num = k.scalars.extent(3)?;
    let dim = k.scalars.extent(4)?;
    if k.items(1) == 0 {
        return Ok(());
    }
    let prob = k.inputs.get::<T>(0, num * dim)?;
    let label = k.inputs.get::<T>(2, num)?;
    let mut total = T::zero();
    for (i, &raw) in label.iter().enumerate() {
        let class = class_of(raw, dim)?;
        total = total - prob[i * dim + class].max(T::log_floor()).ln();
    }
    let loss = k.outputs.get::<T>(1, 1)?;
    loss[0] = if num == 0 {
        T::zero()
    } else {
        total / T::from_f64(num as f64)
    };
    Ok(())
}

fn scal<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let n = k.items(k.scalars.extent(0)?);
    let alpha = k.scalars.real::<T>(1)?;
    let data = k.outputs.get::<T>(2, n)?;
    data.par_iter_mut().for_each(|x| *x = *x * alpha);
    Ok(())
}

/// Subtracts one at each row's label.
fn diff<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let num = k.scalars.extent(0)?;
    let dim = k.scalars.extent(1)?;
    let items = k.items(num);
    let label = k.inputs.get::<T>(3, items)?;
    let data = k.outputs.get::<T>(2, num * dim)?;
    for (i, &raw) in label.iter().enumerate() {
        let class = class_of(raw, dim)?;
        data[i * dim + class] = data[i * dim + class] - T::one();
    }
    Ok(())
}
