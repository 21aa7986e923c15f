//! Max, average and stochastic pooling, plus the fixed square-kernel variants.
//!
//! Backward kernels gather: each bottom cell sums the contributions of every
//! pooled cell whose window covers it and writes the total.

use super::{IN, INOUT, KernelDef, OPT_IN, OPT_OUT, OUT, Param, kernel};
use crate::error::StatusCode;
use crate::host::launch::{Launch, required};
use crate::precision::Dtype;
use rayon::prelude::*;

const I: Param = Param::Int;

pub(crate) const KERNELS: &[KernelDef] = &[
    kernel!(
        "MaxPoolForward",
        max_forward,
        [I, IN, I, I, I, I, I, I, I, I, I, I, I, I, OUT, OPT_OUT, OPT_OUT]
    ),
    kernel!(
        "AvePoolForward",
        ave_forward,
        [I, IN, I, I, I, I, I, I, I, I, I, I, I, I, OUT]
    ),
    kernel!(
        "StoPoolForwardTrain",
        sto_forward_train,
        [I, IN, I, I, I, I, I, I, I, I, I, I, INOUT, OUT]
    ),
    kernel!(
        "StoPoolForwardTest",
        sto_forward_test,
        [I, IN, I, I, I, I, I, I, I, I, I, I, OUT]
    ),
    kernel!(
        "MaxPoolBackward",
        max_backward,
        [I, IN, OPT_IN, OPT_IN, I, I, I, I, I, I, I, I, I, I, I, I, OUT]
    ),
    kernel!(
        "AvePoolBackward",
        ave_backward,
        [I, IN, I, I, I, I, I, I, I, I, I, I, I, I, OUT]
    ),
    kernel!(
        "StoPoolBackward",
        sto_backward,
        [I, IN, IN, I, I, I, I, I, I, I, I, I, I, OUT]
    ),
    kernel!("max_pool_fp", legacy_max_forward, [I, IN, I, I, I, I, I, I, I, I, OUT]),
    kernel!("ave_pool_fp", legacy_ave_forward, [I, IN, I, I, I, I, I, I, I, I, I, OUT]),
    kernel!(
        "max_pool_bp",
        legacy_max_backward,
        [I, IN, IN, IN, I, I, I, I, I, I, I, I, OUT]
    ),
    kernel!("ave_pool_bp", legacy_ave_backward, [I, IN, I, I, I, I, I, I, I, I, I, OUT]),
];

/// Pooling geometry read from consecutive `int` slots.
#[derive(Debug, Clone, Copy)]
struct Geometry {
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
}

/// A `[start, end)` range of rows and columns.
#[derive(Debug, Clone, Copy)]
struct Window {
    h: (usize, usize),
    w: (usize, usize),
}

impl Window {
    fn cells(self) -> impl Iterator<Item = (usize, usize)> {
        (self.h.0..self.h.1).flat_map(move |h| (self.w.0..self.w.1).map(move |w| (h, w)))
    }
}

impl Geometry {
    /// Reads `num .. stride_w` from ten slots starting at `first`, and the two
    /// pads after them when `padded`.
    fn read(k: &Launch, first: usize, padded: bool) -> Result<Self, StatusCode> {
        let s = &k.scalars;
        let (pad_h, pad_w) = if padded {
            (s.extent(first + 10)?, s.extent(first + 11)?)
        } else {
            (0, 0)
        };
        let geometry = Self {
            num: s.extent(first)?,
            channels: s.extent(first + 1)?,
            height: s.extent(first + 2)?,
            width: s.extent(first + 3)?,
            pooled_h: s.extent(first + 4)?,
            pooled_w: s.extent(first + 5)?,
            kernel_h: s.extent(first + 6)?,
            kernel_w: s.extent(first + 7)?,
            stride_h: s.extent(first + 8)?,
            stride_w: s.extent(first + 9)?,
            pad_h,
            pad_w,
        };
        geometry.checked()
    }

    /// Reads the square-kernel layout `clnum, channels, h, w, ph, pw, size,
    /// stride[, pad]`.
    fn read_square(k: &Launch, first: usize, padded: bool) -> Result<Self, StatusCode> {
        let s = &k.scalars;
        let size = s.extent(first + 6)?;
        let stride = s.extent(first + 7)?;
        let pad = if padded { s.extent(first + 8)? } else { 0 };
        let geometry = Self {
            num: s.extent(first)?,
            channels: s.extent(first + 1)?,
            height: s.extent(first + 2)?,
            width: s.extent(first + 3)?,
            pooled_h: s.extent(first + 4)?,
            pooled_w: s.extent(first + 5)?,
            kernel_h: size,
            kernel_w: size,
            stride_h: stride,
            stride_w: stride,
            pad_h: pad,
            pad_w: pad,
        };
        geometry.checked()
    }

    fn checked(self) -> Result<Self, StatusCode> {
        if self.stride_h == 0 || self.stride_w == 0 {
            return Err(StatusCode::INVALID_ARG_VALUE);
        }
        Ok(self)
    }

    fn bottom_len(&self) -> usize {
        self.num * self.channels * self.height * self.width
    }

    fn top_len(&self) -> usize {
        self.num * self.channels * self.pooled_h * self.pooled_w
    }

    fn bottom_plane(&self) -> usize {
        self.height * self.width
    }

    fn top_plane(&self) -> usize {
        self.pooled_h * self.pooled_w
    }

    /// `(n * channels + c, ph, pw)` of a pooled index.
    fn split_top(&self, index: usize) -> (usize, usize, usize) {
        let pw = index % self.pooled_w;
        let ph = (index / self.pooled_w) % self.pooled_h;
        (index / self.top_plane(), ph, pw)
    }

    /// `(n * channels + c, h, w)` of a bottom index.
    fn split_bottom(&self, index: usize) -> (usize, usize, usize) {
        let w = index % self.width;
        let h = (index / self.width) % self.height;
        (index / self.bottom_plane(), h, w)
    }

    /// Window of a pooled cell clipped to the input.
    fn window(&self, ph: usize, pw: usize) -> Window {
        let clip = |p: usize, stride: usize, pad: usize, size: usize, extent: usize| {
            let start = (p * stride) as i64 - pad as i64;
            let end = (start + size as i64).min(extent as i64);
            (start.max(0) as usize, end.max(0) as usize)
        };
        Window {
            h: clip(ph, self.stride_h, self.pad_h, self.kernel_h, self.height),
            w: clip(pw, self.stride_w, self.pad_w, self.kernel_w, self.width),
        }
    }

    /// Pooled rows and columns whose window covers bottom cell `(h, w)`.
    fn covering(&self, h: usize, w: usize) -> Window {
        let span = |x: usize, pad: usize, size: usize, stride: usize, pooled: usize| {
            let x = x + pad;
            let start = if x < size { 0 } else { (x - size) / stride + 1 };
            (start, (x / stride + 1).min(pooled))
        };
        Window {
            h: span(h, self.pad_h, self.kernel_h, self.stride_h, self.pooled_h),
            w: span(w, self.pad_w, self.kernel_w, self.stride_w, self.pooled_w),
        }
    }

    /// Divisor of average pooling: the full window, padding included.
    fn area<T: Dtype>(&self) -> T {
        T::from_f64((self.kernel_h * self.kernel_w) as f64)
    }
}

fn ensure(condition: bool) -> Result<(), StatusCode> {
    if condition {
        Ok(())
    } else {
        Err(StatusCode::OUT_OF_RESOURCES)
    }
}

/// Maximum and its in-plane offset; `-1` for an empty window.
fn window_max<T: Dtype>(plane: &[T], g: &Geometry, window: Window) -> (T, i32) {
    let mut best = (T::min_value(), -1);
    for (h, w) in window.cells() {
        let offset = h * g.width + w;
        if plane[offset] > best.0 {
            best = (plane[offset], offset as i32);
        }
    }
    best
}

fn max_forward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let g = Geometry::read(k, 2, true)?;
    let items = k.items(k.scalars.extent(0)?);
    ensure(items <= g.top_len())?;
    let bottom = k.inputs.get::<T>(1, g.bottom_len())?;
    let pooled: Vec<(T, i32)> = (0..items)
        .into_par_iter()
        .map(|index| {
            let (plane, ph, pw) = g.split_top(index);
            let start = plane * g.bottom_plane();
            let slice = &bottom[start..start + g.bottom_plane()];
            window_max(slice, &g, g.window(ph, pw))
        })
        .collect();

    let [top, mask, top_mask] = k.outputs.blocks([14, 15, 16])?;
    let top = required(top)?.slice_mut::<T>(items)?;
    for (out, &(value, _)) in top.iter_mut().zip(&pooled) {
        *out = value;
    }
    if let Some(mask) = mask {
        let mask = mask.slice_mut::<i32>(items)?;
        for (out, &(_, index)) in mask.iter_mut().zip(&pooled) {
            *out = index;
        }
    } else if let Some(top_mask) = top_mask {
        let top_mask = top_mask.slice_mut::<T>(items)?;
        for (out, &(_, index)) in top_mask.iter_mut().zip(&pooled) {
            *out = T::from_f64(f64::from(index));
        }
    }
    Ok(())
}

fn ave_forward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let g = Geometry::read(k, 2, true)?;
    let items = k.items(k.scalars.extent(0)?);
    ensure(items <= g.top_len())?;
    let bottom = k.inputs.get::<T>(1, g.bottom_len())?;
    let top = k.outputs.get::<T>(14, items)?;
    let area = g.area::<T>();
    top.par_iter_mut().enumerate().for_each(|(index, out)| {
        let (plane, ph, pw) = g.split_top(index);
        let base = plane * g.bottom_plane();
        let sum = g
            .window(ph, pw)
            .cells()
            .fold(T::zero(), |acc, (h, w)| acc + bottom[base + h * g.width + w]);
        *out = sum / area;
    });
    Ok(())
}

/// Picks the cell where the running sum first reaches `u * total`, recording
/// its absolute bottom index in `rand_idx`.
fn sto_forward_train<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let g = Geometry::read(k, 2, false)?;
    let items = k.items(k.scalars.extent(0)?);
    ensure(items <= g.top_len())?;
    let bottom = k.inputs.get::<T>(1, g.bottom_len())?;
    let [rand_idx, top] = k.outputs.blocks([12, 13])?;
    let rand_idx = required(rand_idx)?.slice_mut::<T>(items)?;
    let top = required(top)?.slice_mut::<T>(items)?;
    rand_idx
        .par_iter_mut()
        .zip(top.par_iter_mut())
        .enumerate()
        .for_each(|(index, (draw, out))| {
            let (plane, ph, pw) = g.split_top(index);
            let base = plane * g.bottom_plane();
            let window = g.window(ph, pw);
            let total = window
                .cells()
                .fold(T::zero(), |acc, (h, w)| acc + bottom[base + h * g.width + w]);
            let threshold = *draw * total;
            let mut running = T::zero();
            for (h, w) in window.cells() {
                let at = base + h * g.width + w;
                running = running + bottom[at];
                if running >= threshold {
                    *draw = T::from_f64(at as f64);
                    *out = bottom[at];
                    return;
                }
            }
        });
    Ok(())
}

/// Expected value under the value-weighted distribution: `sum(x^2) / sum(x)`.
fn sto_forward_test<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let g = Geometry::read(k, 2, false)?;
    let items = k.items(k.scalars.extent(0)?);
    ensure(items <= g.top_len())?;
    let bottom = k.inputs.get::<T>(1, g.bottom_len())?;
    let top = k.outputs.get::<T>(12, items)?;
    top.par_iter_mut().enumerate().for_each(|(index, out)| {
        let (plane, ph, pw) = g.split_top(index);
        let base = plane * g.bottom_plane();
        let (sum, squares) = g.window(ph, pw).cells().fold(
            (T::log_floor(), T::zero()),
            |(sum, squares), (h, w)| {
                let x = bottom[base + h * g.width + w];
                (sum + x, squares + x * x)
            },
        );
        *out = squares / sum;
    });
    Ok(())
}

/// Routes each pooled gradient to the bottom cell its mask recorded.
fn max_backward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let g = Geometry::read(k, 4, true)?;
    let items = k.items(k.scalars.extent(0)?);
    ensure(items <= g.bottom_len())?;
    let top_diff = k.inputs.get::<T>(1, g.top_len())?;
    let mask = if k.scalars.is_null(2)? {
        None
    } else {
        Some(k.inputs.get::<i32>(2, g.top_len())?)
    };
    let top_mask = if k.scalars.is_null(3)? {
        None
    } else {
        Some(k.inputs.get::<T>(3, g.top_len())?)
    };
    let recorded: Box<dyn Fn(usize) -> i64 + Sync + '_> = match (mask, top_mask) {
        (Some(mask), _) => Box::new(move |i| i64::from(mask[i])),
        (None, Some(top_mask)) => Box::new(move |i| top_mask[i].into_f64() as i64),
        (None, None) => return Err(StatusCode::INVALID_MEM_OBJECT),
    };
    let bottom_diff = k.outputs.get::<T>(16, items)?;
    bottom_diff
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, out)| {
            let (plane, h, w) = g.split_bottom(index);
            let base = plane * g.top_plane();
            let target = (h * g.width + w) as i64;
            *out = g
                .covering(h, w)
                .cells()
                .map(|(ph, pw)| base + ph * g.pooled_w + pw)
                .filter(|&at| recorded(at) == target)
                .fold(T::zero(), |acc, at| acc + top_diff[at]);
        });
    Ok(())
}

fn ave_backward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let g = Geometry::read(k, 2, true)?;
    average_gather::<T>(k, g, 1, 14)
}

fn average_gather<T: Dtype>(
    k: &mut Launch,
    g: Geometry,
    top_diff_slot: usize,
    bottom_diff_slot: usize,
) -> Result<(), StatusCode> {
    let items = k.items(k.scalars.extent(0)?);
    ensure(items <= g.bottom_len())?;
    let top_diff = k.inputs.get::<T>(top_diff_slot, g.top_len())?;
    let bottom_diff = k.outputs.get::<T>(bottom_diff_slot, items)?;
    let area = g.area::<T>();
    bottom_diff
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, out)| {
            let (plane, h, w) = g.split_bottom(index);
            let base = plane * g.top_plane();
            let sum = g
                .covering(h, w)
                .cells()
                .fold(T::zero(), |acc, (ph, pw)| acc + top_diff[base + ph * g.pooled_w + pw]);
            *out = sum / area;
        });
    Ok(())
}

fn sto_backward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let g = Geometry::read(k, 3, false)?;
    let items = k.items(k.scalars.extent(0)?);
    ensure(items <= g.bottom_len())?;
    let rand_idx = k.inputs.get::<T>(1, g.top_len())?;
    let top_diff = k.inputs.get::<T>(2, g.top_len())?;
    let bottom_diff = k.outputs.get::<T>(13, items)?;
    bottom_diff
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, out)| {
            let (plane, h, w) = g.split_bottom(index);
            let base = plane * g.top_plane();
            *out = g
                .covering(h, w)
                .cells()
                .map(|(ph, pw)| base + ph * g.pooled_w + pw)
                .filter(|&at| rand_idx[at].into_f64() as usize == index)
                .fold(T::zero(), |acc, at| acc + top_diff[at]);
        });
    Ok(())
}

fn legacy_max_forward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let g = Geometry::read_square(k, 2, false)?;
    let items = k.items(k.scalars.extent(0)?);
    ensure(items <= g.top_len())?;
    let bottom = k.inputs.get::<T>(1, g.bottom_len())?;
    let top = k.outputs.get::<T>(10, items)?;
    top.par_iter_mut().enumerate().for_each(|(index, out)| {
        let (plane, ph, pw) = g.split_top(index);
        let start = plane * g.bottom_plane();
        let slice = &bottom[start..start + g.bottom_plane()];
        *out = window_max(slice, &g, g.window(ph, pw)).0;
    });
    Ok(())
}

fn legacy_ave_forward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let g = Geometry::read_square(k, 2, true)?;
    let items = k.items(k.scalars.extent(0)?);
    ensure(items <= g.top_len())?;
    let bottom = k.inputs.get::<T>(1, g.bottom_len())?;
    let top = k.outputs.get::<T>(11, items)?;
    let area = g.area::<T>();
    top.par_iter_mut().enumerate().for_each(|(index, out)| {
        let (plane, ph, pw) = g.split_top(index);
        let base = plane * g.bottom_plane();
        let sum = g
            .window(ph, pw)
            .cells()
            .fold(T::zero(), |acc, (h, w)| acc + bottom[base + h * g.width + w]);
        *out = sum / area;
    });
    Ok(())
}

/// Gradient flows to every bottom cell equal to its window's maximum.
fn legacy_max_backward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let g = Geometry::read_square(k, 4, false)?;
    let items = k.items(k.scalars.extent(0)?);
    ensure(items <= g.bottom_len())?;
    let bottom_data = k.inputs.get::<T>(1, g.bottom_len())?;
    let top_data = k.inputs.get::<T>(2, g.top_len())?;
    let top_diff = k.inputs.get::<T>(3, g.top_len())?;
    let bottom_diff = k.outputs.get::<T>(12, items)?;
    bottom_diff
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, out)| {
            let (plane, h, w) = g.split_bottom(index);
            let base = plane * g.top_plane();
            *out = g
                .covering(h, w)
                .cells()
                .map(|(ph, pw)| base + ph * g.pooled_w + pw)
                .filter(|&at| bottom_data[index] == top_data[at])
                .fold(T::zero(), |acc, at| acc + top_diff[at]);
        });
    Ok(())
}

fn legacy_ave_backward<T: Dtype>(k: &mut Launch) -> Result<(), StatusCode> {
    let g = Geometry::read_square(k, 2, true)?;
    average_gather::<T>(k, g, 1, 11)
}
