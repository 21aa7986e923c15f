//! Bernoulli mask generation.
//!
//! The mask kernel runs a counter-based generator: every call takes the next
//! value of the dispatcher's [`RandomCounter`](crate::context::RandomCounter)
//! and splats it into the four counter words, so consecutive calls produce
//! different masks while a dispatcher built with
//! [`Dispatcher::with_counter_start`] replays the same sequence.
//!
//! The kernel does not depend on the element precision and is resolved by
//! its untagged name, so `f32` and `f64` callers share one compiled kernel.

use crate::context::Dispatcher;
use crate::device::DeviceBuffer;
use crate::error::{DispatchError, Result};
use crate::precision::{Dtype, Precision};

/// Rounds of the Threefry generator.
pub const BERNOULLI_ROUNDS: u32 = 20;

/// Fills `mask` (`n` 32-bit ints) with `1` where a uniform draw from
/// `[inf, sup)` exceeds `threshold`, `0` elsewhere.
///
/// Each work-item writes four elements, so `n` must be a multiple of 4.
/// The bounds are passed to the device as `f32` whatever `T` is.
pub fn bernoulli<T: Dtype>(
    ctx: &Dispatcher,
    mask: &DeviceBuffer,
    n: usize,
    inf: T,
    sup: T,
    threshold: T,
) -> Result<()> {
    if n % 4 != 0 {
        let err = DispatchError::precondition("bernoulli", format!("count {n} is not a multiple of 4"));
        log::error!("{err}");
        return Err(err);
    }
    let quads = u32::try_from(n / 4)
        .map_err(|_| DispatchError::precondition("bernoulli", format!("count {n} exceeds u32")))?;
    let kernel = ctx.resolve("RNGBernoulli", Precision::Untagged)?;

    let ctr = ctx.counter().advance();
    log::trace!("bernoulli counter {ctr}");
    ctx.bind(&kernel)
        .buffer(mask)
        .counter([ctr; 4])
        .single(inf.into_f64() as f32)
        .single(sup.into_f64() as f32)
        .single(threshold.into_f64() as f32)
        .uint(BERNOULLI_ROUNDS)
        .uint(quads)
        .finish()?
        .enqueue(&ctx.linear(quads as usize))
}
