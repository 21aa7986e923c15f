//! Bernoulli mask generation on the Threefry-4x32 counter-based generator.

use super::{INOUT, KernelDef, Param};
use crate::error::StatusCode;
use crate::host::launch::Launch;
use rayon::prelude::*;

/// The mask kernel takes single-precision bounds whatever the caller's
/// dtype, so it is also registered untagged.
pub(crate) const KERNELS: &[KernelDef] = &[KernelDef {
    op: "RNGBernoulli",
    params: &[
        INOUT,
        Param::Counter,
        Param::Single,
        Param::Single,
        Param::Single,
        Param::Uint,
        Param::Uint,
    ],
    single: bernoulli,
    double: bernoulli,
    untagged: true,
}];

const ROTATIONS: [[u32; 2]; 8] = [
    [10, 26],
    [11, 21],
    [13, 27],
    [23, 5],
    [6, 20],
    [17, 11],
    [25, 10],
    [18, 20],
];
const KEY_PARITY: u32 = 0x1BD1_1BDA;

/// Threefry-4x32 with `rounds` rounds.
pub(crate) fn threefry4x32(counter: [u32; 4], key: [u32; 4], rounds: u32) -> [u32; 4] {
    let ks = [
        key[0],
        key[1],
        key[2],
        key[3],
        KEY_PARITY ^ key[0] ^ key[1] ^ key[2] ^ key[3],
    ];
    let mut x = [
        counter[0].wrapping_add(ks[0]),
        counter[1].wrapping_add(ks[1]),
        counter[2].wrapping_add(ks[2]),
        counter[3].wrapping_add(ks[3]),
    ];
    for round in 0..rounds as usize {
        let [ra, rb] = ROTATIONS[round % 8];
        if round % 2 == 0 {
            x[0] = x[0].wrapping_add(x[1]);
            x[1] = x[1].rotate_left(ra) ^ x[0];
            x[2] = x[2].wrapping_add(x[3]);
            x[3] = x[3].rotate_left(rb) ^ x[2];
        } else {
            x[0] = x[0].wrapping_add(x[3]);
            x[3] = x[3].rotate_left(ra) ^ x[0];
            x[2] = x[2].wrapping_add(x[1]);
            x[1] = x[1].rotate_left(rb) ^ x[2];
        }
        if round % 4 == 3 {
            let s = (round + 1) / 4;
            x[0] = x[0].wrapping_add(ks[s % 5]);
            x[1] = x[1].wrapping_add(ks[(s + 1) % 5]);
            x[2] = x[2].wrapping_add(ks[(s + 2) % 5]);
            x[3] = x[3].wrapping_add(ks[(s + 3) % 5]).wrapping_add(s as u32);
        }
    }
    x
}

/// Maps a 32-bit draw to `[inf, sup)`.
fn uniform(bits: u32, inf: f32, sup: f32) -> f32 {
    const SCALE: f64 = 1.0 / 4_294_967_296.0;
    (f64::from(inf) + f64::from(sup - inf) * f64::from(bits) * SCALE) as f32
}

fn bernoulli(k: &mut Launch) -> Result<(), StatusCode> {
    let counter = k.scalars.counter(1)?;
    let inf = k.scalars.single(2)?;
    let sup = k.scalars.single(3)?;
    let threshold = k.scalars.single(4)?;
    let rounds = k.scalars.uint(5)?;
    let quads = k.items(k.scalars.uint(6)? as usize);
    let mask = k.outputs.get::<i32>(0, quads * 4)?;
    mask.par_chunks_mut(4).enumerate().for_each(|(gid, out)| {
        let draws = threefry4x32(counter, [gid as u32, 0, 0, 0], rounds);
        for (slot, bits) in out.iter_mut().zip(draws) {
            *slot = i32::from(uniform(bits, inf, sup) > threshold);
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_keys_give_distinct_streams() {
        let a = threefry4x32([7; 4], [0, 0, 0, 0], 20);
        let b = threefry4x32([7; 4], [1, 0, 0, 0], 20);
        assert_ne!(a, b);
        assert_eq!(a, threefry4x32([7; 4], [0, 0, 0, 0], 20));
    }

    #[test]
    fn uniform_stays_in_range() {
        assert_eq!(uniform(0, 0.0, 1.0), 0.0);
        assert!(uniform(u32::MAX, 0.0, 1.0) <= 1.0);
        assert!(uniform(u32::MAX / 2, -1.0, 1.0).abs() < 1e-3);
    }
}
