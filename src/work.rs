//! Work sizes and the policy that derives them.
//!
//! One-dimensional launches use a fixed local size (256 unless configured)
//! and a global size equal to the problem extent; the device pads the
//! trailing group. The direct-convolution path instead plans a 3-D launch
//! from a small set of static decision tables.

use crate::error::{DispatchError, Result};

/// Local size used when nothing overrides it.
pub const DEFAULT_LOCAL_SIZE: usize = 256;

/// Global and local work sizes along 1 to 3 dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkSize {
    dims: u32,
    global: [usize; 3],
    local: [usize; 3],
}

impl WorkSize {
    /// A one-dimensional launch.
    pub const fn linear(global: usize, local: usize) -> Self {
        Self {
            dims: 1,
            global: [global, 1, 1],
            local: [local, 1, 1],
        }
    }

    /// A launch over `global.len()` dimensions.
    ///
    /// Fails unless both slices have the same length between 1 and 3.
    pub fn new(global: &[usize], local: &[usize]) -> Result<Self> {
        let dims = global.len();
        if !(1..=3).contains(&dims) || local.len() != dims {
            return Err(DispatchError::precondition(
                "work size",
                format!("{dims}-d global with {}-d local", local.len()),
            ));
        }
        let mut size = Self {
            dims: dims as u32,
            global: [1; 3],
            local: [1; 3],
        };
        size.global[..dims].copy_from_slice(global);
        size.local[..dims].copy_from_slice(local);
        Ok(size)
    }

    pub const fn dims(&self) -> u32 {
        self.dims
    }

    pub fn global(&self) -> &[usize] {
        &self.global[..self.dims as usize]
    }

    pub fn local(&self) -> &[usize] {
        &self.local[..self.dims as usize]
    }

    /// Global sizes rounded up to whole work-groups.
    pub fn padded_global(&self) -> [usize; 3] {
        let mut padded = [1; 3];
        for axis in 0..self.dims as usize {
            let local = self.local[axis].max(1);
            padded[axis] = self.global[axis].div_ceil(local) * local;
        }
        padded
    }

    /// Number of work-items in one group.
    pub fn group_items(&self) -> usize {
        self.local().iter().product()
    }

    /// Number of work-items launched once the trailing groups are padded.
    pub fn total_items(&self) -> usize {
        self.padded_global().iter().product()
    }
}

/// Default one-dimensional policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearPolicy {
    local_size: usize,
}

impl LinearPolicy {
    pub const fn new(local_size: usize) -> Self {
        Self { local_size }
    }

    /// Global size equals the problem extent.
    pub const fn size(&self, extent: usize) -> WorkSize {
        WorkSize::linear(extent, self.local_size)
    }
}

impl Default for LinearPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_SIZE)
    }
}

/// Output geometry driving the direct-convolution tiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvShape {
    pub channel_out: usize,
    pub width_out: usize,
    pub height_out: usize,
    pub kernel_w: usize,
    pub batch: usize,
}

/// One row of a tiling decision table. The first matching row wins.
#[derive(Debug, Clone, Copy)]
pub struct TileRule {
    /// Describes the predicate for logs and tests.
    pub when: &'static str,
    pub applies: fn(&ConvShape, usize) -> bool,
    pub factor: usize,
}

impl TileRule {
    fn pick(table: &[TileRule], shape: &ConvShape, tile: usize, fallback: usize) -> usize {
        table
            .iter()
            .find(|rule| (rule.applies)(shape, tile))
            .map_or(fallback, |rule| rule.factor)
    }
}

/// Output pixels per work-item along x.
pub const HORIZONTAL_PIXELS: &[TileRule] = &[
    TileRule {
        when: "width_out < 2 * tile",
        applies: |s, tile| s.width_out < 2 * tile,
        factor: 1,
    },
    TileRule {
        when: "width_out < 4 * tile",
        applies: |s, tile| s.width_out < 4 * tile,
        factor: 2,
    },
];
const HORIZONTAL_FALLBACK: usize = 4;

/// Output pixels per work-item along y.
pub const VERTICAL_PIXELS: &[TileRule] = &[TileRule {
    when: "height_out < 2 * tile",
    applies: |s, tile| s.height_out < 2 * tile,
    factor: 1,
}];
const VERTICAL_FALLBACK: usize = 2;

/// Output channels computed per work-item.
pub const OUTPUT_PACKING: &[TileRule] = &[
    TileRule {
        when: "channel_out is odd",
        applies: |s, _| s.channel_out % 2 == 1,
        factor: 1,
    },
    TileRule {
        when: "kernel_w == 3 and channel_out % 4 == 0",
        applies: |s, _| s.kernel_w == 3 && s.channel_out % 4 == 0,
        factor: 4,
    },
];
const OUTPUT_PACKING_FALLBACK: usize = 2;

/// Launch plan of the direct-convolution kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvTiling {
    /// Group edge length in work-items (both axes).
    pub tile: usize,
    pub pix_horiz: usize,
    pub pix_vert: usize,
    pub outs_per_item: usize,
    /// Channel groups per image, `channel_out / outs_per_item`.
    pub n_outputs: usize,
    pub groups_horiz: usize,
    pub groups_vert: usize,
    pub batch: usize,
}

impl ConvTiling {
    /// Picks the tiling from the decision tables.
    pub fn plan(shape: &ConvShape, tile: usize) -> Self {
        let pix_horiz = TileRule::pick(HORIZONTAL_PIXELS, shape, tile, HORIZONTAL_FALLBACK);
        let pix_vert = TileRule::pick(VERTICAL_PIXELS, shape, tile, VERTICAL_FALLBACK);
        let outs_per_item = TileRule::pick(OUTPUT_PACKING, shape, tile, OUTPUT_PACKING_FALLBACK);
        Self {
            tile,
            pix_horiz,
            pix_vert,
            outs_per_item,
            n_outputs: shape.channel_out / outs_per_item,
            groups_horiz: shape.width_out.div_ceil(tile * pix_horiz),
            groups_vert: shape.height_out.div_ceil(tile * pix_vert),
            batch: shape.batch,
        }
    }

    /// `global = [gh * tile, gv * tile, batch * n_outputs]`, `local = [tile, tile, 1]`.
    pub fn work_size(&self) -> WorkSize {
        WorkSize {
            dims: 3,
            global: [
                self.groups_horiz * self.tile,
                self.groups_vert * self.tile,
                self.batch * self.n_outputs,
            ],
            local: [self.tile, self.tile, 1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_pads_trailing_group() {
        let size = LinearPolicy::default().size(1000);
        assert_eq!(size.global(), &[1000]);
        assert_eq!(size.local(), &[256]);
        assert_eq!(size.total_items(), 1024);
    }

    #[test]
    fn multi_dim_requires_matching_ranks() {
        assert!(WorkSize::new(&[16, 16], &[8]).is_err());
        assert!(WorkSize::new(&[], &[]).is_err());
        let size = WorkSize::new(&[16, 24, 2], &[8, 8, 1]).unwrap();
        assert_eq!(size.dims(), 3);
        assert_eq!(size.group_items(), 64);
    }
}
