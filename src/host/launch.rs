//! The argument view a host kernel runs against.

use super::memory::Block;
use crate::device::KernelArg;
use crate::error::StatusCode;
use crate::precision::Dtype;
use crate::work::WorkSize;
use bytemuck::Pod;

type Status<T> = Result<T, StatusCode>;

/// Bound scalar arguments, indexed by slot.
pub(crate) struct Scalars {
    args: Vec<KernelArg>,
}

impl Scalars {
    fn at(&self, slot: usize) -> Status<&KernelArg> {
        self.args.get(slot).ok_or(StatusCode::INVALID_KERNEL_ARGS)
    }

    pub(crate) fn int(&self, slot: usize) -> Status<i32> {
        match self.at(slot)? {
            KernelArg::Int(v) => Ok(*v),
            _ => Err(StatusCode::INVALID_ARG_SIZE),
        }
    }

    /// A non-negative `int` used as a size or index.
    pub(crate) fn extent(&self, slot: usize) -> Status<usize> {
        usize::try_from(self.int(slot)?).map_err(|_| StatusCode::INVALID_ARG_VALUE)
    }

    pub(crate) fn uint(&self, slot: usize) -> Status<u32> {
        match self.at(slot)? {
            KernelArg::Uint(v) => Ok(*v),
            _ => Err(StatusCode::INVALID_ARG_SIZE),
        }
    }

    pub(crate) fn real<T: Dtype>(&self, slot: usize) -> Status<T> {
        T::from_arg(self.at(slot)?).ok_or(StatusCode::INVALID_ARG_SIZE)
    }

    pub(crate) fn single(&self, slot: usize) -> Status<f32> {
        match self.at(slot)? {
            KernelArg::Float(v) => Ok(*v),
            _ => Err(StatusCode::INVALID_ARG_SIZE),
        }
    }

    pub(crate) fn flag(&self, slot: usize) -> Status<bool> {
        match self.at(slot)? {
            KernelArg::Bool(v) => Ok(*v),
            _ => Err(StatusCode::INVALID_ARG_SIZE),
        }
    }

    /// Whether a nullable buffer slot was bound as null.
    pub(crate) fn is_null(&self, slot: usize) -> Status<bool> {
        match self.at(slot)? {
            KernelArg::NullBuffer => Ok(true),
            KernelArg::Buffer(_) => Ok(false),
            _ => Err(StatusCode::INVALID_MEM_OBJECT),
        }
    }

    pub(crate) fn counter(&self, slot: usize) -> Status<[u32; 4]> {
        match self.at(slot)? {
            KernelArg::Counter(v) => Ok(*v),
            _ => Err(StatusCode::INVALID_ARG_SIZE),
        }
    }
}

/// Snapshots of read-only buffers, taken before the kernel starts.
pub(crate) struct Inputs {
    slots: Vec<Option<Block>>,
}

impl Inputs {
    pub(crate) fn get<T: Pod>(&self, slot: usize, need: usize) -> Status<&[T]> {
        self.slots
            .get(slot)
            .and_then(Option::as_ref)
            .ok_or(StatusCode::INVALID_KERNEL_ARGS)?
            .slice(need)
    }
}

/// Writable buffers, moved out of device memory for the launch.
pub(crate) struct Outputs {
    slots: Vec<Option<(u64, Block)>>,
}

impl Outputs {
    pub(crate) fn get<T: Pod>(&mut self, slot: usize, need: usize) -> Status<&mut [T]> {
        self.slots
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or(StatusCode::INVALID_KERNEL_ARGS)?
            .1
            .slice_mut(need)
    }

    /// Disjoint borrows of several output slots; null slots come back as `None`.
    pub(crate) fn blocks<const N: usize>(
        &mut self,
        slots: [usize; N],
    ) -> Status<[Option<&mut Block>; N]> {
        let picked = self
            .slots
            .get_disjoint_mut(slots)
            .map_err(|_| StatusCode::INVALID_KERNEL_ARGS)?;
        Ok(picked.map(|slot| slot.as_mut().map(|(_, block)| block)))
    }

    pub(crate) fn into_blocks(self) -> impl Iterator<Item = (u64, Block)> {
        self.slots.into_iter().flatten()
    }
}

/// Everything a host kernel sees for one launch.
pub(crate) struct Launch {
    pub(crate) scalars: Scalars,
    pub(crate) inputs: Inputs,
    pub(crate) outputs: Outputs,
    pub(crate) work: WorkSize,
}

impl Launch {
    pub(crate) fn new(
        args: Vec<KernelArg>,
        inputs: Vec<Option<Block>>,
        outputs: Vec<Option<(u64, Block)>>,
        work: WorkSize,
    ) -> Self {
        Self {
            scalars: Scalars { args },
            inputs: Inputs { slots: inputs },
            outputs: Outputs { slots: outputs },
            work,
        }
    }

    /// Work-items of a 1-D launch that fall inside `count`.
    ///
    /// Items beyond the launched range never run.
    pub(crate) fn items(&self, count: usize) -> usize {
        count.min(self.work.total_items())
    }
}

/// Unwraps a slot that must not be null.
pub(crate) fn required(block: Option<&mut Block>) -> Status<&mut Block> {
    block.ok_or(StatusCode::INVALID_MEM_OBJECT)
}
