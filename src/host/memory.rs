//! Buffer storage for the host device.

use crate::error::StatusCode;
use bytemuck::Pod;

/// A byte buffer backed by `u64` words so typed views are always aligned.
#[derive(Debug, Clone, Default)]
pub(crate) struct Block {
    words: Vec<u64>,
    len: usize,
}

impl Block {
    pub(crate) fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(8)],
            len,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }

    /// The first `need` elements, or `OUT_OF_RESOURCES` if the buffer is
    /// shorter.
    pub(crate) fn slice<T: Pod>(&self, need: usize) -> Result<&[T], StatusCode> {
        let all: &[T] =
            bytemuck::try_cast_slice(&self.words).map_err(|_| StatusCode::OUT_OF_RESOURCES)?;
        let available = self.len / core::mem::size_of::<T>();
        if need > available {
            return Err(StatusCode::OUT_OF_RESOURCES);
        }
        Ok(&all[..need])
    }

    pub(crate) fn slice_mut<T: Pod>(&mut self, need: usize) -> Result<&mut [T], StatusCode> {
        let available = self.len / core::mem::size_of::<T>();
        if need > available {
            return Err(StatusCode::OUT_OF_RESOURCES);
        }
        let all: &mut [T] = bytemuck::try_cast_slice_mut(&mut self.words)
            .map_err(|_| StatusCode::OUT_OF_RESOURCES)?;
        Ok(&mut all[..need])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_views_respect_byte_length() {
        let mut block = Block::zeroed(12);
        block.slice_mut::<f32>(3).unwrap().copy_from_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(block.slice::<f32>(3).unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(block.slice::<f32>(4), Err(StatusCode::OUT_OF_RESOURCES));
        assert_eq!(block.slice::<f64>(1).unwrap().len(), 1);
        assert_eq!(block.slice::<f64>(2), Err(StatusCode::OUT_OF_RESOURCES));
    }
}
