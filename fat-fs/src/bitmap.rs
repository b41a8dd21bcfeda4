use alloc::{vec, vec::Vec};
use zerocopy::IntoBytes;

use crate::{
  block_dev::BlockDevice,
  config::{BLOCK_BITS, BLOCK_SZ},
  error::Result,
};

/// u64 words held by one bitmap block
const BLOCK_WORDS: usize = BLOCK_SZ / 8;

/// One bit per device block, set while the block is in use.
/// Lives in memory for the whole session and is only written back on demand.
pub struct Bitmap {
  words: Vec<u64>,
  /// number of device blocks tracked
  bits: usize,
}

fn decompose(bit: usize) -> (usize, usize) {
  (bit / 64, bit % 64)
}

impl Bitmap {
  /// An all-free bitmap over `bits` blocks, stored in `blocks` bitmap blocks
  pub fn new(bits: usize, blocks: usize) -> Self {
    debug_assert!(bits <= blocks * BLOCK_BITS);
    Self {
      words: vec![0u64; blocks * BLOCK_WORDS],
      bits,
    }
  }

  /// Load `blocks` bitmap blocks starting at `start_block_id`
  pub fn load(
    block_dev: &dyn BlockDevice,
    start_block_id: usize,
    blocks: usize,
    bits: usize,
  ) -> Result<Self> {
    let mut bitmap = Self::new(bits, blocks);
    for (i, chunk) in bitmap.words.chunks_mut(BLOCK_WORDS).enumerate() {
      block_dev.read_block(start_block_id + i, chunk.as_mut_bytes())?;
    }
    Ok(bitmap)
  }

  /// Write the bitmap back, block by block
  pub fn store(&self, block_dev: &dyn BlockDevice, start_block_id: usize) -> Result<()> {
    for (i, chunk) in self.words.chunks(BLOCK_WORDS).enumerate() {
      block_dev.write_block(start_block_id + i, chunk.as_bytes())?;
    }
    Ok(())
  }

  pub fn is_allocated(&self, bit: usize) -> bool {
    let (pos, inner) = decompose(bit);
    self.words[pos] >> inner & 1 == 1
  }

  pub fn allocate(&mut self, bit: usize) {
    debug_assert!(bit < self.bits);
    let (pos, inner) = decompose(bit);
    self.words[pos] |= 1u64 << inner;
  }

  pub fn free(&mut self, bit: usize) {
    let (pos, inner) = decompose(bit);
    debug_assert!(self.is_allocated(bit), "double free of block {}", bit);
    self.words[pos] &= !(1u64 << inner);
  }

  /// returns the lowest unallocated block index
  pub fn find_free(&self) -> Option<usize> {
    self.words
      .iter()
      .enumerate()
      .find(|(_, word)| **word != u64::MAX)
      .map(|(pos, word)| pos * 64 + word.trailing_ones() as usize)
      .filter(|bit| *bit < self.bits)
  }

  /// Find, mark and return a free block
  pub fn alloc(&mut self) -> Option<usize> {
    let bit = self.find_free()?;
    self.allocate(bit);
    Some(bit)
  }

  /// Number of blocks tracked
  pub fn maximum(&self) -> usize {
    self.bits
  }

  pub fn count_free(&self) -> usize {
    (0..self.bits).filter(|bit| !self.is_allocated(*bit)).count()
  }
}
