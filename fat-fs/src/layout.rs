//! Layout of FileSystem Structure
use core::{fmt::{Debug, Formatter, Result as FmtResult}, mem::size_of};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{BLOCK_BITS, BLOCK_SZ, FS_MAGIC, MAX_FILES, MAX_FILE_BLOCKS, NAME_LENGTH_LIMIT};

/// Blocks needed to hold `bytes` bytes
pub fn blocks_for(bytes: usize) -> usize {
  bytes.div_ceil(BLOCK_SZ)
}

/// Super block of a filesystem, always block 0
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SuperBlock {
  magic: u32,
  pub total_blocks: u32,
  pub bitmap_blocks: u16,
  pub bitmap_start: u16,
  pub fat_blocks: u16,
  pub fat_start: u16,
  pub dir_blocks: u16,
  pub dir_start: u16,
}

impl Debug for SuperBlock {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.debug_struct("SuperBlock")
      .field("total_blocks", &self.total_blocks)
      .field("bitmap", &(self.bitmap_start, self.bitmap_blocks))
      .field("fat", &(self.fat_start, self.fat_blocks))
      .field("dir", &(self.dir_start, self.dir_blocks))
      .finish()
  }
}

impl SuperBlock {
  /// Lay the metadata regions out back to back after the super block
  pub fn new(total_blocks: usize) -> Self {
    let bitmap_blocks = total_blocks.div_ceil(BLOCK_BITS);
    let fat_blocks = blocks_for(MAX_FILES * size_of::<FatRecord>());
    let dir_blocks = blocks_for(MAX_FILES * size_of::<DirEntry>());
    let bitmap_start = 1;
    let fat_start = bitmap_start + bitmap_blocks;
    let dir_start = fat_start + fat_blocks;
    Self {
      magic: FS_MAGIC,
      total_blocks: total_blocks as u32,
      bitmap_blocks: bitmap_blocks as u16,
      bitmap_start: bitmap_start as u16,
      fat_blocks: fat_blocks as u16,
      fat_start: fat_start as u16,
      dir_blocks: dir_blocks as u16,
      dir_start: dir_start as u16,
    }
  }

  /// Blocks taken by the super block and the metadata regions
  pub fn metadata_blocks(&self) -> usize {
    self.dir_start as usize + self.dir_blocks as usize
  }

  /// Magic matches and every region fits inside a device of `num_blocks` blocks
  pub fn is_valid(&self, num_blocks: usize) -> bool {
    let total = self.total_blocks as usize;
    self.magic == FS_MAGIC
      && total <= num_blocks
      && self.bitmap_start == 1
      && self.bitmap_blocks as usize * BLOCK_BITS >= total
      && self.fat_start == self.bitmap_start + self.bitmap_blocks
      && self.fat_blocks as usize * BLOCK_SZ >= MAX_FILES * size_of::<FatRecord>()
      && self.dir_start == self.fat_start + self.fat_blocks
      && self.dir_blocks as usize * BLOCK_SZ >= MAX_FILES * size_of::<DirEntry>()
      && self.metadata_blocks() < total
  }
}

/// Kind tag of a FAT record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum FileType {
  Unused = 0,
  Regular = 1,
}

/// Handle of a FAT record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FatId(pub u16);

impl FatId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

/// Allocation record of one file: its size and the blocks holding its bytes
#[repr(C)]
#[derive(Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FatRecord {
  file_type: u16,
  /// directory slot that owns this record
  pub dir_slot: u16,
  size: u32,
  block_count: u16,
  _pad: u16,
  blocks: [u16; MAX_FILE_BLOCKS],
}

impl FatRecord {
  pub fn empty() -> Self {
    Self {
      file_type: FileType::Unused as u16,
      dir_slot: 0,
      size: 0,
      block_count: 0,
      _pad: 0,
      blocks: [0; MAX_FILE_BLOCKS],
    }
  }

  pub fn initialize(&mut self, type_: FileType, dir_slot: usize) {
    *self = Self::empty();
    self.file_type = type_ as u16;
    self.dir_slot = dir_slot as u16;
  }

  pub fn file_type(&self) -> FileType {
    match self.file_type {
      1 => FileType::Regular,
      _ => FileType::Unused,
    }
  }

  pub fn size(&self) -> usize {
    self.size as usize
  }

  pub fn set_size(&mut self, size: usize) {
    self.size = size as u32;
  }

  pub fn block_count(&self) -> usize {
    self.block_count as usize
  }

  /// Blocks the file owns, in file order
  pub fn blocks(&self) -> &[u16] {
    &self.blocks[..self.block_count().min(MAX_FILE_BLOCKS)]
  }

  /// device block holding the `inner_id`-th block of the file
  pub fn block_id(&self, inner_id: usize) -> Option<usize> {
    self.blocks().get(inner_id).map(|id| *id as usize)
  }

  /// Append a block to the end of the list, false when the list is full
  pub fn push_block(&mut self, block_id: usize) -> bool {
    let count = self.block_count();
    if count == MAX_FILE_BLOCKS {
      return false;
    }
    self.blocks[count] = block_id as u16;
    self.block_count += 1;
    true
  }

  /// Drop the last block of the list and return it
  pub fn pop_block(&mut self) -> Option<usize> {
    let count = self.block_count();
    if count == 0 {
      return None;
    }
    self.block_count -= 1;
    let id = core::mem::take(&mut self.blocks[count - 1]);
    Some(id as usize)
  }

  /// (index into the block list, offset inside that block) for byte `offset`
  pub fn locate(offset: usize) -> (usize, usize) {
    (offset / BLOCK_SZ, offset % BLOCK_SZ)
  }

  /// blocks to allocate so that the list can hold `new_size` bytes
  pub fn blocks_num_needed(&self, new_size: usize) -> usize {
    blocks_for(new_size).saturating_sub(self.block_count())
  }
}

/// Named binding from a file name to a FAT record
#[repr(C)]
#[derive(Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct DirEntry {
  occupied: u8,
  name: [u8; NAME_LENGTH_LIMIT],
  fat: u16,
  _pad: u16,
  /// number of open descriptors
  pub ref_count: u32,
}

impl DirEntry {
  pub fn empty() -> Self {
    Self {
      occupied: 0,
      name: [0; NAME_LENGTH_LIMIT],
      fat: 0,
      _pad: 0,
      ref_count: 0,
    }
  }

  /// an occupied entry called `name` bound to `fat`.
  /// `name` must already be checked against `NAME_LENGTH_LIMIT`.
  pub fn new(name: &str, fat: FatId) -> Self {
    let mut bytes = [0u8; NAME_LENGTH_LIMIT];
    bytes[..name.len()].copy_from_slice(name.as_bytes());
    Self {
      occupied: 1,
      name: bytes,
      fat: fat.0,
      _pad: 0,
      ref_count: 0,
    }
  }

  pub fn is_occupied(&self) -> bool {
    self.occupied != 0
  }

  /// Get name of the entry
  pub fn name(&self) -> &str {
    let len = self.name.iter().position(|b| *b == 0).unwrap_or(NAME_LENGTH_LIMIT);
    core::str::from_utf8(&self.name[..len]).unwrap_or("")
  }

  /// FAT record this entry is bound to
  pub fn fat(&self) -> FatId {
    FatId(self.fat)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::DISK_BLOCKS;

  #[test]
  fn default_layout() {
    let sb = SuperBlock::new(DISK_BLOCKS);
    assert_eq!(size_of::<FatRecord>(), 1036);
    assert_eq!(size_of::<DirEntry>(), 24);
    assert_eq!((sb.bitmap_start, sb.bitmap_blocks), (1, 1));
    assert_eq!((sb.fat_start, sb.fat_blocks), (2, 17));
    assert_eq!((sb.dir_start, sb.dir_blocks), (19, 1));
    assert_eq!(sb.metadata_blocks(), 20);
    assert!(sb.is_valid(DISK_BLOCKS));
    assert!(!sb.is_valid(DISK_BLOCKS - 1));
  }

  #[test]
  fn locate_on_block_boundaries() {
    assert_eq!(FatRecord::locate(0), (0, 0));
    assert_eq!(FatRecord::locate(BLOCK_SZ - 1), (0, BLOCK_SZ - 1));
    assert_eq!(FatRecord::locate(BLOCK_SZ), (1, 0));
    assert_eq!(FatRecord::locate(2 * BLOCK_SZ + 7), (2, 7));
  }

  #[test]
  fn block_list_grows_and_shrinks() {
    let mut rec = FatRecord::empty();
    assert_eq!(rec.blocks_num_needed(BLOCK_SZ + 1), 2);
    assert!(rec.push_block(40));
    assert!(rec.push_block(41));
    assert_eq!(rec.blocks_num_needed(BLOCK_SZ + 1), 0);
    assert_eq!(rec.block_id(1), Some(41));
    assert_eq!(rec.pop_block(), Some(41));
    assert_eq!(rec.blocks(), &[40]);
  }

  #[test]
  fn dir_entry_name() {
    let entry = DirEntry::new("fifteen-chars15", FatId(3));
    assert_eq!(entry.name(), "fifteen-chars15");
    assert_eq!(entry.fat(), FatId(3));
    assert!(entry.is_occupied());
    assert!(!DirEntry::empty().is_occupied());
  }
}
