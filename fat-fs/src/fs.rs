use core::mem::size_of;

use alloc::{sync::Arc, vec, vec::Vec};
use log::{info, trace, warn};
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::{
  bitmap::Bitmap,
  block_dev::{BlockDevice, DiskStore},
  config::{BLOCK_SZ, MAX_DISK_BLOCKS, MAX_FILES, MAX_FILE_BLOCKS, MAX_FILE_SIZE, MAX_OPEN_FILES},
  error::{FsError, Result},
  layout::{blocks_for, DirEntry, FatId, FatRecord, FileType, SuperBlock},
};

/// Per-open-handle record
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FileDescriptor {
  pub occupied: bool,
  pub fat: u16,
  /// byte cursor, never past the file size
  pub offset: usize,
}

/// A mounted file system.
///
/// All tables live in memory between `mount` and `unmount`; nothing reaches
/// the disk in between except file data blocks.
pub struct FileSystem {
  pub(crate) block_dev: Arc<dyn BlockDevice>,
  pub(crate) super_block: SuperBlock,
  pub(crate) bitmap: Bitmap,
  pub(crate) fat_table: Vec<FatRecord>,
  pub(crate) dir_table: Vec<DirEntry>,
  pub(crate) fd_table: [FileDescriptor; MAX_OPEN_FILES],
}

impl FileSystem {
  /// Create the disk `name` in `store` and write an empty file system onto it
  pub fn format(store: &dyn DiskStore, name: &str) -> Result<()> {
    // refuse unusable geometry before a disk exists
    plan_layout(store.disk_blocks())?;
    store.create_disk(name)?;
    let block_dev = store.open_disk(name)?;
    let total_blocks = block_dev.num_blocks();
    let super_block = match plan_layout(total_blocks) {
      Ok(super_block) => super_block,
      Err(err) => {
        let _ = block_dev.close();
        return Err(err);
      }
    };

    let mut bitmap = Bitmap::new(total_blocks, super_block.bitmap_blocks as usize);
    for block_id in 0..super_block.metadata_blocks() {
      bitmap.allocate(block_id);
    }
    let fat_table = vec![FatRecord::empty(); MAX_FILES];
    let dir_table = vec![DirEntry::empty(); MAX_FILES];

    let written = write_super_block(&*block_dev, &super_block)
      .and_then(|_| bitmap.store(&*block_dev, super_block.bitmap_start as usize))
      .and_then(|_| store_table(&*block_dev, super_block.fat_start as usize, &fat_table))
      .and_then(|_| store_table(&*block_dev, super_block.dir_start as usize, &dir_table));
    if let Err(err) = written {
      let _ = block_dev.close();
      return Err(err);
    }
    block_dev.close()?;
    info!("formatted disk {:?}: {:?}", name, super_block);
    Ok(())
  }

  /// Open the disk `name` and load every table into memory
  pub fn mount(store: &dyn DiskStore, name: &str) -> Result<Self> {
    let block_dev = store.open_disk(name)?;
    match Self::load(block_dev.clone()) {
      Ok(fs) => {
        info!("mounted disk {:?}: {:?}", name, fs.super_block);
        Ok(fs)
      }
      Err(err) => {
        let _ = block_dev.close();
        Err(err)
      }
    }
  }

  fn load(block_dev: Arc<dyn BlockDevice>) -> Result<Self> {
    let mut buf = [0u8; BLOCK_SZ];
    block_dev.read_block(0, &mut buf)?;
    let (super_block, _) = SuperBlock::read_from_prefix(&buf).map_err(|_| FsError::Corrupted)?;
    if !super_block.is_valid(block_dev.num_blocks()) {
      return Err(FsError::Corrupted);
    }
    let bitmap = Bitmap::load(
      &*block_dev,
      super_block.bitmap_start as usize,
      super_block.bitmap_blocks as usize,
      super_block.total_blocks as usize,
    )?;
    let fat_table: Vec<FatRecord> =
      load_table(&*block_dev, super_block.fat_start as usize, super_block.fat_blocks as usize)?;
    let mut dir_table: Vec<DirEntry> =
      load_table(&*block_dev, super_block.dir_start as usize, super_block.dir_blocks as usize)?;
    // no descriptor outlives a session
    dir_table.iter_mut().for_each(|entry| entry.ref_count = 0);
    check_tables(&super_block, &bitmap, &fat_table, &dir_table)?;
    Ok(Self {
      block_dev,
      super_block,
      bitmap,
      fat_table,
      dir_table,
      fd_table: [FileDescriptor::default(); MAX_OPEN_FILES],
    })
  }

  /// Write every table back and close the disk
  pub fn unmount(self) -> Result<()> {
    let open = self.open_count();
    if open > 0 {
      warn!("unmounting with {} descriptors still open", open);
    }
    let sb = &self.super_block;
    let written = write_super_block(&*self.block_dev, sb)
      .and_then(|_| self.bitmap.store(&*self.block_dev, sb.bitmap_start as usize))
      .and_then(|_| store_table(&*self.block_dev, sb.fat_start as usize, &self.fat_table))
      .and_then(|_| store_table(&*self.block_dev, sb.dir_start as usize, &self.dir_table));
    if let Err(err) = written {
      let _ = self.block_dev.close();
      return Err(err);
    }
    self.block_dev.close()?;
    info!("unmounted, {} blocks free", self.free_blocks());
    Ok(())
  }

  /// available data block, marked as used
  pub(crate) fn alloc_data(&mut self) -> Option<usize> {
    let block_id = self.bitmap.alloc()?;
    trace!("alloc block {}", block_id);
    Some(block_id)
  }

  pub(crate) fn dealloc_data(&mut self, block_id: usize) {
    trace!("free block {}", block_id);
    self.bitmap.free(block_id);
  }

  pub(crate) fn fat(&self, fat: FatId) -> &FatRecord {
    &self.fat_table[fat.index()]
  }

  pub(crate) fn fat_mut(&mut self, fat: FatId) -> &mut FatRecord {
    &mut self.fat_table[fat.index()]
  }

  pub fn super_block(&self) -> &SuperBlock {
    &self.super_block
  }

  /// Blocks not allocated to metadata or any file
  pub fn free_blocks(&self) -> usize {
    self.bitmap.count_free()
  }

  /// Blocks allocated to files
  pub fn used_data_blocks(&self) -> usize {
    self.bitmap.maximum() - self.super_block.metadata_blocks() - self.free_blocks()
  }

  pub fn is_block_allocated(&self, block_id: usize) -> bool {
    block_id < self.bitmap.maximum() && self.bitmap.is_allocated(block_id)
  }

  /// Total device capacity in bytes
  pub fn capacity(&self) -> usize {
    self.super_block.total_blocks as usize * BLOCK_SZ
  }
}

/// Layout for a disk of `total_blocks` blocks, if the disk can hold one
fn plan_layout(total_blocks: usize) -> Result<SuperBlock> {
  let super_block = SuperBlock::new(total_blocks);
  if total_blocks > MAX_DISK_BLOCKS || !super_block.is_valid(total_blocks) {
    return Err(FsError::InvalidArgument);
  }
  Ok(super_block)
}

/// Reject tables that would send later operations out of bounds.
///
/// Every FAT record must fit its limits and own exactly the blocks its size
/// needs. Those blocks lie in the data area, are marked in the bitmap and
/// belong to no other record. Occupied directory entries and their FAT
/// records must point at each other, and names must be unique.
fn check_tables(
  super_block: &SuperBlock,
  bitmap: &Bitmap,
  fat_table: &[FatRecord],
  dir_table: &[DirEntry],
) -> Result<()> {
  let total_blocks = super_block.total_blocks as usize;
  let mut owned = Bitmap::new(total_blocks, super_block.bitmap_blocks as usize);
  for record in fat_table {
    let count = record.block_count();
    let size = record.size();
    if count > MAX_FILE_BLOCKS || size > MAX_FILE_SIZE || count != blocks_for(size) {
      return Err(FsError::Corrupted);
    }
    if record.file_type() == FileType::Unused && count != 0 {
      return Err(FsError::Corrupted);
    }
    for block_id in record.blocks().iter().map(|id| *id as usize) {
      let in_data_area = block_id >= super_block.metadata_blocks() && block_id < total_blocks;
      if !in_data_area || !bitmap.is_allocated(block_id) || owned.is_allocated(block_id) {
        return Err(FsError::Corrupted);
      }
      owned.allocate(block_id);
    }
  }

  for (slot, entry) in dir_table.iter().enumerate() {
    if !entry.is_occupied() {
      continue;
    }
    let bound = fat_table
      .get(entry.fat().index())
      .is_some_and(|record| {
        record.file_type() == FileType::Regular && record.dir_slot as usize == slot
      });
    let name = entry.name();
    let duplicate = dir_table[..slot]
      .iter()
      .any(|other| other.is_occupied() && other.name() == name);
    if !bound || name.is_empty() || duplicate {
      return Err(FsError::Corrupted);
    }
  }
  Ok(())
}

fn write_super_block(block_dev: &dyn BlockDevice, super_block: &SuperBlock) -> Result<()> {
  let mut buf = [0u8; BLOCK_SZ];
  buf[..size_of::<SuperBlock>()].copy_from_slice(super_block.as_bytes());
  block_dev.write_block(0, &buf)?;
  Ok(())
}

/// Write a table of records to consecutive blocks from `start_block_id`
fn store_table<T: IntoBytes + Immutable>(
  block_dev: &dyn BlockDevice,
  start_block_id: usize,
  table: &[T],
) -> Result<()> {
  let bytes = table.as_bytes();
  let mut buf = [0u8; BLOCK_SZ];
  for (i, chunk) in bytes.chunks(BLOCK_SZ).enumerate() {
    buf[..chunk.len()].copy_from_slice(chunk);
    buf[chunk.len()..].fill(0);
    block_dev.write_block(start_block_id + i, &buf)?;
  }
  Ok(())
}

/// Read `MAX_FILES` records from `blocks` consecutive blocks
fn load_table<T: FromBytes>(
  block_dev: &dyn BlockDevice,
  start_block_id: usize,
  blocks: usize,
) -> Result<Vec<T>> {
  let mut bytes = vec![0u8; blocks * BLOCK_SZ];
  for (i, chunk) in bytes.chunks_mut(BLOCK_SZ).enumerate() {
    block_dev.read_block(start_block_id + i, chunk)?;
  }
  bytes
    .chunks_exact(size_of::<T>())
    .take(MAX_FILES)
    .map(|record| T::read_from_bytes(record).map_err(|_| FsError::Corrupted))
    .collect()
}
