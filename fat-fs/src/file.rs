//! Byte level file I/O: read, write, seek and truncate through descriptors

use core::cmp::{max, min};

use alloc::{vec, vec::Vec};
use log::{trace, warn};

use crate::{
  config::{BLOCK_SZ, MAX_FILE_SIZE},
  error::{FsError, Resource, Result},
  fs::FileSystem,
  layout::{blocks_for, FatId, FatRecord},
};

impl FileSystem {
  /// Read from the cursor of `fd` into `buf`, never past the end of the file.
  /// Returns the number of bytes read, 0 at end of file.
  pub fn read(&mut self, fd: usize, buf: &mut [u8]) -> Result<usize> {
    let desc = *self.descriptor(fd)?;
    let record = self.fat(FatId(desc.fat));
    let (mut block_idx, mut inner) = FatRecord::locate(desc.offset);
    if block_idx > record.block_count() {
      return Err(FsError::Corrupted);
    }
    // [start, end)
    let mut start = desc.offset;
    let end = min(record.size(), start + buf.len());
    if start >= end {
      return Ok(0);
    }

    let mut block = [0u8; BLOCK_SZ];
    let mut read_size = 0usize;
    while start < end {
      let block_id = record.block_id(block_idx).ok_or(FsError::Corrupted)?;
      let cur_block_end = min(end, (block_idx + 1) * BLOCK_SZ);
      let block_read_size = cur_block_end - start;
      self.block_dev.read_block(block_id, &mut block)?;
      buf[read_size..read_size + block_read_size]
        .copy_from_slice(&block[inner..inner + block_read_size]);
      read_size += block_read_size;
      start += block_read_size;
      block_idx += 1;
      inner = 0;
    }
    self.descriptor_mut(fd)?.offset = start;
    Ok(read_size)
  }

  /// Read at most `max_bytes` into a new buffer
  pub fn read_to_vec(&mut self, fd: usize, max_bytes: usize) -> Result<Vec<u8>> {
    let size = self.file_size(fd)?;
    let mut buf = vec![0u8; min(max_bytes, size)];
    let len = self.read(fd, &mut buf)?;
    buf.truncate(len);
    Ok(buf)
  }

  /// Write `buf` at the cursor of `fd`, growing the file as needed.
  ///
  /// The write is cut short at `MAX_FILE_SIZE`, and when the disk runs out of
  /// blocks only the part that fits is written. Fails with `DiskSpace` if
  /// nothing at all fits.
  pub fn write(&mut self, fd: usize, buf: &[u8]) -> Result<usize> {
    let desc = *self.descriptor(fd)?;
    let fat = FatId(desc.fat);
    let start = desc.offset;
    let requested = min(buf.len(), MAX_FILE_SIZE.saturating_sub(start));
    if requested == 0 {
      return Ok(0);
    }

    let needed = self.fat(fat).blocks_num_needed(start + requested);
    for _ in 0..needed {
      let Some(block_id) = self.alloc_data() else {
        break;
      };
      if !self.fat_mut(fat).push_block(block_id) {
        self.dealloc_data(block_id);
        break;
      }
    }
    let end = min(start + requested, self.fat(fat).block_count() * BLOCK_SZ);
    if end <= start {
      return Err(FsError::CapacityExceeded(Resource::DiskSpace));
    }
    if end < start + requested {
      warn!("disk full, short write of {} of {} bytes", end - start, requested);
    }

    let mut written = 0usize;
    let copied = self.write_range(fat, start, &buf[..end - start], &mut written);

    // keep what reached the disk, give back blocks nothing was written to
    let record = self.fat_mut(fat);
    let new_size = max(record.size(), start + written);
    record.set_size(new_size);
    self.shrink_blocks(fat, blocks_for(new_size));
    self.descriptor_mut(fd)?.offset = start + written;
    copied?;
    trace!("fd {} wrote {} bytes at {}", fd, written, start);
    Ok(written)
  }

  /// Read-modify-write every block touched by `[start, start + data.len())`
  fn write_range(&self, fat: FatId, start: usize, data: &[u8], written: &mut usize) -> Result<()> {
    let record = self.fat(fat);
    let end = start + data.len();
    let mut pos = start;
    let mut block = [0u8; BLOCK_SZ];
    while pos < end {
      let (block_idx, inner) = FatRecord::locate(pos);
      let block_id = record.block_id(block_idx).ok_or(FsError::Corrupted)?;
      let len = min(end, (block_idx + 1) * BLOCK_SZ) - pos;
      self.block_dev.read_block(block_id, &mut block)?;
      block[inner..inner + len].copy_from_slice(&data[*written..*written + len]);
      self.block_dev.write_block(block_id, &block)?;
      pos += len;
      *written += len;
    }
    Ok(())
  }

  /// Free trailing blocks until the file holds `keep` blocks
  fn shrink_blocks(&mut self, fat: FatId, keep: usize) {
    while self.fat(fat).block_count() > keep {
      if let Some(block_id) = self.fat_mut(fat).pop_block() {
        self.dealloc_data(block_id);
      }
    }
  }

  /// Move the cursor of `fd` to `offset`, which may not pass the end of file
  pub fn seek(&mut self, fd: usize, offset: i64) -> Result<()> {
    let size = self.file_size(fd)?;
    let offset = usize::try_from(offset).map_err(|_| FsError::InvalidArgument)?;
    if offset > size {
      return Err(FsError::InvalidArgument);
    }
    self.descriptor_mut(fd)?.offset = offset;
    Ok(())
  }

  /// Cut the file behind `fd` down to `length` bytes. Files never grow here.
  pub fn truncate(&mut self, fd: usize, length: i64) -> Result<()> {
    let fat = FatId(self.descriptor(fd)?.fat);
    let length = usize::try_from(length).map_err(|_| FsError::InvalidArgument)?;
    if length > self.capacity() {
      return Err(FsError::CapacityExceeded(Resource::FileSize));
    }
    if length > self.fat(fat).size() {
      return Err(FsError::InvalidArgument);
    }

    self.shrink_blocks(fat, blocks_for(length));
    self.fat_mut(fat).set_size(length);
    self.fd_table
      .iter_mut()
      .filter(|desc| desc.occupied && desc.fat == fat.0)
      .for_each(|desc| desc.offset = min(desc.offset, length));
    trace!("fd {} truncated to {}", fd, length);
    Ok(())
  }
}
