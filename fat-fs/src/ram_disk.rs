//! In-memory block devices

use alloc::{boxed::Box, collections::{BTreeMap, BTreeSet}, string::{String, ToString}, sync::Arc};
use spin::Mutex;

use crate::{
  block_dev::{BlockDevice, DiskStore},
  config::{BLOCK_SZ, DISK_BLOCKS},
  error::DeviceError,
};

struct RamDiskInner {
  /// blocks that were written at least once
  blocks: BTreeMap<usize, Box<[u8; BLOCK_SZ]>>,
  opened: bool,
  faulty: BTreeSet<usize>,
}

/// A disk held in memory. Untouched blocks read as zeros.
pub struct RamDisk {
  num_blocks: usize,
  inner: Mutex<RamDiskInner>,
}

impl RamDisk {
  pub fn new(num_blocks: usize) -> Self {
    Self {
      num_blocks,
      inner: Mutex::new(RamDiskInner {
        blocks: BTreeMap::new(),
        opened: false,
        faulty: BTreeSet::new(),
      }),
    }
  }

  /// Make every later access to `block_id` fail
  pub fn inject_fault(&self, block_id: usize) {
    self.inner.lock().faulty.insert(block_id);
  }

  pub fn clear_faults(&self) {
    self.inner.lock().faulty.clear();
  }

  /// Number of blocks that have been written
  pub fn touched_blocks(&self) -> usize {
    self.inner.lock().blocks.len()
  }

  fn open(&self) -> Result<(), DeviceError> {
    let mut inner = self.inner.lock();
    if inner.opened {
      return Err(DeviceError::AlreadyOpen);
    }
    inner.opened = true;
    Ok(())
  }

  fn check(&self, inner: &RamDiskInner, block_id: usize, len: usize) -> Result<(), DeviceError> {
    if !inner.opened {
      return Err(DeviceError::Closed);
    }
    if block_id >= self.num_blocks {
      return Err(DeviceError::OutOfRange(block_id));
    }
    if len != BLOCK_SZ {
      return Err(DeviceError::BadBuffer(len));
    }
    if inner.faulty.contains(&block_id) {
      return Err(DeviceError::Faulted(block_id));
    }
    Ok(())
  }
}

impl BlockDevice for RamDisk {
  fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
    let inner = self.inner.lock();
    self.check(&inner, block_id, buf.len())?;
    match inner.blocks.get(&block_id) {
      Some(data) => buf.copy_from_slice(&data[..]),
      None => buf.fill(0),
    }
    Ok(())
  }

  fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), DeviceError> {
    let mut inner = self.inner.lock();
    self.check(&inner, block_id, buf.len())?;
    inner
      .blocks
      .entry(block_id)
      .or_insert_with(|| Box::new([0u8; BLOCK_SZ]))
      .copy_from_slice(buf);
    Ok(())
  }

  fn num_blocks(&self) -> usize {
    self.num_blocks
  }

  fn close(&self) -> Result<(), DeviceError> {
    let mut inner = self.inner.lock();
    if !inner.opened {
      return Err(DeviceError::Closed);
    }
    inner.opened = false;
    Ok(())
  }
}

/// Named RAM disks, all of the same size
pub struct RamDiskStore {
  disk_blocks: usize,
  disks: Mutex<BTreeMap<String, Arc<RamDisk>>>,
  /// faulty blocks every newly created disk starts with
  faults: Mutex<BTreeSet<usize>>,
}

impl RamDiskStore {
  pub fn new() -> Self {
    Self::with_disk_blocks(DISK_BLOCKS)
  }

  /// Disks created by this store will have `disk_blocks` blocks
  pub fn with_disk_blocks(disk_blocks: usize) -> Self {
    Self {
      disk_blocks,
      disks: Mutex::new(BTreeMap::new()),
      faults: Mutex::new(BTreeSet::new()),
    }
  }

  /// Disks created from now on fail every access to `block_id`
  pub fn inject_fault(&self, block_id: usize) {
    self.faults.lock().insert(block_id);
  }

  /// Direct access to a disk, for inspection and fault injection
  pub fn disk(&self, name: &str) -> Option<Arc<RamDisk>> {
    self.disks.lock().get(name).cloned()
  }
}

impl Default for RamDiskStore {
  fn default() -> Self {
    Self::new()
  }
}

impl DiskStore for RamDiskStore {
  fn create_disk(&self, name: &str) -> Result<(), DeviceError> {
    let mut disks = self.disks.lock();
    if disks.contains_key(name) {
      return Err(DeviceError::AlreadyExists);
    }
    let disk = RamDisk::new(self.disk_blocks);
    disk.inner.lock().faulty = self.faults.lock().clone();
    disks.insert(name.to_string(), Arc::new(disk));
    Ok(())
  }

  fn disk_blocks(&self) -> usize {
    self.disk_blocks
  }

  fn open_disk(&self, name: &str) -> Result<Arc<dyn BlockDevice>, DeviceError> {
    let disk = self.disk(name).ok_or(DeviceError::NoDevice)?;
    disk.open()?;
    Ok(disk)
  }
}
