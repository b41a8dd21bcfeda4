use core::any::Any;

use alloc::sync::Arc;

use crate::error::DeviceError;

/// API provided for File System
pub trait BlockDevice: Send + Sync + Any {
  /// read from block data to `buf`
  fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), DeviceError>;

  /// write data back to block
  fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), DeviceError>;

  /// number of addressable blocks
  fn num_blocks(&self) -> usize;

  /// release the device, later reads and writes fail
  fn close(&self) -> Result<(), DeviceError> {
    Ok(())
  }
}

/// A place where named disks live
pub trait DiskStore {
  /// create an empty disk called `name`
  fn create_disk(&self, name: &str) -> Result<(), DeviceError>;

  /// number of blocks of the disks this store creates
  fn disk_blocks(&self) -> usize;

  /// open the disk called `name` for exclusive use
  fn open_disk(&self, name: &str) -> Result<Arc<dyn BlockDevice>, DeviceError>;
}
