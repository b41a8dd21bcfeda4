//! Error kinds reported by the file system and its block devices

use core::fmt;

use thiserror::Error;

/// Failure reported by a block device or a disk store
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
  #[error("no disk with that name")]
  NoDevice,
  #[error("a disk with that name already exists")]
  AlreadyExists,
  #[error("the disk is already open")]
  AlreadyOpen,
  #[error("the disk is not open")]
  Closed,
  #[error("block {0} is out of range")]
  OutOfRange(usize),
  #[error("buffer of {0} bytes does not match the block size")]
  BadBuffer(usize),
  #[error("block {0} is unreadable")]
  Faulted(usize),
  #[error("host i/o error")]
  Host,
}

/// The bounded resource an operation ran out of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
  DirectoryTable,
  DescriptorTable,
  DiskSpace,
  NameLength,
  FileSize,
}

impl fmt::Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let what = match self {
      Resource::DirectoryTable => "directory table is full",
      Resource::DescriptorTable => "descriptor table is full",
      Resource::DiskSpace => "no free blocks left on the disk",
      Resource::NameLength => "file name is too long",
      Resource::FileSize => "maximum file size reached",
    };
    f.write_str(what)
  }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
  #[error("no such file or descriptor")]
  NotFound,
  #[error("file already exists")]
  AlreadyExists,
  #[error("capacity exceeded: {0}")]
  CapacityExceeded(Resource),
  #[error("invalid argument")]
  InvalidArgument,
  #[error("file is still open")]
  Busy,
  #[error("device i/o failed: {0}")]
  Io(#[from] DeviceError),
  #[error("disk does not hold a valid file system")]
  Corrupted,
}

pub type Result<T> = core::result::Result<T, FsError>;
