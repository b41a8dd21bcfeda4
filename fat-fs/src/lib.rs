//! A flat, FAT-style file system over a fixed-size block device.
//!
//! Metadata (bitmap, FAT, directory) is loaded at mount and only written
//! back at unmount.
#![no_std]

extern crate alloc;

mod bitmap;
mod block_dev;
pub mod config;
mod error;
mod file;
mod fs;
mod layout;
mod ram_disk;
mod vfs;

pub use block_dev::{BlockDevice, DiskStore};
pub use config::{BLOCK_SZ, DISK_BLOCKS, MAX_FILES, MAX_FILE_SIZE, MAX_OPEN_FILES};
pub use error::{DeviceError, FsError, Resource, Result};
pub use fs::FileSystem;
pub use layout::SuperBlock;
pub use ram_disk::{RamDisk, RamDiskStore};
