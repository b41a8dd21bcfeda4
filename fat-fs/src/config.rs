//! Constants used in fat-fs

/// Bytes per device block
pub const BLOCK_SZ: usize = 4096;
/// Bits held by one bitmap block
pub const BLOCK_BITS: usize = BLOCK_SZ * 8;
/// Default number of blocks on a freshly created disk
pub const DISK_BLOCKS: usize = 8192;
/// Largest device a 16-bit FAT entry can address
pub const MAX_DISK_BLOCKS: usize = u16::MAX as usize + 1;

/// Directory / FAT table capacity
pub const MAX_FILES: usize = 64;
/// Descriptor table capacity (system wide)
pub const MAX_OPEN_FILES: usize = 32;
/// Block list capacity of one FAT record
pub const MAX_FILE_BLOCKS: usize = 512;
pub const MAX_FILE_SIZE: usize = 1024 * 1024;

/// Visible characters of a file name, a NUL terminator follows on disk
pub const NAME_LENGTH_LIMIT: usize = 15;

/// FileSystem Magic Number
pub const FS_MAGIC: u32 = 0x3b80_0f47;
