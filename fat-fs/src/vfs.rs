//! Directory, FAT and descriptor management of a mounted file system

use alloc::{string::{String, ToString}, vec::Vec};
use log::debug;

use crate::{
  config::NAME_LENGTH_LIMIT,
  error::{FsError, Resource, Result},
  fs::{FileDescriptor, FileSystem},
  layout::{DirEntry, FatId, FatRecord, FileType},
};

impl FileSystem {
  /// slot of the occupied directory entry called `name`
  fn find_entry(&self, name: &str) -> Option<usize> {
    self.dir_table
      .iter()
      .position(|entry| entry.is_occupied() && entry.name() == name)
  }

  /// A FAT record no file is using
  fn find_free_fat(&self) -> Option<FatId> {
    (0..self.fat_table.len())
      .map(|i| FatId(i as u16))
      .find(|fat| self.fat(*fat).file_type() == FileType::Unused)
  }

  pub(crate) fn descriptor(&self, fd: usize) -> Result<&FileDescriptor> {
    self.fd_table
      .get(fd)
      .filter(|desc| desc.occupied)
      .ok_or(FsError::NotFound)
  }

  pub(crate) fn descriptor_mut(&mut self, fd: usize) -> Result<&mut FileDescriptor> {
    self.fd_table
      .get_mut(fd)
      .filter(|desc| desc.occupied)
      .ok_or(FsError::NotFound)
  }

  /// Create an empty file called `name`
  pub fn create(&mut self, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('\0') {
      return Err(FsError::InvalidArgument);
    }
    if name.len() > NAME_LENGTH_LIMIT {
      return Err(FsError::CapacityExceeded(Resource::NameLength));
    }
    if self.find_entry(name).is_some() {
      return Err(FsError::AlreadyExists);
    }
    let slot = self.dir_table
      .iter()
      .position(|entry| !entry.is_occupied())
      .ok_or(FsError::CapacityExceeded(Resource::DirectoryTable))?;
    let fat = self.find_free_fat()
      .ok_or(FsError::CapacityExceeded(Resource::DirectoryTable))?;

    self.fat_mut(fat).initialize(FileType::Regular, slot);
    self.dir_table[slot] = DirEntry::new(name, fat);
    debug!("create {:?} in slot {} with fat {}", name, slot, fat.0);
    Ok(())
  }

  /// Remove the file called `name` and give its blocks back
  pub fn delete(&mut self, name: &str) -> Result<()> {
    let slot = self.find_entry(name).ok_or(FsError::NotFound)?;
    let fat = self.dir_table[slot].fat();
    debug_assert_eq!(self.fat(fat).dir_slot as usize, slot);
    let open = self.fd_table
      .iter()
      .any(|desc| desc.occupied && desc.fat == fat.0);
    if open || self.dir_table[slot].ref_count > 0 {
      return Err(FsError::Busy);
    }

    while let Some(block_id) = self.fat_mut(fat).pop_block() {
      self.dealloc_data(block_id);
    }
    *self.fat_mut(fat) = FatRecord::empty();
    self.dir_table[slot] = DirEntry::empty();
    debug!("delete {:?} from slot {}", name, slot);
    Ok(())
  }

  /// Open the file called `name`, the new descriptor starts at offset 0
  pub fn open(&mut self, name: &str) -> Result<usize> {
    let slot = self.find_entry(name).ok_or(FsError::NotFound)?;
    let fd = self.fd_table
      .iter()
      .position(|desc| !desc.occupied)
      .ok_or(FsError::CapacityExceeded(Resource::DescriptorTable))?;
    let entry = &mut self.dir_table[slot];
    entry.ref_count += 1;
    self.fd_table[fd] = FileDescriptor {
      occupied: true,
      fat: entry.fat().0,
      offset: 0,
    };
    debug!("open {:?} as fd {}", name, fd);
    Ok(fd)
  }

  /// Release descriptor `fd`
  pub fn close(&mut self, fd: usize) -> Result<()> {
    let desc = self.descriptor_mut(fd)?;
    desc.occupied = false;
    let fat = FatId(desc.fat);
    if let Some(entry) = self.dir_table
      .iter_mut()
      .find(|entry| entry.is_occupied() && entry.fat() == fat)
    {
      entry.ref_count = entry.ref_count.saturating_sub(1);
    }
    debug!("close fd {}", fd);
    Ok(())
  }

  /// Names of all files, in directory order
  pub fn list(&self) -> Vec<String> {
    self.dir_table
      .iter()
      .filter(|entry| entry.is_occupied())
      .map(|entry| entry.name().to_string())
      .collect()
  }

  /// Size in bytes of the file behind `fd`
  pub fn file_size(&self, fd: usize) -> Result<usize> {
    let desc = self.descriptor(fd)?;
    Ok(self.fat(FatId(desc.fat)).size())
  }

  /// Number of open descriptors
  pub fn open_count(&self) -> usize {
    self.fd_table.iter().filter(|desc| desc.occupied).count()
  }

  /// Open descriptors on the file called `name`
  pub fn ref_count(&self, name: &str) -> Result<usize> {
    let slot = self.find_entry(name).ok_or(FsError::NotFound)?;
    Ok(self.dir_table[slot].ref_count as usize)
  }
}

#[cfg(test)]
mod tests {
  use alloc::format;

  use crate::{
    config::{MAX_FILES, MAX_OPEN_FILES},
    error::{FsError, Resource},
    fs::FileSystem,
    ram_disk::RamDiskStore,
  };

  fn mounted() -> (RamDiskStore, FileSystem) {
    let store = RamDiskStore::new();
    FileSystem::format(&store, "disk").unwrap();
    let fs = FileSystem::mount(&store, "disk").unwrap();
    (store, fs)
  }

  #[test]
  fn create_rejects_bad_names() {
    let (_store, mut fs) = mounted();
    assert_eq!(fs.create(""), Err(FsError::InvalidArgument));
    assert_eq!(
      fs.create("sixteen-chars-16"),
      Err(FsError::CapacityExceeded(Resource::NameLength))
    );
    fs.create("a.txt").unwrap();
    assert_eq!(fs.create("a.txt"), Err(FsError::AlreadyExists));
    assert_eq!(fs.list(), ["a.txt"]);
  }

  #[test]
  fn directory_holds_64_files() {
    let (_store, mut fs) = mounted();
    for i in 0..MAX_FILES {
      fs.create(&format!("f{}", i)).unwrap();
    }
    assert_eq!(
      fs.create("one-more"),
      Err(FsError::CapacityExceeded(Resource::DirectoryTable))
    );
    fs.delete("f10").unwrap();
    fs.create("one-more").unwrap();
    let names = fs.list();
    assert_eq!(names.len(), MAX_FILES);
    assert_eq!(names[10], "one-more");
  }

  #[test]
  fn descriptor_table_holds_32_handles() {
    let (_store, mut fs) = mounted();
    fs.create("x").unwrap();
    let fds: alloc::vec::Vec<usize> = (0..MAX_OPEN_FILES).map(|_| fs.open("x").unwrap()).collect();
    assert_eq!(
      fs.open("x"),
      Err(FsError::CapacityExceeded(Resource::DescriptorTable))
    );
    assert_eq!(fs.ref_count("x"), Ok(MAX_OPEN_FILES));
    fs.close(fds[7]).unwrap();
    assert_eq!(fs.open("x"), Ok(fds[7]));
  }

  #[test]
  fn open_unknown_file_fails() {
    let (_store, mut fs) = mounted();
    assert_eq!(fs.open("ghost"), Err(FsError::NotFound));
    assert_eq!(fs.delete("ghost"), Err(FsError::NotFound));
  }

  #[test]
  fn close_twice_fails_without_double_decrement() {
    let (_store, mut fs) = mounted();
    fs.create("x").unwrap();
    let fd1 = fs.open("x").unwrap();
    let fd2 = fs.open("x").unwrap();
    fs.close(fd1).unwrap();
    assert_eq!(fs.close(fd1), Err(FsError::NotFound));
    assert_eq!(fs.ref_count("x"), Ok(1));
    assert_eq!(fs.close(99), Err(FsError::NotFound));
    fs.close(fd2).unwrap();
    assert_eq!(fs.ref_count("x"), Ok(0));
    assert_eq!(fs.open_count(), 0);
  }

  #[test]
  fn close_adjusts_the_bound_entry() {
    let (_store, mut fs) = mounted();
    fs.create("a").unwrap();
    fs.create("b").unwrap();
    // descriptor slots and directory slots diverge here
    let fd_b = fs.open("b").unwrap();
    let fd_a = fs.open("a").unwrap();
    assert_eq!((fd_b, fd_a), (0, 1));
    fs.close(fd_a).unwrap();
    assert_eq!(fs.ref_count("a"), Ok(0));
    assert_eq!(fs.ref_count("b"), Ok(1));
    assert_eq!(fs.delete("b"), Err(FsError::Busy));
    fs.delete("a").unwrap();
  }

  #[test]
  fn delete_waits_for_every_descriptor() {
    let (_store, mut fs) = mounted();
    fs.create("x").unwrap();
    let fd1 = fs.open("x").unwrap();
    let fd2 = fs.open("x").unwrap();
    assert_eq!(fs.delete("x"), Err(FsError::Busy));
    fs.close(fd1).unwrap();
    assert_eq!(fs.delete("x"), Err(FsError::Busy));
    fs.close(fd2).unwrap();
    fs.delete("x").unwrap();
    assert!(fs.list().is_empty());
  }

  #[test]
  fn listing_outlives_later_changes() {
    let (_store, mut fs) = mounted();
    fs.create("a").unwrap();
    fs.create("b").unwrap();
    let names = fs.list();
    fs.delete("a").unwrap();
    fs.create("c").unwrap();
    assert_eq!(names, ["a", "b"]);
    assert_eq!(fs.list(), ["c", "b"]);
  }

  #[test]
  fn file_size_needs_an_open_descriptor() {
    let (_store, mut fs) = mounted();
    fs.create("x").unwrap();
    let fd = fs.open("x").unwrap();
    assert_eq!(fs.file_size(fd), Ok(0));
    fs.close(fd).unwrap();
    assert_eq!(fs.file_size(fd), Err(FsError::NotFound));
  }
}
