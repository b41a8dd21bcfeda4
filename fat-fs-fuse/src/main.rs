use clap::{Parser, Subcommand};
use fat_fs::{BlockDevice, DeviceError, DiskStore, FileSystem, FsError, BLOCK_SZ, DISK_BLOCKS};
use log::{error, info};
use std::fs::{read_dir, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

/// A disk image on the host file system
struct BlockFile {
  file: Mutex<Option<File>>,
  num_blocks: usize,
}

fn host_error(err: io::Error) -> DeviceError {
  error!("host i/o error: {}", err);
  DeviceError::Host
}

impl BlockFile {
  fn seek_to(file: &mut File, block_id: usize, num_blocks: usize) -> Result<(), DeviceError> {
    if block_id >= num_blocks {
      return Err(DeviceError::OutOfRange(block_id));
    }
    file.seek(SeekFrom::Start((block_id * BLOCK_SZ) as u64))
      .map_err(host_error)?;
    Ok(())
  }
}

impl BlockDevice for BlockFile {
  fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
    if buf.len() != BLOCK_SZ {
      return Err(DeviceError::BadBuffer(buf.len()));
    }
    let mut guard = self.file.lock().map_err(|_| DeviceError::Host)?;
    let file = guard.as_mut().ok_or(DeviceError::Closed)?;
    Self::seek_to(file, block_id, self.num_blocks)?;
    file.read_exact(buf).map_err(host_error)
  }

  fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), DeviceError> {
    if buf.len() != BLOCK_SZ {
      return Err(DeviceError::BadBuffer(buf.len()));
    }
    let mut guard = self.file.lock().map_err(|_| DeviceError::Host)?;
    let file = guard.as_mut().ok_or(DeviceError::Closed)?;
    Self::seek_to(file, block_id, self.num_blocks)?;
    file.write_all(buf).map_err(host_error)
  }

  fn num_blocks(&self) -> usize {
    self.num_blocks
  }

  fn close(&self) -> Result<(), DeviceError> {
    let mut guard = self.file.lock().map_err(|_| DeviceError::Host)?;
    let file = guard.take().ok_or(DeviceError::Closed)?;
    file.sync_all().map_err(host_error)
  }
}

/// Disk images kept as files inside one host directory
struct FileDiskStore {
  dir: PathBuf,
  num_blocks: usize,
}

impl FileDiskStore {
  fn new(dir: impl Into<PathBuf>) -> Self {
    Self {
      dir: dir.into(),
      num_blocks: DISK_BLOCKS,
    }
  }

  fn path(&self, name: &str) -> PathBuf {
    self.dir.join(name)
  }
}

impl DiskStore for FileDiskStore {
  fn create_disk(&self, name: &str) -> Result<(), DeviceError> {
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create_new(true)
      .open(self.path(name))
      .map_err(|err| match err.kind() {
        io::ErrorKind::AlreadyExists => DeviceError::AlreadyExists,
        _ => host_error(err),
      })?;
    file.set_len((self.num_blocks * BLOCK_SZ) as u64).map_err(host_error)
  }

  fn disk_blocks(&self) -> usize {
    self.num_blocks
  }

  fn open_disk(&self, name: &str) -> Result<Arc<dyn BlockDevice>, DeviceError> {
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .open(self.path(name))
      .map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => DeviceError::NoDevice,
        _ => host_error(err),
      })?;
    let len = file.metadata().map_err(host_error)?.len() as usize;
    Ok(Arc::new(BlockFile {
      file: Mutex::new(Some(file)),
      num_blocks: len / BLOCK_SZ,
    }))
  }
}

#[derive(Debug, Parser)]
#[clap(name = "fat-fs-fuse")]
/// Inspect and fill fat-fs disk images
struct Cli {
  /// Path of the disk image
  #[arg(short, long, default_value = "fs.img")]
  disk: PathBuf,
  #[clap(subcommand)]
  command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
  #[command(about = "Create a new, empty disk image")]
  Format,
  #[command(about = "List the files on the disk")]
  Ls,
  #[command(about = "Copy a host file onto the disk")]
  Put {
    host: PathBuf,
    /// Name on the disk, defaults to the host file name
    name: Option<String>,
  },
  #[command(about = "Print a file to stdout")]
  Cat { name: String },
  #[command(about = "Copy a file from the disk to the host")]
  Get { name: String, host: PathBuf },
  #[command(about = "Delete a file")]
  Rm { name: String },
  #[command(about = "Shrink a file to the given length")]
  Truncate { name: String, length: i64 },
  #[command(about = "Show block usage")]
  Df,
  #[command(about = "Format a new disk and copy every file of a host directory onto it")]
  Pack { source: PathBuf },
}

#[derive(Debug)]
enum CliError {
  Fs(FsError),
  Host(io::Error),
}

impl From<FsError> for CliError {
  fn from(err: FsError) -> Self {
    CliError::Fs(err)
  }
}

impl From<io::Error> for CliError {
  fn from(err: io::Error) -> Self {
    CliError::Host(err)
  }
}

impl std::fmt::Display for CliError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CliError::Fs(err) => write!(f, "{}", err),
      CliError::Host(err) => write!(f, "{}", err),
    }
  }
}

pub fn main() -> ExitCode {
  env_logger::init();
  let cli = Cli::parse();
  match run(&cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      eprintln!("fat-fs-fuse: {}", err);
      ExitCode::FAILURE
    }
  }
}

/// (store, disk name) for an image path
fn split_disk_path(disk: &Path) -> (FileDiskStore, String) {
  let dir = match disk.parent() {
    Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
    _ => PathBuf::from("."),
  };
  let name = disk
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_default();
  (FileDiskStore::new(dir), name)
}

fn run(cli: &Cli) -> Result<(), CliError> {
  let (store, name) = split_disk_path(&cli.disk);
  match &cli.command {
    Command::Format => {
      FileSystem::format(&store, &name)?;
      println!("formatted {}", cli.disk.display());
      Ok(())
    }
    Command::Pack { source } => pack(&store, &name, source),
    command => {
      let mut fs = FileSystem::mount(&store, &name)?;
      let result = execute(&mut fs, command);
      // persist whatever the command changed, even when it failed half way
      let unmounted = fs.unmount();
      result?;
      unmounted?;
      Ok(())
    }
  }
}

fn execute(fs: &mut FileSystem, command: &Command) -> Result<(), CliError> {
  match command {
    Command::Ls => {
      for name in fs.list() {
        let fd = fs.open(&name)?;
        let size = fs.file_size(fd);
        fs.close(fd)?;
        println!("{:>10} {}", size?, name);
      }
    }
    Command::Put { host, name } => {
      let name = match name {
        Some(name) => name.clone(),
        None => host
          .file_name()
          .map(|name| name.to_string_lossy().into_owned())
          .unwrap_or_default(),
      };
      let mut data = Vec::new();
      File::open(host)?.read_to_end(&mut data)?;
      copy_in(fs, &name, &data)?;
    }
    Command::Cat { name } => {
      let data = copy_out(fs, name)?;
      io::stdout().write_all(&data)?;
    }
    Command::Get { name, host } => {
      let data = copy_out(fs, name)?;
      File::create(host)?.write_all(&data)?;
    }
    Command::Rm { name } => fs.delete(name)?,
    Command::Truncate { name, length } => {
      let fd = fs.open(name)?;
      let result = fs.truncate(fd, *length);
      fs.close(fd)?;
      result?;
    }
    Command::Df => {
      let sb = fs.super_block();
      println!("total blocks     {}", sb.total_blocks);
      println!("metadata blocks  {}", sb.metadata_blocks());
      println!("used data blocks {}", fs.used_data_blocks());
      println!("free blocks      {}", fs.free_blocks());
    }
    Command::Format | Command::Pack { .. } => unreachable!("handled before mounting"),
  }
  Ok(())
}

/// Create (or replace) `name` with `data`
fn copy_in(fs: &mut FileSystem, name: &str, data: &[u8]) -> Result<(), FsError> {
  match fs.delete(name) {
    Ok(()) | Err(FsError::NotFound) => {}
    Err(err) => return Err(err),
  }
  fs.create(name)?;
  let fd = fs.open(name)?;
  let written = fs.write(fd, data);
  fs.close(fd)?;
  let written = written?;
  if written < data.len() {
    log::warn!("{}: only {} of {} bytes fit", name, written, data.len());
  }
  Ok(())
}

fn copy_out(fs: &mut FileSystem, name: &str) -> Result<Vec<u8>, FsError> {
  let fd = fs.open(name)?;
  let size = fs.file_size(fd)?;
  let data = fs.read_to_vec(fd, size);
  fs.close(fd)?;
  data
}

fn pack(store: &FileDiskStore, name: &str, source: &Path) -> Result<(), CliError> {
  FileSystem::format(store, name)?;
  let mut fs = FileSystem::mount(store, name)?;
  let mut packed = Ok(());
  for entry in read_dir(source)? {
    let path = entry?.path();
    if !path.is_file() {
      continue;
    }
    let file_name = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default();
    info!("packing {} as {}", path.display(), file_name);
    let mut data = Vec::new();
    File::open(&path)?.read_to_end(&mut data)?;
    if let Err(err) = copy_in(&mut fs, &file_name, &data) {
      packed = Err(err);
      break;
    }
  }
  fs.unmount()?;
  packed?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use fat_fs::Resource;
  use std::sync::atomic::{AtomicUsize, Ordering};

  static NEXT_DISK: AtomicUsize = AtomicUsize::new(0);

  /// A store in a fresh temp directory and an unused disk name
  fn scratch() -> (FileDiskStore, String) {
    let dir = std::env::temp_dir().join(format!("fat-fs-fuse-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let name = format!("fs{}.img", NEXT_DISK.fetch_add(1, Ordering::SeqCst));
    let _ = std::fs::remove_file(dir.join(&name));
    (FileDiskStore::new(dir), name)
  }

  #[test]
  fn efs_test() -> Result<(), FsError> {
    let (store, name) = scratch();
    FileSystem::format(&store, &name)?;
    let mut fs = FileSystem::mount(&store, &name)?;

    fs.create("filea")?;
    fs.create("fileb")?;
    assert_eq!(fs.list(), ["filea", "fileb"]);

    let fd = fs.open("filea")?;
    let greet_str = "Hello, world!";
    fs.write(fd, greet_str.as_bytes())?;
    fs.seek(fd, 0)?;
    let mut buffer = [0u8; 233];
    let len = fs.read(fd, &mut buffer)?;
    assert_eq!(greet_str, core::str::from_utf8(&buffer[..len]).unwrap());

    let mut random_str_test = |len: usize| -> Result<(), FsError> {
      fs.truncate(fd, 0)?;
      fs.seek(fd, 0)?;
      assert_eq!(fs.read(fd, &mut buffer)?, 0, "not cleared!");
      let mut str = String::new();
      // random digit
      for _ in 0..len {
        str.push(char::from(b'0' + rand::random::<u8>() % 10));
      }
      fs.write(fd, str.as_bytes())?;
      fs.seek(fd, 0)?;
      let mut read_buffer = [0u8; 127];
      let mut read_str = String::new();
      loop {
        let len = fs.read(fd, &mut read_buffer)?;
        if len == 0 {
          break;
        }
        read_str.push_str(core::str::from_utf8(&read_buffer[..len]).unwrap());
      }
      assert_eq!(str, read_str);
      Ok(())
    };

    random_str_test(4 * BLOCK_SZ)?;
    random_str_test(8 * BLOCK_SZ + BLOCK_SZ / 2)?;
    random_str_test(100 * BLOCK_SZ)?;
    random_str_test(70 * BLOCK_SZ + BLOCK_SZ / 7)?;
    random_str_test(200 * BLOCK_SZ)?;
    fs.close(fd)?;
    fs.unmount()
  }

  #[test]
  fn image_persists_across_mounts() -> Result<(), FsError> {
    let (store, name) = scratch();
    FileSystem::format(&store, &name)?;
    let payload: Vec<u8> = (0..3 * BLOCK_SZ + 5).map(|_| rand::random::<u8>()).collect();

    let mut fs = FileSystem::mount(&store, &name)?;
    copy_in(&mut fs, "data.bin", &payload)?;
    copy_in(&mut fs, "empty", &[])?;
    fs.unmount()?;

    let mut fs = FileSystem::mount(&store, &name)?;
    assert_eq!(fs.list(), ["data.bin", "empty"]);
    assert_eq!(copy_out(&mut fs, "data.bin")?, payload);
    assert!(copy_out(&mut fs, "empty")?.is_empty());
    assert_eq!(fs.used_data_blocks(), 4);
    fs.unmount()?;

    assert_eq!(
      FileSystem::format(&store, &name),
      Err(FsError::Io(DeviceError::AlreadyExists))
    );
    Ok(())
  }

  #[test]
  fn closed_image_rejects_io() {
    let (store, name) = scratch();
    store.create_disk(&name).unwrap();
    let disk = store.open_disk(&name).unwrap();
    assert_eq!(disk.num_blocks(), DISK_BLOCKS);
    disk.write_block(5, &[7u8; BLOCK_SZ]).unwrap();
    let mut buf = [0u8; BLOCK_SZ];
    disk.read_block(5, &mut buf).unwrap();
    assert_eq!(buf, [7u8; BLOCK_SZ]);
    assert_eq!(disk.read_block(DISK_BLOCKS, &mut buf), Err(DeviceError::OutOfRange(DISK_BLOCKS)));
    disk.close().unwrap();
    assert_eq!(disk.read_block(5, &mut buf), Err(DeviceError::Closed));
    assert_eq!(disk.close(), Err(DeviceError::Closed));
  }

  #[test]
  fn pack_copies_a_directory() -> Result<(), CliError> {
    let (store, name) = scratch();
    let source = store.dir.join(format!("{}-src", name));
    std::fs::create_dir_all(&source)?;
    std::fs::write(source.join("hello"), b"hello fat-fs")?;
    std::fs::write(source.join("blob"), vec![9u8; 2 * BLOCK_SZ + 1])?;
    std::fs::create_dir_all(source.join("nested"))?;

    pack(&store, &name, &source)?;
    let mut fs = FileSystem::mount(&store, &name)?;
    let mut names = fs.list();
    names.sort();
    assert_eq!(names, ["blob", "hello"]);
    assert_eq!(copy_out(&mut fs, "hello")?, b"hello fat-fs");
    assert_eq!(copy_out(&mut fs, "blob")?.len(), 2 * BLOCK_SZ + 1);
    fs.unmount()?;
    Ok(())
  }

  #[test]
  fn copy_in_reports_long_names() {
    let (store, name) = scratch();
    FileSystem::format(&store, &name).unwrap();
    let mut fs = FileSystem::mount(&store, &name).unwrap();
    assert_eq!(
      copy_in(&mut fs, "a-name-that-is-too-long", b"x"),
      Err(FsError::CapacityExceeded(Resource::NameLength))
    );
    fs.unmount().unwrap();
  }

  #[test]
  fn disk_path_is_split_into_store_and_name() {
    let (store, name) = split_disk_path(Path::new("target/images/fs.img"));
    assert_eq!(store.dir, PathBuf::from("target/images"));
    assert_eq!(name, "fs.img");
    let (store, name) = split_disk_path(Path::new("fs.img"));
    assert_eq!(store.dir, PathBuf::from("."));
    assert_eq!(name, "fs.img");
  }
}
