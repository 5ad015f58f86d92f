//! Direct I/O device access for disk leaves.
//!
//! Opens a leaf's backing device with `O_DIRECT` so transfers bypass the page
//! cache, and reads the device geometry through the block-device ioctls.

use log::{debug, warn};
use std::fs::{File, OpenOptions};
use std::io::{self, Result as IoResult};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use crate::common::config::FILE_BACKED_SECTOR_SIZE;

mod ioctl {
    use libc::{c_int, c_ushort};

    nix::ioctl_read_bad!(blksszget, 0x1268, c_int);
    nix::ioctl_read!(blkgetsize64, 0x12, 114, u64);
    nix::ioctl_read_bad!(blkrotational, 0x127e, c_ushort);
}

/// Configuration for direct I/O operations
#[derive(Debug, Clone)]
pub struct DirectIOConfig {
    pub enabled: bool,
    pub write: bool,
}

impl Default for DirectIOConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            write: false,
        }
    }
}

/// Opens `path` for a leaf, read-write when `config.write` is set.
pub fn open_direct_io<P: AsRef<Path>>(path: P, config: &DirectIOConfig) -> IoResult<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(config.write);

    if config.enabled {
        debug!("Opening device with direct I/O: {}", path.as_ref().display());

        #[cfg(target_os = "linux")]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_DIRECT);
        }

        #[cfg(not(target_os = "linux"))]
        {
            warn!("Direct I/O not supported on this platform, falling back to buffered I/O");
        }
    } else {
        debug!("Opening device with buffered I/O: {}", path.as_ref().display());
    }

    options.open(path.as_ref())
}

/// Raw device geometry as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    pub logical_block_size: u32,
    pub capacity: u64,
    pub rotational: bool,
}

/// Queries sector size, capacity and rotational flag of an open device.
///
/// Regular files are accepted only when `allow_file_backed` is set; their
/// geometry comes from file metadata.
pub fn query_geometry(file: &File, allow_file_backed: bool) -> IoResult<DiskGeometry> {
    let file_type = file.metadata()?.file_type();

    if file_type.is_block_device() {
        return query_block_device(file.as_raw_fd());
    }

    if allow_file_backed && file_type.is_file() {
        return Ok(DiskGeometry {
            logical_block_size: FILE_BACKED_SECTOR_SIZE,
            capacity: file.metadata()?.len(),
            rotational: false,
        });
    }

    Err(io::Error::from_raw_os_error(libc::ENOTBLK))
}

fn query_block_device(fd: RawFd) -> IoResult<DiskGeometry> {
    let mut sector: libc::c_int = 0;
    let mut capacity: u64 = 0;
    let mut rotational: libc::c_ushort = 0;

    // SAFETY: fd is an open descriptor and each out-pointer refers to a live
    // local of the type the ioctl writes.
    unsafe {
        ioctl::blksszget(fd, &mut sector).map_err(io::Error::from)?;
        ioctl::blkgetsize64(fd, &mut capacity).map_err(io::Error::from)?;
        ioctl::blkrotational(fd, &mut rotational).map_err(io::Error::from)?;
    }

    if sector <= 0 {
        warn!("Device reported invalid sector size {}", sector);
        return Err(io::Error::from_raw_os_error(libc::EINVAL));
    }

    Ok(DiskGeometry {
        logical_block_size: sector as u32,
        capacity,
        rotational: rotational != 0,
    })
}

/// The open descriptor of a disk leaf.
///
/// Shared by reference count: the owning vdev holds one clone while open and
/// every in-flight operation holds another, so the descriptor is closed only
/// once nothing can still reference it.
#[derive(Debug)]
pub struct DiskHandle {
    file: File,
    path: PathBuf,
    writeable: bool,
}

impl DiskHandle {
    pub fn open(path: &Path, config: &DirectIOConfig) -> IoResult<Self> {
        let file = open_direct_io(path, config)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            writeable: config.write,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writeable(&self) -> bool {
        self.writeable
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn geometry(&self, allow_file_backed: bool) -> IoResult<DiskGeometry> {
        query_geometry(&self.file, allow_file_backed)
    }
}

impl AsRawFd for DiskHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl Drop for DiskHandle {
    fn drop(&mut self) {
        debug!("Closing device {}", self.path.display());
    }
}
