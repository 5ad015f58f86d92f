//! Kernel ABI for native AIO and the facility seam the backend submits to.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

pub const IOCB_CMD_PREAD: u16 = 0;
pub const IOCB_CMD_PWRITE: u16 = 1;
pub const IOCB_CMD_FSYNC: u16 = 2;
pub const IOCB_CMD_FDSYNC: u16 = 3;

/// Kernel `struct iocb`. The kernel swaps `aio_key` and `aio_rw_flags` on
/// big-endian targets.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Iocb {
    pub aio_data: u64,
    #[cfg(target_endian = "little")]
    pub aio_key: u32,
    pub aio_rw_flags: i32,
    #[cfg(target_endian = "big")]
    pub aio_key: u32,
    pub aio_lio_opcode: u16,
    pub aio_reqprio: i16,
    pub aio_fildes: u32,
    pub aio_buf: u64,
    pub aio_nbytes: u64,
    pub aio_offset: i64,
    pub aio_reserved2: u64,
    pub aio_flags: u32,
    pub aio_resfd: u32,
}

impl Iocb {
    pub fn pread(fd: RawFd, buf: *mut u8, len: usize, offset: u64) -> Self {
        Self::rw(IOCB_CMD_PREAD, fd, buf as u64, len, offset)
    }

    pub fn pwrite(fd: RawFd, buf: *const u8, len: usize, offset: u64) -> Self {
        Self::rw(IOCB_CMD_PWRITE, fd, buf as u64, len, offset)
    }

    pub fn fsync(fd: RawFd) -> Self {
        Self {
            aio_lio_opcode: IOCB_CMD_FSYNC,
            aio_fildes: fd as u32,
            ..Self::default()
        }
    }

    fn rw(opcode: u16, fd: RawFd, buf: u64, len: usize, offset: u64) -> Self {
        Self {
            aio_lio_opcode: opcode,
            aio_fildes: fd as u32,
            aio_buf: buf,
            aio_nbytes: len as u64,
            aio_offset: offset as i64,
            ..Self::default()
        }
    }
}

/// Kernel `struct io_event`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoEvent {
    /// The `aio_data` of the completed control block.
    pub data: u64,
    /// Address of the completed control block.
    pub obj: u64,
    /// Bytes transferred, or a negated errno.
    pub res: i64,
    pub res2: i64,
}

/// An OS asynchronous I/O facility.
///
/// Submission and event collection may run concurrently from different
/// threads, as the kernel facility allows.
pub trait AioQueue: Send + Sync {
    /// Submits one control block and returns how many were accepted.
    ///
    /// # Safety
    ///
    /// Once accepted, the control block and the buffer it names are read and
    /// written by the facility until the matching event is collected. Both
    /// must stay valid and unmoved until then.
    unsafe fn submit(&self, iocb: *mut Iocb) -> io::Result<usize>;

    /// Waits up to `timeout` for at least `min` and at most `max` events,
    /// appending them to `out`.
    fn get_events(
        &self,
        min: usize,
        max: usize,
        out: &mut Vec<IoEvent>,
        timeout: Duration,
    ) -> io::Result<usize>;

    /// Releases the facility. Later calls fail.
    fn destroy(&self);

    fn name(&self) -> &'static str;
}
