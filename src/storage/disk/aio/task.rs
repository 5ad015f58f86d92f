use std::os::fd::AsRawFd;
use std::sync::Arc;

use crate::common::time::{HrTime, gethrtime};
use crate::storage::abd::AlignedBuf;
use crate::storage::disk::direct_io::DiskHandle;
use crate::storage::zio::{Zio, ZioOp};

use super::queue::Iocb;

/// One outstanding request: the control block handed to the facility, the
/// request it completes, and everything the operation borrows.
///
/// A task is boxed before submission and its heap address is stored in the
/// control block's `aio_data`, which is how a completion finds its task.
#[derive(Debug)]
pub struct AioTask {
    pub(crate) iocb: Iocb,
    pub(crate) zio: Zio,
    pub(crate) buf: Option<AlignedBuf>,
    pub(crate) disk: Arc<DiskHandle>,
    pub(crate) submitted_at: HrTime,
}

impl AioTask {
    /// Builds the task for `zio`. Reads and writes carry `buf`; a flush
    /// carries none.
    pub(crate) fn new(zio: Zio, mut buf: Option<AlignedBuf>, disk: Arc<DiskHandle>) -> Box<Self> {
        let fd = disk.as_raw_fd();
        let iocb = match (zio.op(), buf.as_mut()) {
            (ZioOp::Read(_), Some(buf)) => {
                Iocb::pread(fd, buf.as_mut_ptr(), zio.size(), zio.offset())
            }
            (ZioOp::Write(_), Some(buf)) => {
                Iocb::pwrite(fd, buf.as_ptr(), zio.size(), zio.offset())
            }
            _ => Iocb::fsync(fd),
        };
        Box::new(Self {
            iocb,
            zio,
            buf,
            disk,
            submitted_at: gethrtime(),
        })
    }

    /// Leaks the task and stamps the control block with its address.
    ///
    /// The returned pointer must come back through [`AioTask::from_raw`]
    /// exactly once.
    pub(crate) fn into_raw(task: Box<Self>) -> *mut Self {
        let raw = Box::into_raw(task);
        // SAFETY: raw was just produced by Box::into_raw and is unaliased.
        unsafe { (*raw).iocb.aio_data = raw as u64 };
        raw
    }

    /// Reclaims a task from the `aio_data` of its control block.
    ///
    /// # Safety
    ///
    /// `data` must be a value written by [`AioTask::into_raw`] whose task
    /// has not been reclaimed yet.
    pub(crate) unsafe fn from_raw(data: u64) -> Box<Self> {
        // SAFETY: guaranteed by the caller.
        unsafe { Box::from_raw(data as *mut Self) }
    }

    pub(crate) fn iocb_ptr(raw: *mut Self) -> *mut Iocb {
        // SAFETY: raw points to a live task; no reference is formed.
        unsafe { std::ptr::addr_of_mut!((*raw).iocb) }
    }
}
