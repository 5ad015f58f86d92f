use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, warn};

use super::queue::{AioQueue, IoEvent, Iocb};

/// Linux native AIO context (`io_setup` / `io_submit` / `io_getevents`).
#[derive(Debug)]
pub struct LinuxAio {
    // aio_context_t; zero once destroyed.
    ctx: AtomicU64,
    depth: usize,
}

impl LinuxAio {
    /// Creates a kernel AIO context able to hold `depth` operations.
    pub fn setup(depth: usize) -> io::Result<Self> {
        let mut ctx: libc::c_ulong = 0;
        // SAFETY: ctx is a zeroed aio_context_t the kernel fills in.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_setup,
                depth as libc::c_long,
                &mut ctx as *mut libc::c_ulong,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        debug!("Created AIO context {:#x} with depth {}", ctx, depth);
        Ok(Self {
            ctx: AtomicU64::new(ctx as u64),
            depth,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn context(&self) -> io::Result<libc::c_ulong> {
        match self.ctx.load(Ordering::Acquire) {
            0 => Err(io::Error::from_raw_os_error(libc::EINVAL)),
            ctx => Ok(ctx as libc::c_ulong),
        }
    }
}

impl AioQueue for LinuxAio {
    unsafe fn submit(&self, iocb: *mut Iocb) -> io::Result<usize> {
        let ctx = self.context()?;
        let mut iocbs = [iocb];
        // SAFETY: the caller keeps iocb and its buffer alive until completion.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_submit,
                ctx,
                1 as libc::c_long,
                iocbs.as_mut_ptr(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as usize)
    }

    fn get_events(
        &self,
        min: usize,
        max: usize,
        out: &mut Vec<IoEvent>,
        timeout: Duration,
    ) -> io::Result<usize> {
        let ctx = self.context()?;
        out.reserve(max);
        let ts = libc::timespec {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as libc::c_long,
        };
        let start = out.len();
        // SAFETY: out has room for max events past its current length; the
        // kernel writes at most max of them.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_getevents,
                ctx,
                min as libc::c_long,
                max as libc::c_long,
                out.as_mut_ptr().add(start),
                &ts as *const libc::timespec,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        let n = ret as usize;
        // SAFETY: the kernel initialized n events starting at `start`.
        unsafe { out.set_len(start + n) };
        Ok(n)
    }

    fn destroy(&self) {
        let ctx = self.ctx.swap(0, Ordering::AcqRel);
        if ctx == 0 {
            return;
        }
        // SAFETY: ctx came from io_setup and is destroyed exactly once.
        let ret = unsafe { libc::syscall(libc::SYS_io_destroy, ctx as libc::c_ulong) };
        if ret < 0 {
            warn!(
                "io_destroy failed for context {:#x}: {}",
                ctx,
                io::Error::last_os_error()
            );
        } else {
            debug!("Destroyed AIO context {:#x}", ctx);
        }
    }

    fn name(&self) -> &'static str {
        "linux-aio"
    }
}

impl Drop for LinuxAio {
    fn drop(&mut self) {
        self.destroy();
    }
}
