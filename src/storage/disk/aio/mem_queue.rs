//! In-memory AIO facility.
//!
//! `MemQueue` services control blocks against a byte vector standing in for
//! the device and publishes completions the way the kernel would. Submission
//! outcomes, completion results and wait failures can be scripted, which
//! makes every error path of the backend reachable without a real disk.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use log::trace;
use parking_lot::{Condvar, Mutex};

use super::queue::{AioQueue, IOCB_CMD_FDSYNC, IOCB_CMD_FSYNC, IOCB_CMD_PREAD, IOCB_CMD_PWRITE, IoEvent, Iocb};

/// What the next `submit` call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accept and service the control block.
    Accept,
    /// Return `Ok(0)`: nothing accepted, no errno.
    Reject,
    /// Fail with the given errno.
    Fail(i32),
}

pub struct MemQueue {
    device: Mutex<Vec<u8>>,
    ready: Mutex<VecDeque<IoEvent>>,
    ready_cond: Condvar,
    held: Mutex<Vec<IoEvent>>,
    holding: AtomicBool,
    submit_script: Mutex<VecDeque<SubmitOutcome>>,
    result_script: Mutex<VecDeque<i64>>,
    wait_error: Mutex<Option<i32>>,
    submit_calls: AtomicUsize,
    destroyed: AtomicBool,
}

impl MemQueue {
    /// Creates a zero-filled device of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            device: Mutex::new(vec![0u8; capacity]),
            ready: Mutex::new(VecDeque::new()),
            ready_cond: Condvar::new(),
            held: Mutex::new(Vec::new()),
            holding: AtomicBool::new(false),
            submit_script: Mutex::new(VecDeque::new()),
            result_script: Mutex::new(VecDeque::new()),
            wait_error: Mutex::new(None),
            submit_calls: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Queues the outcome of a future `submit` call. Unscripted calls accept.
    pub fn script_submit(&self, outcome: SubmitOutcome) {
        self.submit_script.lock().push_back(outcome);
    }

    /// Overrides the result code of the next accepted operation.
    pub fn script_result(&self, res: i64) {
        self.result_script.lock().push_back(res);
    }

    /// Makes the next `get_events` call fail with `errno`.
    pub fn fail_next_wait(&self, errno: i32) {
        *self.wait_error.lock() = Some(errno);
        self.ready_cond.notify_all();
    }

    /// Keeps completions invisible to `get_events` until [`release`](Self::release).
    pub fn hold_completions(&self) {
        self.holding.store(true, Ordering::Release);
    }

    pub fn release(&self) {
        self.holding.store(false, Ordering::Release);
        let held: Vec<IoEvent> = std::mem::take(&mut *self.held.lock());
        let mut ready = self.ready.lock();
        ready.extend(held);
        self.ready_cond.notify_all();
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::Relaxed)
    }

    /// Completions produced but not yet collected.
    pub fn pending(&self) -> usize {
        self.ready.lock().len() + self.held.lock().len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn read_device(&self, offset: usize, len: usize) -> Vec<u8> {
        let device = self.device.lock();
        device[offset..offset + len].to_vec()
    }

    pub fn write_device(&self, offset: usize, data: &[u8]) {
        let mut device = self.device.lock();
        device[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Carries out a control block against the device, returning the result
    /// code the kernel would report.
    ///
    /// # Safety
    ///
    /// `iocb.aio_buf` must be valid for `iocb.aio_nbytes` bytes.
    unsafe fn service(&self, iocb: &Iocb, forced: Option<i64>) -> i64 {
        let mut device = self.device.lock();
        let capacity = device.len() as u64;
        let offset = iocb.aio_offset as u64;
        let len = iocb.aio_nbytes;
        let available = capacity.saturating_sub(offset).min(len);
        let count = match forced {
            Some(res) if res < 0 => return res,
            Some(res) => (res as u64).min(available),
            None => available,
        } as usize;
        let start = offset.min(capacity) as usize;

        let res = match iocb.aio_lio_opcode {
            IOCB_CMD_PREAD => {
                // SAFETY: guaranteed by the caller.
                let dst = unsafe { std::slice::from_raw_parts_mut(iocb.aio_buf as *mut u8, count) };
                dst.copy_from_slice(&device[start..start + count]);
                count as i64
            }
            IOCB_CMD_PWRITE => {
                // SAFETY: guaranteed by the caller.
                let src = unsafe { std::slice::from_raw_parts(iocb.aio_buf as *const u8, count) };
                device[start..start + count].copy_from_slice(src);
                count as i64
            }
            IOCB_CMD_FSYNC | IOCB_CMD_FDSYNC => 0,
            _ => -(libc::EINVAL as i64),
        };
        forced.unwrap_or(res)
    }
}

impl AioQueue for MemQueue {
    unsafe fn submit(&self, iocb: *mut Iocb) -> io::Result<usize> {
        self.submit_calls.fetch_add(1, Ordering::Relaxed);
        if self.is_destroyed() {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }

        let outcome = self
            .submit_script
            .lock()
            .pop_front()
            .unwrap_or(SubmitOutcome::Accept);
        match outcome {
            SubmitOutcome::Reject => return Ok(0),
            SubmitOutcome::Fail(errno) => return Err(io::Error::from_raw_os_error(errno)),
            SubmitOutcome::Accept => {}
        }

        // SAFETY: the caller keeps the control block alive until completion.
        let cb = unsafe { *iocb };
        let forced = self.result_script.lock().pop_front();
        // SAFETY: the caller keeps the buffer alive until completion.
        let res = unsafe { self.service(&cb, forced) };
        let event = IoEvent {
            data: cb.aio_data,
            obj: iocb as u64,
            res,
            res2: 0,
        };
        trace!(
            "MemQueue serviced opcode {} at {}: res={}",
            cb.aio_lio_opcode, cb.aio_offset, res
        );

        if self.holding.load(Ordering::Acquire) {
            self.held.lock().push(event);
        } else {
            self.ready.lock().push_back(event);
            self.ready_cond.notify_all();
        }
        Ok(1)
    }

    fn get_events(
        &self,
        min: usize,
        max: usize,
        out: &mut Vec<IoEvent>,
        timeout: Duration,
    ) -> io::Result<usize> {
        if self.is_destroyed() {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        if let Some(errno) = self.wait_error.lock().take() {
            return Err(io::Error::from_raw_os_error(errno));
        }

        let deadline = Instant::now() + timeout;
        let mut ready = self.ready.lock();
        while ready.len() < min {
            if self.ready_cond.wait_until(&mut ready, deadline).timed_out() {
                break;
            }
            if let Some(errno) = self.wait_error.lock().take() {
                return Err(io::Error::from_raw_os_error(errno));
            }
        }

        let n = ready.len().min(max);
        out.extend(ready.drain(..n));
        Ok(n)
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.ready_cond.notify_all();
    }

    fn name(&self) -> &'static str {
        "mem-queue"
    }
}
