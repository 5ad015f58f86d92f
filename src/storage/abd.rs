//! # ABD: abstract data buffers
//!
//! An [`Abd`] is the data buffer attached to a read or write request. It is
//! either one linear allocation or a list of fixed-size chunks. The device
//! never sees an `Abd` directly: for every transfer the [`BufferBroker`] lends
//! a linear, suitably aligned [`AlignedBuf`] and takes it back at completion.
//!
//! ```text
//!   write:  Abd ──borrow_for_write (copy)──► AlignedBuf ──► device
//!           Abd ◄──return_after_write (discard)── AlignedBuf
//!
//!   read:   Abd ──borrow_for_read──► AlignedBuf ◄── device
//!           Abd ◄──return_after_read (copy if populated)── AlignedBuf
//! ```

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use log::trace;

use crate::common::config::{ABD_CHUNK_SIZE, DIRECT_IO_ALIGNMENT};

/// Data buffer owned by a request.
#[derive(Clone, PartialEq, Eq)]
pub enum Abd {
    Linear(Vec<u8>),
    Scatter { chunks: Vec<Vec<u8>>, size: usize },
}

impl Abd {
    pub fn alloc_linear(size: usize) -> Self {
        Abd::Linear(vec![0u8; size])
    }

    pub fn alloc_scatter(size: usize) -> Self {
        let mut chunks = Vec::with_capacity(size.div_ceil(ABD_CHUNK_SIZE));
        let mut remaining = size;
        while remaining > 0 {
            let len = remaining.min(ABD_CHUNK_SIZE);
            chunks.push(vec![0u8; len]);
            remaining -= len;
        }
        Abd::Scatter { chunks, size }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Abd::Linear(data.to_vec())
    }

    pub fn size(&self) -> usize {
        match self {
            Abd::Linear(buf) => buf.len(),
            Abd::Scatter { size, .. } => *size,
        }
    }

    pub fn is_linear(&self) -> bool {
        matches!(self, Abd::Linear(_))
    }

    /// Copies the first `dst.len()` bytes of the buffer into `dst`.
    pub fn copy_to_buf(&self, dst: &mut [u8]) {
        assert!(dst.len() <= self.size(), "copy past end of abd");
        match self {
            Abd::Linear(buf) => dst.copy_from_slice(&buf[..dst.len()]),
            Abd::Scatter { chunks, .. } => {
                let mut off = 0;
                for chunk in chunks {
                    if off == dst.len() {
                        break;
                    }
                    let n = chunk.len().min(dst.len() - off);
                    dst[off..off + n].copy_from_slice(&chunk[..n]);
                    off += n;
                }
            }
        }
    }

    /// Overwrites the first `src.len()` bytes of the buffer with `src`.
    pub fn copy_from_buf(&mut self, src: &[u8]) {
        assert!(src.len() <= self.size(), "copy past end of abd");
        match self {
            Abd::Linear(buf) => buf[..src.len()].copy_from_slice(src),
            Abd::Scatter { chunks, .. } => {
                let mut off = 0;
                for chunk in chunks {
                    if off == src.len() {
                        break;
                    }
                    let n = chunk.len().min(src.len() - off);
                    chunk[..n].copy_from_slice(&src[off..off + n]);
                    off += n;
                }
            }
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.size()];
        self.copy_to_buf(&mut out);
        out
    }
}

impl fmt::Debug for Abd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Abd::Linear(buf) => f.debug_struct("Abd::Linear").field("size", &buf.len()).finish(),
            Abd::Scatter { chunks, size } => f
                .debug_struct("Abd::Scatter")
                .field("size", size)
                .field("chunks", &chunks.len())
                .finish(),
        }
    }
}

/// Zeroed heap memory aligned for direct I/O.
///
/// The memory is handed to the kernel by raw pointer, so it must not move
/// while an operation is in flight; it never reallocates.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// The buffer is plain bytes with a single owner.
unsafe impl Send for AlignedBuf {}

impl AlignedBuf {
    /// Allocates `len` zeroed bytes aligned to `align`, rounded up to a power
    /// of two. Allocation failure aborts the process.
    pub fn zeroed(len: usize, align: usize) -> Self {
        let align = align.max(1).next_power_of_two();
        let layout = match Layout::from_size_align(len.max(1), align) {
            Ok(layout) => layout,
            Err(e) => panic!("buffer of {} bytes cannot be aligned to {}: {}", len, align, e),
        };
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(layout),
        };
        Self { ptr, len, layout }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len initialized bytes for the life of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with exactly this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuf")
            .field("len", &self.len)
            .field("align", &self.layout.align())
            .field("ptr", &self.ptr)
            .finish()
    }
}

/// Lends linear scratch memory for a request's transfer and takes it back.
///
/// Every borrowed buffer must come back through exactly one `return_*` call.
pub trait BufferBroker: Send + Sync {
    /// Borrows a buffer holding a copy of the first `len` bytes of `abd`.
    fn borrow_for_write(&self, abd: &Abd, len: usize) -> AlignedBuf;

    /// Borrows a destination buffer of `len` bytes.
    fn borrow_for_read(&self, abd: &Abd, len: usize) -> AlignedBuf;

    /// Returns a write buffer; its contents are no longer needed.
    fn return_after_write(&self, abd: &Abd, buf: AlignedBuf, len: usize);

    /// Returns a read buffer, copying it into `abd` when `populated`.
    fn return_after_read(&self, abd: &mut Abd, buf: AlignedBuf, len: usize, populated: bool);
}

/// Broker that allocates a fresh aligned buffer per borrow and keeps
/// counters of outstanding loans.
#[derive(Debug)]
pub struct AbdBroker {
    alignment: usize,
    outstanding: AtomicUsize,
    total_borrowed: AtomicU64,
    total_returned: AtomicU64,
}

impl AbdBroker {
    /// Creates a broker lending buffers aligned to `alignment`, rounded up
    /// to a power of two.
    pub fn new(alignment: usize) -> Self {
        Self {
            alignment: alignment.max(1).next_power_of_two(),
            outstanding: AtomicUsize::new(0),
            total_borrowed: AtomicU64::new(0),
            total_returned: AtomicU64::new(0),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn total_borrowed(&self) -> u64 {
        self.total_borrowed.load(Ordering::Relaxed)
    }

    pub fn total_returned(&self) -> u64 {
        self.total_returned.load(Ordering::Relaxed)
    }

    fn lend(&self, len: usize) -> AlignedBuf {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.total_borrowed.fetch_add(1, Ordering::Relaxed);
        AlignedBuf::zeroed(len, self.alignment)
    }

    fn reclaim(&self, buf: AlignedBuf) {
        let prev = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "buffer returned more times than borrowed");
        self.total_returned.fetch_add(1, Ordering::Relaxed);
        drop(buf);
    }
}

impl Default for AbdBroker {
    fn default() -> Self {
        Self::new(DIRECT_IO_ALIGNMENT)
    }
}

impl BufferBroker for AbdBroker {
    fn borrow_for_write(&self, abd: &Abd, len: usize) -> AlignedBuf {
        let mut buf = self.lend(len);
        abd.copy_to_buf(buf.as_mut_slice());
        trace!("Borrowed {} byte write buffer at {:p}", len, buf.as_ptr());
        buf
    }

    fn borrow_for_read(&self, _abd: &Abd, len: usize) -> AlignedBuf {
        let buf = self.lend(len);
        trace!("Borrowed {} byte read buffer at {:p}", len, buf.as_ptr());
        buf
    }

    fn return_after_write(&self, _abd: &Abd, buf: AlignedBuf, len: usize) {
        debug_assert_eq!(buf.len(), len);
        self.reclaim(buf);
    }

    fn return_after_read(&self, abd: &mut Abd, buf: AlignedBuf, len: usize, populated: bool) {
        debug_assert_eq!(buf.len(), len);
        if populated {
            abd.copy_from_buf(&buf.as_slice()[..len]);
        }
        self.reclaim(buf);
    }
}
