//! # I/O requests
//!
//! A [`Zio`] is one unit of work handed to a leaf vdev: a read, a write, a
//! control (ioctl) request, or one of the kinds a disk leaf does not service
//! (free, claim). The request carries its byte range, its data buffer, the
//! vdev it targets and a mutable error status. When the leaf is done with it,
//! the request is handed back through one of the two entry points of its
//! [`ZioPipeline`]:
//!
//! | Entry point  | Used for                                               |
//! |--------------|--------------------------------------------------------|
//! | `execute`    | cheap continuations, run on the completing thread      |
//! | `interrupt`  | continuations with heavy downstream work (checksums)   |
//!
//! A `Zio` is moved into the leaf and moved back out to the pipeline, so it
//! is resumed at most once.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::common::exception::ZioError;
use crate::storage::abd::Abd;
use crate::storage::vdev::Vdev;

static NEXT_ZIO_ID: AtomicU64 = AtomicU64::new(1);

/// Control operations a leaf may be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZioCmd {
    FlushWriteCache,
    Trim,
}

/// Kind of a request, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZioType {
    Read,
    Write,
    Free,
    Claim,
    Ioctl,
}

/// The operation a request performs, with the fields each kind requires.
#[derive(Debug)]
pub enum ZioOp {
    Read(Abd),
    Write(Abd),
    Free,
    Claim,
    Ioctl(ZioCmd),
}

impl ZioOp {
    pub fn zio_type(&self) -> ZioType {
        match self {
            ZioOp::Read(_) => ZioType::Read,
            ZioOp::Write(_) => ZioType::Write,
            ZioOp::Free => ZioType::Free,
            ZioOp::Claim => ZioType::Claim,
            ZioOp::Ioctl(_) => ZioType::Ioctl,
        }
    }
}

/// Continuation that receives a finished request.
pub trait ZioPipeline: Send + Sync {
    /// Resume the request directly on the calling thread.
    fn execute(&self, zio: Zio);

    /// Resume the request through the interrupt path.
    fn interrupt(&self, zio: Zio);
}

pub struct Zio {
    id: u64,
    op: ZioOp,
    offset: u64,
    size: usize,
    vd: Arc<Vdev>,
    error: Option<ZioError>,
    pipeline: Arc<dyn ZioPipeline>,
}

impl Zio {
    fn new(
        vd: Arc<Vdev>,
        op: ZioOp,
        offset: u64,
        size: usize,
        pipeline: Arc<dyn ZioPipeline>,
    ) -> Self {
        Self {
            id: NEXT_ZIO_ID.fetch_add(1, Ordering::Relaxed),
            op,
            offset,
            size,
            vd,
            error: None,
            pipeline,
        }
    }

    /// Builds a read of `size` bytes at `offset` into a fresh buffer.
    pub fn read(
        vd: Arc<Vdev>,
        offset: u64,
        size: usize,
        pipeline: Arc<dyn ZioPipeline>,
    ) -> Result<Self, ZioError> {
        Self::read_into(vd, offset, Abd::alloc_linear(size), pipeline)
    }

    /// Builds a read that fills `abd`; the read size is the buffer size.
    pub fn read_into(
        vd: Arc<Vdev>,
        offset: u64,
        abd: Abd,
        pipeline: Arc<dyn ZioPipeline>,
    ) -> Result<Self, ZioError> {
        let size = abd.size();
        validate_range(offset, size)?;
        Ok(Self::new(vd, ZioOp::Read(abd), offset, size, pipeline))
    }

    /// Builds a write of the whole of `abd` at `offset`.
    pub fn write(
        vd: Arc<Vdev>,
        offset: u64,
        abd: Abd,
        pipeline: Arc<dyn ZioPipeline>,
    ) -> Result<Self, ZioError> {
        let size = abd.size();
        validate_range(offset, size)?;
        Ok(Self::new(vd, ZioOp::Write(abd), offset, size, pipeline))
    }

    pub fn ioctl(vd: Arc<Vdev>, cmd: ZioCmd, pipeline: Arc<dyn ZioPipeline>) -> Self {
        Self::new(vd, ZioOp::Ioctl(cmd), 0, 0, pipeline)
    }

    pub fn flush(vd: Arc<Vdev>, pipeline: Arc<dyn ZioPipeline>) -> Self {
        Self::ioctl(vd, ZioCmd::FlushWriteCache, pipeline)
    }

    pub fn free(
        vd: Arc<Vdev>,
        offset: u64,
        size: usize,
        pipeline: Arc<dyn ZioPipeline>,
    ) -> Result<Self, ZioError> {
        validate_range(offset, size)?;
        Ok(Self::new(vd, ZioOp::Free, offset, size, pipeline))
    }

    pub fn claim(
        vd: Arc<Vdev>,
        offset: u64,
        size: usize,
        pipeline: Arc<dyn ZioPipeline>,
    ) -> Result<Self, ZioError> {
        validate_range(offset, size)?;
        Ok(Self::new(vd, ZioOp::Claim, offset, size, pipeline))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn zio_type(&self) -> ZioType {
        self.op.zio_type()
    }

    pub fn op(&self) -> &ZioOp {
        &self.op
    }

    pub fn op_mut(&mut self) -> &mut ZioOp {
        &mut self.op
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn vd(&self) -> &Arc<Vdev> {
        &self.vd
    }

    pub fn error(&self) -> Option<&ZioError> {
        self.error.as_ref()
    }

    pub fn set_error(&mut self, error: ZioError) {
        self.error = Some(error);
    }

    /// Data buffer of a read or write, if the request has one.
    pub fn abd(&self) -> Option<&Abd> {
        match &self.op {
            ZioOp::Read(abd) | ZioOp::Write(abd) => Some(abd),
            _ => None,
        }
    }

    /// Consumes the request and returns its data buffer.
    pub fn into_abd(self) -> Option<Abd> {
        match self.op {
            ZioOp::Read(abd) | ZioOp::Write(abd) => Some(abd),
            _ => None,
        }
    }

    /// Hands the request to its pipeline's synchronous continuation.
    pub fn execute(self) {
        let pipeline = Arc::clone(&self.pipeline);
        pipeline.execute(self);
    }

    /// Hands the request to its pipeline's interrupt continuation.
    pub fn interrupt(self) {
        let pipeline = Arc::clone(&self.pipeline);
        pipeline.interrupt(self);
    }
}

impl fmt::Debug for Zio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zio")
            .field("id", &self.id)
            .field("type", &self.zio_type())
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("vdev", &self.vd.guid())
            .field("error", &self.error)
            .finish()
    }
}

fn validate_range(offset: u64, size: usize) -> Result<(), ZioError> {
    if size == 0 {
        return Err(ZioError::InvalidRequest("zero-length transfer".into()));
    }
    if offset.checked_add(size as u64).is_none() {
        return Err(ZioError::InvalidRequest(format!(
            "range {}+{} overflows",
            offset, size
        )));
    }
    Ok(())
}

/// Which pipeline entry point resumed a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumedVia {
    Execute,
    Interrupt,
}

/// A request handed back by the leaf, tagged with how it was resumed.
#[derive(Debug)]
pub struct ZioCompletion {
    pub zio: Zio,
    pub via: ResumedVia,
}

/// Pipeline that forwards the finished request over a oneshot channel, for
/// callers that want to block on or `.await` a single request.
#[derive(Debug)]
pub struct ZioWaiter {
    sender: Mutex<Option<oneshot::Sender<ZioCompletion>>>,
}

impl ZioWaiter {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<ZioCompletion>) {
        let (sender, receiver) = oneshot::channel();
        let waiter = Arc::new(Self {
            sender: Mutex::new(Some(sender)),
        });
        (waiter, receiver)
    }

    fn deliver(&self, zio: Zio, via: ResumedVia) {
        let sender = self.sender.lock().take();
        match sender {
            // The caller may have stopped waiting.
            Some(sender) => {
                let _ = sender.send(ZioCompletion { zio, via });
            }
            None => log::warn!("zio {} resumed more than once", zio.id()),
        }
    }
}

impl ZioPipeline for ZioWaiter {
    fn execute(&self, zio: Zio) {
        self.deliver(zio, ResumedVia::Execute);
    }

    fn interrupt(&self, zio: Zio) {
        self.deliver(zio, ResumedVia::Interrupt);
    }
}
