//! Completion processing: turn a facility result into a request status,
//! hand the scratch buffer back and resume the request.

use log::trace;

use crate::common::exception::ZioError;
use crate::common::time::gethrtime;
use crate::storage::abd::{AlignedBuf, BufferBroker};
use crate::storage::zio::{Zio, ZioOp, ZioType};

use super::metrics::AioMetrics;
use super::task::AioTask;
use super::taskq::InterruptTaskq;

/// How a finished request re-enters the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePath {
    /// `execute` on the completing thread.
    Inline,
    /// `interrupt` on the interrupt taskq.
    Deferred,
}

/// Reads verify checksums downstream, so they leave the poller thread.
pub fn resume_path(zio_type: ZioType) -> ResumePath {
    match zio_type {
        ZioType::Read => ResumePath::Deferred,
        _ => ResumePath::Inline,
    }
}

/// Returns a borrowed scratch buffer to the broker. A read buffer is copied
/// into the request's ABD only when `populated`.
pub(crate) fn return_buffer(
    zio: &mut Zio,
    buf: Option<AlignedBuf>,
    broker: &dyn BufferBroker,
    populated: bool,
) {
    let Some(buf) = buf else { return };
    let len = zio.size();
    match zio.op_mut() {
        ZioOp::Read(abd) => broker.return_after_read(abd, buf, len, populated),
        ZioOp::Write(abd) => broker.return_after_write(abd, buf, len),
        // Only reads and writes borrow.
        _ => drop(buf),
    }
}

/// Classifies the result code of a finished operation.
pub fn classify(zio_type: ZioType, size: usize, res: i64) -> Option<ZioError> {
    match zio_type {
        ZioType::Ioctl if res != 0 => Some(ZioError::from_completion(res)),
        ZioType::Ioctl => None,
        _ if res < 0 => Some(ZioError::from_completion(res)),
        _ if res as u64 != size as u64 => Some(ZioError::NoSpace),
        _ => None,
    }
}

/// Finishes one collected operation and frees its task.
pub(crate) fn aio_done(
    task: Box<AioTask>,
    res: i64,
    broker: &dyn BufferBroker,
    metrics: &AioMetrics,
    taskq: &InterruptTaskq,
) {
    let AioTask {
        mut zio,
        buf,
        disk,
        submitted_at,
        ..
    } = *task;

    let zio_type = zio.zio_type();
    return_buffer(&mut zio, buf, broker, true);

    let error = classify(zio_type, zio.size(), res);
    let latency = gethrtime().saturating_sub(submitted_at);
    metrics.record_completion(zio_type, zio.size() as u64, latency, error.is_some());
    trace!(
        "AIO completion for zio {} ({:?}): res={} latency={}",
        zio.id(),
        zio_type,
        res,
        latency
    );
    if let Some(error) = error {
        zio.set_error(error);
    }

    match resume_path(zio_type) {
        ResumePath::Inline => zio.execute(),
        ResumePath::Deferred => taskq.dispatch(zio),
    }
    drop(disk);
}
