//! # Shared AIO context
//!
//! One [`AioContext`] serves every disk leaf of a backend. It owns the OS
//! facility queue, the completion poller thread, the interrupt taskq, the
//! buffer broker and the metrics. Leaves receive it by `Arc` at construction.
//!
//! Lifecycle:
//!
//! 1. [`AioContext::init`] creates the kernel queue, starts the taskq and the
//!    poller. A failure here starts nothing.
//! 2. [`AioContext::submit`] turns a request into a task and hands it to the
//!    facility; the poller completes it.
//! 3. [`AioContext::shutdown`] stops the poller, waits for it to collect
//!    outstanding completions, drains the taskq and destroys the queue. It is
//!    idempotent and runs again on drop.
//!
//! Shutdown first drains operations the facility already accepted, bounded
//! by `drain_timeout`. Operations still outstanding past that deadline are
//! abandoned: their buffers may still be written by the kernel, so neither
//! the task nor the buffer is reclaimed and the request is not resumed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;

use crate::common::config::BackendConfig;
use crate::common::exception::ZioError;
use crate::storage::abd::{AbdBroker, BufferBroker};
use crate::storage::disk::direct_io::DiskHandle;
use crate::storage::zio::{Zio, ZioOp};

use super::completion::return_buffer;
use super::linux::LinuxAio;
use super::metrics::{AioMetrics, AioMetricsSnapshot};
use super::poller;
use super::queue::AioQueue;
use super::task::AioTask;
use super::taskq::InterruptTaskq;

/// State shared between the context and its poller thread.
pub(crate) struct AioShared {
    pub(crate) config: BackendConfig,
    pub(crate) queue: Arc<dyn AioQueue>,
    pub(crate) broker: Arc<dyn BufferBroker>,
    pub(crate) metrics: AioMetrics,
    pub(crate) taskq: InterruptTaskq,
    pub(crate) stop: AtomicBool,
    pub(crate) polling: AtomicBool,
    pub(crate) faulted: AtomicBool,
}

pub struct AioContext {
    shared: Arc<AioShared>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl AioContext {
    /// Creates the kernel AIO queue and starts the poller.
    pub fn init(config: BackendConfig) -> Result<Arc<Self>, ZioError> {
        let queue = match LinuxAio::setup(config.queue_depth) {
            Ok(queue) => queue,
            Err(e) => {
                let errno = e.raw_os_error().unwrap_or(libc::EIO);
                error!(
                    "Failed to create AIO context with depth {}: {}",
                    config.queue_depth, e
                );
                return Err(ZioError::AioSetup(errno));
            }
        };
        let broker = Arc::new(AbdBroker::new(config.buffer_alignment));
        Self::with_queue(config, Arc::new(queue), broker)
    }

    /// Starts a context on an existing facility queue.
    pub fn with_queue(
        config: BackendConfig,
        queue: Arc<dyn AioQueue>,
        broker: Arc<dyn BufferBroker>,
    ) -> Result<Arc<Self>, ZioError> {
        let taskq = InterruptTaskq::new(config.interrupt_threads).map_err(|e| {
            error!("Failed to start interrupt taskq: {}", e);
            queue.destroy();
            ZioError::AioSetup(e.raw_os_error().unwrap_or(libc::EAGAIN))
        })?;

        let shared = Arc::new(AioShared {
            config,
            queue,
            broker,
            metrics: AioMetrics::new(),
            taskq,
            stop: AtomicBool::new(false),
            polling: AtomicBool::new(true),
            faulted: AtomicBool::new(false),
        });

        let handle = match poller::spawn(Arc::clone(&shared)) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to start AIO poller: {}", e);
                shared.polling.store(false, Ordering::Release);
                shared.taskq.shutdown();
                shared.queue.destroy();
                return Err(ZioError::AioSetup(e.raw_os_error().unwrap_or(libc::EAGAIN)));
            }
        };

        info!(
            "AIO context started on {} (depth {}, {} interrupt threads)",
            shared.queue.name(),
            shared.config.queue_depth,
            shared.config.interrupt_threads
        );
        Ok(Arc::new(Self {
            shared,
            poller: Mutex::new(Some(handle)),
        }))
    }

    pub fn config(&self) -> &BackendConfig {
        &self.shared.config
    }

    pub fn broker(&self) -> &Arc<dyn BufferBroker> {
        &self.shared.broker
    }

    pub fn metrics(&self) -> AioMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn is_polling(&self) -> bool {
        self.shared.polling.load(Ordering::Acquire)
    }

    /// Whether the poller died on an unexpected error.
    pub fn is_faulted(&self) -> bool {
        self.shared.faulted.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stop.load(Ordering::SeqCst)
    }

    /// Submits a read, write or flush on `disk`.
    ///
    /// The request is always resumed: by the poller once the operation
    /// completes, or synchronously here through `execute` when it never
    /// reaches the facility.
    pub fn submit(&self, mut zio: Zio, disk: Arc<DiskHandle>) {
        // Counted before the stop check, so a draining poller waits for it.
        self.shared.metrics.record_submit();
        if let Some(error) = self.check_available() {
            self.shared.metrics.record_rejected();
            zio.set_error(error);
            zio.execute();
            return;
        }

        let broker = self.shared.broker.as_ref();
        let size = zio.size();
        let buf = match zio.op() {
            ZioOp::Read(abd) => Some(broker.borrow_for_read(abd, size)),
            ZioOp::Write(abd) => Some(broker.borrow_for_write(abd, size)),
            _ => None,
        };

        let raw = AioTask::into_raw(AioTask::new(zio, buf, disk));
        // SAFETY: the task stays leaked until the poller reclaims it, which
        // keeps the control block and its buffer in place while in flight.
        let result = unsafe { self.shared.queue.submit(AioTask::iocb_ptr(raw)) };

        let error = match result {
            // The poller owns the task now.
            Ok(n) if n > 0 => return,
            Ok(_) => ZioError::Transient(libc::EAGAIN),
            Err(e) => ZioError::transient(&e),
        };

        // SAFETY: the facility did not accept the control block, so nothing
        // else can reclaim the task.
        let task = unsafe { AioTask::from_raw(raw as u64) };
        self.shared.metrics.record_submit_failure();

        let AioTask { mut zio, buf, .. } = *task;
        warn!("AIO submit failed for zio {}: {}", zio.id(), error);
        return_buffer(&mut zio, buf, broker, false);
        zio.set_error(error);
        zio.execute();
    }

    fn check_available(&self) -> Option<ZioError> {
        if self.is_faulted() {
            Some(ZioError::PollerFaulted)
        } else if self.is_stopped() {
            Some(ZioError::DeviceUnavailable)
        } else {
            None
        }
    }

    /// Stops the poller, drains the interrupt taskq and destroys the queue.
    ///
    /// The poller keeps collecting completions for operations the facility
    /// already accepted, for up to `drain_timeout`, so their requests are
    /// resumed and their buffers returned before this returns.
    pub fn shutdown(&self) {
        let already_stopped = self.shared.stop.swap(true, Ordering::SeqCst);
        if !already_stopped {
            info!("Shutting down AIO context");
        }

        if let Some(handle) = self.poller.lock().take() {
            // The poller may drop the last reference to the context while
            // resuming a request. It drains and destroys the queue on its own.
            if handle.thread().id() == thread::current().id() {
                debug!("AIO context released on poller thread; not joining");
            } else if let Err(e) = handle.join() {
                error!("AIO poller panicked: {:?}", e);
                self.shared.polling.store(false, Ordering::Release);
            }
        }

        self.shared.taskq.shutdown();
        if self.is_polling() {
            return;
        }
        self.shared.queue.destroy();

        if !already_stopped {
            let snap = self.metrics();
            trace!("AIO context final metrics: {:?}", snap);
            if snap.in_flight > 0 {
                warn!(
                    "AIO context stopped with {} operations outstanding",
                    snap.in_flight
                );
            }
        }
    }
}

impl Drop for AioContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AioContext")
            .field("queue", &self.shared.queue.name())
            .field("polling", &self.is_polling())
            .field("faulted", &self.is_faulted())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
