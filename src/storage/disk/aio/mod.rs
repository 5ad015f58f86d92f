//! # Disk AIO backend
//!
//! Asynchronous I/O for disk leaves over a single shared kernel AIO context.
//!
//! ```text
//!   VdevDiskAio::io_start
//!        │ borrow buffer, build AioTask, submit
//!        ▼
//!   AioQueue (LinuxAio | MemQueue)
//!        │ get_events, bounded wait
//!        ▼
//!   poller thread ── aio_done ──► write / flush: zio.execute()
//!                             └─► read: InterruptTaskq ─► zio.interrupt()
//! ```

pub mod completion;
pub mod context;
pub mod linux;
pub mod mem_queue;
pub mod metrics;
mod poller;
pub mod queue;
mod task;
pub mod taskq;

pub use completion::{ResumePath, resume_path};
pub use context::AioContext;
pub use linux::LinuxAio;
pub use mem_queue::{MemQueue, SubmitOutcome};
pub use metrics::{AioMetrics, AioMetricsSnapshot};
pub use queue::{AioQueue, IoEvent, Iocb};
pub use taskq::InterruptTaskq;
