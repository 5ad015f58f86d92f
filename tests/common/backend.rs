use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tempfile::NamedTempFile;
use vdev_aio::common::config::BackendConfig;
use vdev_aio::storage::abd::{Abd, AbdBroker};
use vdev_aio::storage::disk::VdevDiskAio;
use vdev_aio::storage::disk::aio::{AioContext, MemQueue};
use vdev_aio::storage::vdev::{SpaMode, Vdev};
use vdev_aio::storage::zio::{ResumedVia, Zio, ZioCompletion, ZioPipeline, ZioWaiter};

use super::logger::init_test_logger;

pub const DEVICE_SIZE: usize = 4 << 20;
pub const RESUME_TIMEOUT: Duration = Duration::from_secs(5);

/// One disk leaf backed by a temporary file, serviced by an in-memory
/// facility.
pub struct TestContext {
    pub ctx: Arc<AioContext>,
    pub queue: Arc<MemQueue>,
    pub broker: Arc<AbdBroker>,
    pub ops: Arc<VdevDiskAio>,
    pub vd: Arc<Vdev>,
    file: NamedTempFile,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(BackendConfig::file_backed())
    }

    pub fn with_config(config: BackendConfig) -> Self {
        init_test_logger();

        let file = NamedTempFile::new().unwrap();
        file.as_file().set_len(DEVICE_SIZE as u64).unwrap();

        let queue = Arc::new(MemQueue::new(DEVICE_SIZE));
        let broker = Arc::new(AbdBroker::new(config.buffer_alignment));
        let config = BackendConfig {
            poll_interval: Duration::from_millis(10),
            interrupt_threads: 2,
            ..config
        };
        let ctx = AioContext::with_queue(config, queue.clone(), broker.clone()).unwrap();
        let ops = Arc::new(VdevDiskAio::new(Arc::clone(&ctx)));
        let vd = Vdev::leaf(1, file.path(), SpaMode::ReadWrite, ops.clone());
        vd.open().unwrap();

        Self {
            ctx,
            queue,
            broker,
            ops,
            vd,
            file,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.file.path().to_path_buf()
    }

    pub fn file(&self) -> &NamedTempFile {
        &self.file
    }

    /// Starts `build`'s request on the leaf and waits for it to be resumed.
    pub fn run(&self, build: impl FnOnce(Arc<Vdev>, Arc<dyn ZioPipeline>) -> Zio) -> ZioCompletion {
        let (waiter, rx) = ZioWaiter::new();
        let pipeline: Arc<dyn ZioPipeline> = waiter;
        let zio = build(Arc::clone(&self.vd), pipeline);
        self.vd.io_start(zio);
        rx.blocking_recv().unwrap()
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> ZioCompletion {
        self.run(|vd, p| Zio::write(vd, offset, Abd::from_slice(data), p).unwrap())
    }

    pub fn read(&self, offset: u64, len: usize) -> ZioCompletion {
        self.run(|vd, p| Zio::read(vd, offset, len, p).unwrap())
    }

    pub fn flush(&self) -> ZioCompletion {
        self.run(Zio::flush)
    }
}

/// What an [`ObservingPipeline`] saw when a request was resumed.
#[derive(Debug)]
pub struct Observed {
    pub zio: Zio,
    pub via: ResumedVia,
    pub outstanding_buffers: usize,
    pub thread: Option<String>,
}

/// Pipeline that records the broker's outstanding loans and the resuming
/// thread at the moment each request comes back.
pub struct ObservingPipeline {
    broker: Arc<AbdBroker>,
    tx: Sender<Observed>,
}

impl ObservingPipeline {
    pub fn new(broker: Arc<AbdBroker>) -> (Arc<Self>, Receiver<Observed>) {
        let (tx, rx) = unbounded();
        (Arc::new(Self { broker, tx }), rx)
    }

    fn observe(&self, zio: Zio, via: ResumedVia) {
        let observed = Observed {
            zio,
            via,
            outstanding_buffers: self.broker.outstanding(),
            thread: std::thread::current().name().map(str::to_string),
        };
        let _ = self.tx.send(observed);
    }
}

impl ZioPipeline for ObservingPipeline {
    fn execute(&self, zio: Zio) {
        self.observe(zio, ResumedVia::Execute);
    }

    fn interrupt(&self, zio: Zio) {
        self.observe(zio, ResumedVia::Interrupt);
    }
}
