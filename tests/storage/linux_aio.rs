use std::os::unix::fs::FileExt;
use std::sync::Arc;

use log::warn;
use tempfile::NamedTempFile;
use vdev_aio::common::config::BackendConfig;
use vdev_aio::common::exception::ZioError;
use vdev_aio::storage::abd::Abd;
use vdev_aio::storage::disk::VdevDiskAio;
use vdev_aio::storage::disk::aio::AioContext;
use vdev_aio::storage::vdev::{SpaMode, Vdev};
use vdev_aio::storage::zio::{ResumedVia, Zio, ZioWaiter};

use crate::common::logger::init_test_logger;

fn context_or_skip(config: BackendConfig) -> Option<Arc<AioContext>> {
    init_test_logger();
    match AioContext::init(config) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            warn!("skipping: kernel AIO unavailable: {}", e);
            None
        }
    }
}

#[test]
fn test_zero_depth_fails_setup() {
    init_test_logger();
    let config = BackendConfig {
        queue_depth: 0,
        ..BackendConfig::file_backed()
    };
    match AioContext::init(config) {
        Err(ZioError::AioSetup(errno)) => assert!(errno > 0),
        other => panic!("expected AioSetup, got {:?}", other),
    }
}

#[test]
fn test_file_backed_round_trip() {
    let Some(ctx) = context_or_skip(BackendConfig::file_backed()) else {
        return;
    };
    let file = NamedTempFile::new().unwrap();
    file.as_file().set_len(1 << 20).unwrap();

    let ops = Arc::new(VdevDiskAio::new(Arc::clone(&ctx)));
    let vd = Vdev::leaf(1, file.path(), SpaMode::ReadWrite, ops);
    vd.open().unwrap();

    let data: Vec<u8> = (0..8192).map(|i| (i % 241) as u8).collect();
    let (waiter, rx) = ZioWaiter::new();
    vd.io_start(Zio::write(vd.clone(), 16384, Abd::from_slice(&data), waiter).unwrap());
    let done = rx.blocking_recv().unwrap();
    assert!(done.zio.error().is_none(), "{:?}", done.zio.error());

    let (waiter, rx) = ZioWaiter::new();
    vd.io_start(Zio::flush(vd.clone(), waiter));
    let done = rx.blocking_recv().unwrap();
    assert!(done.zio.error().is_none(), "{:?}", done.zio.error());

    let mut on_disk = vec![0u8; data.len()];
    file.as_file().read_exact_at(&mut on_disk, 16384).unwrap();
    assert_eq!(on_disk, data);

    let (waiter, rx) = ZioWaiter::new();
    vd.io_start(Zio::read(vd.clone(), 16384, data.len(), waiter).unwrap());
    let done = rx.blocking_recv().unwrap();
    assert_eq!(done.via, ResumedVia::Interrupt);
    assert_eq!(done.zio.into_abd().unwrap().to_vec(), data);

    // Reading past the end of the file is short.
    let (waiter, rx) = ZioWaiter::new();
    vd.io_start(Zio::read(vd.clone(), (1 << 20) - 512, 4096, waiter).unwrap());
    let done = rx.blocking_recv().unwrap();
    assert_eq!(done.zio.error(), Some(&ZioError::NoSpace));

    ctx.shutdown();
    assert!(!ctx.is_polling());
}
