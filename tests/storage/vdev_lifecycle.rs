use std::sync::Arc;
use std::time::{Duration, Instant};

use vdev_aio::common::config::BackendConfig;
use vdev_aio::common::exception::ZioError;
use vdev_aio::storage::abd::Abd;
use vdev_aio::storage::vdev::{SpaMode, Vdev, VdevOps, VdevState};
use vdev_aio::storage::zio::{ResumedVia, Zio, ZioWaiter};

use crate::assert_zio_error;
use crate::common::backend::{DEVICE_SIZE, TestContext};

fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_reopen_keeps_handle_and_refreshes_geometry() {
    let test = TestContext::new();
    let before = test.vd.disk().unwrap();
    assert_eq!(test.vd.geometry().unwrap().psize, DEVICE_SIZE as u64);

    test.file().as_file().set_len(2 * DEVICE_SIZE as u64).unwrap();
    let geometry = crate::assert_ok!(test.vd.reopen());

    assert_eq!(geometry.psize, 2 * DEVICE_SIZE as u64);
    assert_eq!(test.vd.geometry(), Some(geometry));
    assert!(Arc::ptr_eq(&before, &test.vd.disk().unwrap()));
    assert!(!test.vd.is_reopening());
    assert_eq!(test.vd.state(), VdevState::Healthy);
}

#[test]
fn test_close_while_reopening_is_noop() {
    let test = TestContext::new();
    test.vd.set_reopening(true);
    test.ops.close(&test.vd);
    assert!(test.vd.disk().is_some());

    test.vd.set_reopening(false);
    test.vd.close();
    assert!(test.vd.disk().is_none());
    assert_eq!(test.vd.state(), VdevState::Closed);

    test.ops.close(&test.vd);
    assert!(test.vd.disk().is_none());
}

#[test]
fn test_close_with_outstanding_io() {
    let test = TestContext::new();
    test.queue.hold_completions();

    let (waiter, rx) = ZioWaiter::new();
    let zio = Zio::write(test.vd.clone(), 0, Abd::from_slice(&[5u8; 512]), waiter).unwrap();
    test.vd.io_start(zio);
    assert_eq!(test.ctx.metrics().in_flight, 1);

    test.vd.close();
    assert!(test.vd.disk().is_none());

    test.queue.release();
    let done = rx.blocking_recv().unwrap();
    assert!(done.zio.error().is_none());
    assert_eq!(test.queue.read_device(0, 512), vec![5u8; 512]);
}

#[test]
fn test_read_only_leaf() {
    let test = TestContext::new();
    let ro = Vdev::leaf(2, test.path(), SpaMode::Read, test.ops.clone());
    crate::assert_ok!(ro.open());
    assert!(!ro.disk().unwrap().is_writeable());
    assert!(test.vd.disk().unwrap().is_writeable());
}

#[test]
fn test_leaves_share_one_context() {
    let test = TestContext::new();
    let other = Vdev::leaf(2, test.path(), SpaMode::ReadWrite, test.ops.clone());
    crate::assert_ok!(other.open());

    let (waiter, rx) = ZioWaiter::new();
    other.io_start(Zio::flush(other.clone(), waiter));
    assert!(rx.blocking_recv().unwrap().zio.error().is_none());
    assert!(test.flush().zio.error().is_none());
    assert_eq!(test.queue.submit_calls(), 2);
}

#[test]
fn test_poller_fault_surfaces_on_later_requests() {
    let test = TestContext::new();
    test.queue.fail_next_wait(libc::EBADF);
    wait_until(|| test.ctx.is_faulted());
    wait_until(|| !test.ctx.is_polling());

    let done = test.write(0, &[1u8; 512]);
    assert_zio_error!(done, ZioError::PollerFaulted);
    assert_eq!(done.zio.error().unwrap().errno(), libc::EIO);
    assert_eq!(done.via, ResumedVia::Execute);
    assert_eq!(test.queue.submit_calls(), 0);
}

#[test]
fn test_interrupted_wait_is_retried() {
    let test = TestContext::new();
    test.queue.fail_next_wait(libc::EINTR);
    std::thread::sleep(Duration::from_millis(50));

    assert!(!test.ctx.is_faulted());
    assert!(test.ctx.is_polling());
    assert!(test.flush().zio.error().is_none());
}

#[test]
fn test_shutdown_joins_and_is_idempotent() {
    let test = TestContext::new();
    assert!(test.ctx.is_polling());

    test.ctx.shutdown();
    assert!(!test.ctx.is_polling());
    assert!(test.ctx.is_stopped());
    assert!(test.queue.is_destroyed());
    test.ctx.shutdown();

    let done = test.read(0, 512);
    assert_zio_error!(done, ZioError::DeviceUnavailable);
}

#[test]
fn test_shutdown_resumes_outstanding_read() {
    let test = TestContext::new();
    test.queue.write_device(8192, &[4u8; 512]);
    test.queue.hold_completions();

    let (waiter, mut rx) = ZioWaiter::new();
    test.vd.io_start(Zio::read(test.vd.clone(), 8192, 512, waiter).unwrap());
    assert_eq!(test.broker.outstanding(), 1);

    let queue = Arc::clone(&test.queue);
    let releaser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        queue.release();
    });
    test.ctx.shutdown();
    releaser.join().unwrap();

    let done = rx.try_recv().unwrap();
    assert_eq!(done.via, ResumedVia::Interrupt);
    assert_eq!(done.zio.abd().unwrap().to_vec(), vec![4u8; 512]);
    assert_eq!(test.broker.outstanding(), 0);
    assert_eq!(test.ctx.metrics().in_flight, 0);

    let disk = test.vd.disk().unwrap();
    assert_eq!(Arc::strong_count(&disk), 2);
}

#[test]
fn test_bad_path_leaves_vdev_unopened() {
    let test = TestContext::with_config(BackendConfig::file_backed());
    let vd = Vdev::leaf(3, "disk3", SpaMode::ReadWrite, test.ops.clone());
    assert_eq!(vd.open(), Err(ZioError::BadConfig));
    assert_eq!(vd.state(), VdevState::CantOpen);
    vd.close();
    assert_eq!(vd.state(), VdevState::Closed);
}

#[tokio::test]
async fn test_await_completion() {
    let test = TestContext::new();
    let (waiter, rx) = ZioWaiter::new();
    let zio = Zio::write(test.vd.clone(), 4096, Abd::from_slice(&[8u8; 4096]), waiter).unwrap();
    test.vd.io_start(zio);

    let done = rx.await.unwrap();
    assert!(done.zio.error().is_none());
    assert_eq!(done.via, ResumedVia::Execute);
}
