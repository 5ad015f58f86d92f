use vdev_aio::common::config::BackendConfig;
use vdev_aio::common::exception::ZioError;
use vdev_aio::storage::disk::aio::SubmitOutcome;
use vdev_aio::storage::zio::ResumedVia;

use crate::common::backend::TestContext;
use crate::{assert_zio_error, assert_zio_ok};

#[test]
fn test_write_lands_on_device() {
    let test = TestContext::new();
    let data: Vec<u8> = (0..512).map(|i| (i % 256) as u8).collect();

    let done = test.write(4096, &data);

    assert_zio_ok!(done);
    assert_eq!(done.via, ResumedVia::Execute);
    assert_eq!(test.queue.read_device(4096, 512), data);
    assert_eq!(test.broker.outstanding(), 0);
}

#[test]
fn test_short_read_is_out_of_space() {
    let test = TestContext::new();
    test.queue.script_result(2048);

    let done = test.read(0, 4096);

    assert_zio_error!(done, ZioError::NoSpace);
    assert_eq!(done.zio.error().unwrap().errno(), libc::ENOSPC);
    assert_eq!(done.via, ResumedVia::Interrupt);
    assert_eq!(test.broker.outstanding(), 0);
}

#[test]
fn test_flush_disabled_never_reaches_facility() {
    let test = TestContext::with_config(BackendConfig {
        nocacheflush: true,
        ..BackendConfig::file_backed()
    });

    let done = test.flush();

    assert_zio_ok!(done);
    assert_eq!(done.via, ResumedVia::Execute);
    assert_eq!(test.queue.submit_calls(), 0);
}

#[test]
fn test_saturated_queue_is_transient() {
    let test = TestContext::new();
    test.queue.script_submit(SubmitOutcome::Reject);

    let done = test.write(0, &[1u8; 512]);

    assert_zio_error!(done, ZioError::Transient(libc::EAGAIN));
    assert_eq!(done.via, ResumedVia::Execute);
    assert_eq!(test.queue.submit_calls(), 1);
    assert_eq!(test.queue.read_device(0, 512), vec![0u8; 512]);
    assert_eq!(test.broker.outstanding(), 0);
}

#[test]
fn test_submit_errno_is_propagated() {
    let test = TestContext::new();
    test.queue.script_submit(SubmitOutcome::Fail(libc::EBADF));

    let done = test.read(0, 512);

    assert_zio_error!(done, ZioError::Transient(libc::EBADF));
    assert_eq!(done.via, ResumedVia::Execute);
    assert_eq!(done.zio.abd().unwrap().to_vec(), vec![0u8; 512]);
    assert_eq!(test.broker.outstanding(), 0);
}

#[test]
fn test_negative_completion_is_io_error() {
    let test = TestContext::new();
    test.queue.script_result(-(libc::EIO as i64));

    let done = test.write(8192, &[7u8; 1024]);

    assert_zio_error!(done, ZioError::Io(libc::EIO));
    assert_eq!(done.via, ResumedVia::Execute);

    test.queue.script_result(-(libc::EIO as i64));
    let done = test.flush();
    assert_zio_error!(done, ZioError::Io(libc::EIO));
}

#[test]
fn test_read_after_write() {
    let test = TestContext::new();
    let data = vec![0xA5u8; 8192];

    assert_zio_ok!(test.write(65536, &data));
    let done = test.read(65536, 8192);

    assert_zio_ok!(done);
    assert_eq!(done.zio.into_abd().unwrap().to_vec(), data);

    let snap = test.ctx.metrics();
    assert_eq!(snap.submitted, 2);
    assert_eq!(snap.completed, 2);
    assert_eq!(snap.bytes_read, 8192);
    assert_eq!(snap.bytes_written, 8192);
    assert_eq!(snap.in_flight, 0);
}
