use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use vdev_aio::storage::abd::Abd;
use vdev_aio::storage::zio::{ResumedVia, Zio};

use crate::common::backend::{ObservingPipeline, RESUME_TIMEOUT, TestContext};

#[test]
fn test_buffers_returned_before_resume() {
    let test = TestContext::new();
    let (pipeline, rx) = ObservingPipeline::new(test.broker.clone());

    let write = Zio::write(test.vd.clone(), 0, Abd::from_slice(&[1u8; 4096]), pipeline.clone()).unwrap();
    test.vd.io_start(write);
    let observed = rx.recv_timeout(RESUME_TIMEOUT).unwrap();
    assert_eq!(observed.outstanding_buffers, 0);

    let read = Zio::read(test.vd.clone(), 0, 4096, pipeline).unwrap();
    test.vd.io_start(read);
    let observed = rx.recv_timeout(RESUME_TIMEOUT).unwrap();
    assert_eq!(observed.outstanding_buffers, 0);
    assert_eq!(observed.zio.abd().unwrap().to_vec(), vec![1u8; 4096]);
}

#[test]
fn test_resume_threads() {
    let test = TestContext::new();
    let (pipeline, rx) = ObservingPipeline::new(test.broker.clone());

    test.vd
        .io_start(Zio::write(test.vd.clone(), 0, Abd::alloc_linear(512), pipeline.clone()).unwrap());
    let write = rx.recv_timeout(RESUME_TIMEOUT).unwrap();
    assert_eq!(write.via, ResumedVia::Execute);
    assert_eq!(write.thread.as_deref(), Some("vdev_disk_aio"));

    test.vd.io_start(Zio::flush(test.vd.clone(), pipeline.clone()));
    let flush = rx.recv_timeout(RESUME_TIMEOUT).unwrap();
    assert_eq!(flush.via, ResumedVia::Execute);
    assert_eq!(flush.thread.as_deref(), Some("vdev_disk_aio"));

    test.vd
        .io_start(Zio::read(test.vd.clone(), 0, 512, pipeline).unwrap());
    let read = rx.recv_timeout(RESUME_TIMEOUT).unwrap();
    assert_eq!(read.via, ResumedVia::Interrupt);
    assert!(read.thread.unwrap().starts_with("zio_int_"));
}

#[test]
fn test_concurrent_submitters_resume_each_request_once() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 64;

    let test = TestContext::new();
    let (pipeline, rx) = ObservingPipeline::new(test.broker.clone());

    thread::scope(|s| {
        for t in 0..THREADS {
            let vd = Arc::clone(&test.vd);
            let pipeline = pipeline.clone();
            s.spawn(move || {
                for i in 0..PER_THREAD {
                    let offset = ((t * PER_THREAD + i) * 512) as u64;
                    let zio = if i % 2 == 0 {
                        Zio::write(vd.clone(), offset, Abd::from_slice(&[t as u8; 512]), pipeline.clone())
                    } else {
                        Zio::read(vd.clone(), offset, 512, pipeline.clone())
                    };
                    vd.io_start(zio.unwrap());
                }
            });
        }
    });

    let mut seen = HashSet::new();
    for _ in 0..THREADS * PER_THREAD {
        let observed = rx.recv_timeout(RESUME_TIMEOUT).unwrap();
        assert!(observed.zio.error().is_none());
        assert!(seen.insert(observed.zio.id()), "zio resumed twice");
    }
    assert!(rx.try_recv().is_err());
    assert_eq!(test.broker.outstanding(), 0);
    assert_eq!(test.broker.total_borrowed(), (THREADS * PER_THREAD) as u64);
    assert_eq!(test.broker.total_returned(), (THREADS * PER_THREAD) as u64);
    assert_eq!(test.ctx.metrics().in_flight, 0);
}

#[test]
fn test_scattered_buffers() {
    let test = TestContext::new();
    let size = 3 * 4096 + 512;
    let data: Vec<u8> = (0..size).map(|i| (i % 253) as u8).collect();

    let mut abd = Abd::alloc_scatter(size);
    abd.copy_from_buf(&data);
    let done = test.run(|vd, p| Zio::write(vd, 1 << 20, abd, p).unwrap());
    assert!(done.zio.error().is_none());

    let done = test.run(|vd, p| Zio::read_into(vd, 1 << 20, Abd::alloc_scatter(size), p).unwrap());
    assert!(done.zio.error().is_none());
    let abd = done.zio.into_abd().unwrap();
    assert!(!abd.is_linear());
    assert_eq!(abd.to_vec(), data);
}
