use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, trace, warn};

use super::completion::aio_done;
use super::context::AioShared;
use super::queue::IoEvent;
use super::task::AioTask;

pub(crate) const POLLER_THREAD_NAME: &str = "vdev_disk_aio";

/// Starts the completion poller. The caller sets `polling` beforehand so the
/// flag is already up when this returns.
pub(crate) fn spawn(shared: Arc<AioShared>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(POLLER_THREAD_NAME.to_string())
        .spawn(move || poll_loop(&shared))
}

fn poll_loop(shared: &AioShared) {
    let depth = shared.config.queue_depth.max(1);
    let mut events: Vec<IoEvent> = Vec::with_capacity(depth);
    debug!("AIO poller started on {}", shared.queue.name());

    let mut healthy = true;
    while healthy && !shared.stop.load(Ordering::SeqCst) {
        healthy = collect(shared, depth, &mut events, shared.config.poll_interval);
    }

    if healthy {
        drain(shared, depth, &mut events);
        shared.queue.destroy();
    }

    drop(events);
    shared.polling.store(false, Ordering::Release);
    debug!("AIO poller exiting");
}

/// Waits up to `timeout` for completions and finishes each one. Returns
/// `false` once the facility can no longer be waited on.
fn collect(shared: &AioShared, depth: usize, events: &mut Vec<IoEvent>, timeout: Duration) -> bool {
    events.clear();
    match shared.queue.get_events(1, depth, events, timeout) {
        Ok(n) => trace!("AIO poller collected {} events", n),
        Err(e) if e.raw_os_error() == Some(libc::EINTR) => return true,
        Err(e) => {
            error!("AIO poller failed to collect events, stopping: {}", e);
            shared.faulted.store(true, Ordering::Release);
            return false;
        }
    }

    for event in events.drain(..) {
        // SAFETY: every accepted control block carries the address of a
        // leaked task, and the facility reports each one exactly once.
        let task = unsafe { AioTask::from_raw(event.data) };
        aio_done(
            task,
            event.res,
            shared.broker.as_ref(),
            &shared.metrics,
            &shared.taskq,
        );
    }
    true
}

/// Collects completions for operations accepted before the stop flag was
/// raised, until none remain or `drain_timeout` passes.
fn drain(shared: &AioShared, depth: usize, events: &mut Vec<IoEvent>) {
    let deadline = Instant::now() + shared.config.drain_timeout;
    loop {
        let in_flight = shared.metrics.in_flight();
        if in_flight == 0 {
            return;
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(
                "AIO poller abandoning {} outstanding operations after {:?}",
                in_flight, shared.config.drain_timeout
            );
            return;
        }

        trace!("AIO poller draining {} outstanding operations", in_flight);
        let timeout = (deadline - now).min(shared.config.poll_interval);
        if !collect(shared, depth, events, timeout) {
            return;
        }
    }
}
