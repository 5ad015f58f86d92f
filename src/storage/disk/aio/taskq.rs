use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;

use crate::storage::zio::Zio;

/// Worker threads that resume requests through their interrupt entry point,
/// keeping heavy continuations off the completion poller.
pub struct InterruptTaskq {
    sender: Mutex<Option<Sender<Zio>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    dispatched: AtomicU64,
}

impl InterruptTaskq {
    pub fn new(threads: usize) -> io::Result<Self> {
        let (sender, receiver) = unbounded();
        let mut workers = Vec::with_capacity(threads.max(1));

        for worker_id in 0..threads.max(1) {
            let receiver: Receiver<Zio> = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("zio_int_{}", worker_id))
                .spawn(move || Self::worker_loop(worker_id, receiver))?;
            workers.push(handle);
        }

        info!("Started {} interrupt taskq threads", workers.len());
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            dispatched: AtomicU64::new(0),
        })
    }

    fn worker_loop(worker_id: usize, receiver: Receiver<Zio>) {
        debug!("Interrupt worker {} started", worker_id);
        // Ends once every sender is dropped and the channel is drained.
        for zio in receiver.iter() {
            trace!("Interrupt worker {} resuming zio {}", worker_id, zio.id());
            zio.interrupt();
        }
        debug!("Interrupt worker {} shutting down", worker_id);
    }

    /// Queues `zio` for resumption. After shutdown the request is resumed on
    /// the calling thread instead.
    pub fn dispatch(&self, zio: Zio) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let rejected = match self.sender.lock().as_ref() {
            Some(sender) => match sender.send(zio) {
                Ok(()) => None,
                Err(err) => Some(err.into_inner()),
            },
            None => Some(zio),
        };

        if let Some(zio) = rejected {
            warn!("Interrupt taskq stopped; resuming zio {} inline", zio.id());
            zio.interrupt();
        }
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Lets the workers drain queued requests, then joins them.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for handle in workers {
            // A worker releasing the last reference cannot join itself.
            if handle.thread().id() == current {
                continue;
            }
            if let Err(e) = handle.join() {
                warn!("Failed to join interrupt worker: {:?}", e);
            }
        }
    }
}

impl Drop for InterruptTaskq {
    fn drop(&mut self) {
        self.shutdown();
    }
}
