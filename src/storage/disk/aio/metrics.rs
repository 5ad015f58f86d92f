//! # AIO Metrics
//!
//! Lock-free counters for the disk AIO backend: submissions, completions,
//! failures, bytes moved and per-operation latency measured on the monotonic
//! clock from submission to completion.
//!
//! Counters are updated on the submitting threads and on the completion
//! poller, and read through [`AioMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::common::time::HrTime;
use crate::storage::zio::ZioType;

#[derive(Debug)]
pub struct AioMetrics {
    // Operation counters
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    submit_failures: AtomicU64,
    rejected: AtomicU64,

    // Throughput
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,

    // Latency, in nanoseconds
    total_latency_ns: AtomicU64,
    min_latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,

    // Current state
    in_flight: AtomicUsize,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AioMetricsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub submit_failures: u64,
    pub rejected: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub in_flight: usize,
    pub min_latency: HrTime,
    pub max_latency: HrTime,
    pub avg_latency: HrTime,
}

impl Default for AioMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AioMetrics {
    pub fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            submit_failures: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            total_latency_ns: AtomicU64::new(0),
            min_latency_ns: AtomicU64::new(u64::MAX),
            max_latency_ns: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Records an operation about to be handed to the facility.
    ///
    /// `in_flight` is sequentially consistent so that it orders against the
    /// context's stop flag.
    pub fn record_submit(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// Records that the facility refused an operation passed to
    /// [`record_submit`](Self::record_submit).
    pub fn record_submit_failure(&self) {
        self.submit_failures.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Records that an operation passed to [`record_submit`](Self::record_submit)
    /// was failed before reaching the facility. It no longer counts as
    /// submitted.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        self.submitted.fetch_sub(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Records a collected completion.
    pub fn record_completion(&self, zio_type: ZioType, bytes: u64, latency: HrTime, failed: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        } else {
            match zio_type {
                ZioType::Read => {
                    self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
                }
                ZioType::Write => {
                    self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
                }
                _ => {}
            }
        }

        let nanos = latency.as_nanos();
        self.total_latency_ns.fetch_add(nanos, Ordering::Relaxed);

        let mut current_min = self.min_latency_ns.load(Ordering::Relaxed);
        while current_min > nanos {
            match self.min_latency_ns.compare_exchange_weak(
                current_min,
                nanos,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(new_min) => current_min = new_min,
            }
        }

        let mut current_max = self.max_latency_ns.load(Ordering::Relaxed);
        while current_max < nanos {
            match self.max_latency_ns.compare_exchange_weak(
                current_max,
                nanos,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(new_max) => current_max = new_max,
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> AioMetricsSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let total = self.total_latency_ns.load(Ordering::Relaxed);
        let min = self.min_latency_ns.load(Ordering::Relaxed);

        AioMetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed,
            failed: self.failed.load(Ordering::Relaxed),
            submit_failures: self.submit_failures.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            min_latency: if min == u64::MAX {
                HrTime::ZERO
            } else {
                HrTime::new(min)
            },
            max_latency: HrTime::new(self.max_latency_ns.load(Ordering::Relaxed)),
            avg_latency: if completed == 0 {
                HrTime::ZERO
            } else {
                HrTime::new(total / completed)
            },
        }
    }
}
