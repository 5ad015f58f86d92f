use std::fmt::Display;
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const SEC: u64 = 1;
pub const MILLISEC: u64 = 1_000;
pub const MICROSEC: u64 = 1_000_000;
pub const NANOSEC: u64 = 1_000_000_000;

static CLOCK_BASE: OnceLock<Instant> = OnceLock::new();

pub trait TimeSource: Send + Sync {
    fn now(&self) -> HrTime;
}

/// Monotonic high-resolution clock, counted in nanoseconds since the first
/// time any caller in this process read it.
pub struct MonotonicClock;

impl TimeSource for MonotonicClock {
    fn now(&self) -> HrTime {
        gethrtime()
    }
}

/// Nanoseconds on the monotonic clock. Never goes backwards; only meaningful
/// as a difference between two readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HrTime(u64);

impl HrTime {
    pub const ZERO: HrTime = HrTime(0);

    pub fn new(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_micros(&self) -> u64 {
        self.0 / (NANOSEC / MICROSEC)
    }

    pub fn saturating_sub(&self, earlier: HrTime) -> HrTime {
        HrTime(self.0.saturating_sub(earlier.0))
    }
}

impl Display for HrTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Wall-clock time split into seconds and nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestruc {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

pub fn gethrtime() -> HrTime {
    let base = CLOCK_BASE.get_or_init(Instant::now);
    HrTime(base.elapsed().as_nanos() as u64)
}

pub fn gethrestime() -> Timestruc {
    // A clock set before 1970 reads as the epoch.
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Timestruc {
        tv_sec: since_epoch.as_secs() as i64,
        tv_nsec: since_epoch.subsec_nanos() as i64,
    }
}

pub fn gethrestime_sec() -> i64 {
    gethrestime().tv_sec
}
