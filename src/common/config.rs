use std::time::Duration;

/** Depth of the single AIO context shared by every disk leaf. Taken from SPDK; it does not scale with the number of vdevs. */
pub const AIO_QUEUE_DEPTH: usize = 128;

/** The completion poller re-checks its stop flag at least this often. */
pub const AIO_POLL_INTERVAL: Duration = Duration::from_millis(100);

/** How long shutdown keeps collecting completions for operations already accepted by the facility. */
pub const AIO_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub const SPA_MINBLOCKSHIFT: u64 = 9;
pub const SPA_MAXBLOCKSHIFT: u64 = 24;
pub const SPA_MINBLOCKSIZE: u64 = 1 << SPA_MINBLOCKSHIFT; // 512 bytes
pub const SPA_MAXBLOCKSIZE: u64 = 1 << SPA_MAXBLOCKSHIFT; // 16 MiB

/// Alignment of scratch buffers handed to an `O_DIRECT` descriptor.
pub const DIRECT_IO_ALIGNMENT: usize = 4096;

/// Size of one chunk in a scattered ABD.
pub const ABD_CHUNK_SIZE: usize = 4096;

/// Sector size reported for file-backed leaves.
pub const FILE_BACKED_SECTOR_SIZE: u32 = 512;

/// Configuration consumed by the disk AIO backend.
///
/// The backend does not own any of these knobs; the pool layer builds one
/// `BackendConfig` and hands it to [`AioContext`](crate::storage::disk::aio::AioContext)
/// at startup.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    // Queue configuration
    pub queue_depth: usize,
    pub poll_interval: Duration,
    pub drain_timeout: Duration,

    // Device configuration
    pub direct_io: bool,
    pub allow_file_backed: bool,
    pub buffer_alignment: usize,

    // Flush configuration
    pub nocacheflush: bool,

    // Completion configuration
    pub interrupt_threads: usize,
}

impl BackendConfig {
    /// Configuration suited to file-backed leaves on filesystems that may not
    /// support `O_DIRECT` (tmpfs, overlayfs).
    pub fn file_backed() -> Self {
        Self {
            direct_io: false,
            allow_file_backed: true,
            ..Self::default()
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            queue_depth: AIO_QUEUE_DEPTH,
            poll_interval: AIO_POLL_INTERVAL,
            drain_timeout: AIO_DRAIN_TIMEOUT,

            direct_io: true,
            allow_file_backed: false,
            buffer_alignment: DIRECT_IO_ALIGNMENT,

            nocacheflush: false,

            interrupt_threads: num_cpus::get().max(1),
        }
    }
}
