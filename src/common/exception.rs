use std::io;
use thiserror::Error;

/// Errors surfaced to an I/O request or returned from a leaf open.
///
/// Every variant maps onto a POSIX errno through [`ZioError::errno`], which is
/// what the pipeline above this layer records in its status field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZioError {
    #[error("vdev path is missing or not absolute")]
    BadConfig,
    #[error("failed to open device (errno {0})")]
    OpenFailed(i32),
    #[error("operation not supported")]
    NotSupported,
    #[error("device unavailable")]
    DeviceUnavailable,
    #[error("AIO submission rejected (errno {0})")]
    Transient(i32),
    #[error("I/O error (errno {0})")]
    Io(i32),
    #[error("short transfer")]
    NoSpace,
    #[error("AIO completion poller has faulted")]
    PollerFaulted,
    #[error("failed to initialize AIO context (errno {0})")]
    AioSetup(i32),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ZioError {
    pub fn errno(&self) -> i32 {
        match self {
            ZioError::BadConfig => libc::EINVAL,
            ZioError::OpenFailed(e) => *e,
            ZioError::NotSupported => libc::ENOTSUP,
            ZioError::DeviceUnavailable => libc::ENXIO,
            ZioError::Transient(e) => *e,
            ZioError::Io(e) => *e,
            ZioError::NoSpace => libc::ENOSPC,
            ZioError::PollerFaulted => libc::EIO,
            ZioError::AioSetup(e) => *e,
            ZioError::InvalidRequest(_) => libc::EINVAL,
        }
    }

    /// Classifies a raw completion code that carries a negated errno.
    pub fn from_completion(res: i64) -> Self {
        ZioError::Io(-res as i32)
    }

    /// Maps an OS error from the submission path. A submit that returned
    /// without an errno is treated as "try again".
    pub fn transient(err: &io::Error) -> Self {
        ZioError::Transient(err.raw_os_error().unwrap_or(libc::EAGAIN))
    }

    pub fn open_failed(err: &io::Error) -> Self {
        ZioError::OpenFailed(err.raw_os_error().unwrap_or(libc::EIO))
    }
}
