//! Leaf virtual devices.
//!
//! The vdev tree and pool management live above this crate; a [`Vdev`] here
//! carries only the state a leaf backend reads or updates: its path and
//! open mode, health, the open-failure reason, the reopen / delayed-close
//! flags, the geometry found at open time and the per-leaf device handle.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::common::exception::ZioError;
use crate::storage::disk::DiskHandle;
use crate::storage::zio::Zio;

/// Access mode of the pool the vdev belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaMode {
    Read,
    ReadWrite,
}

impl SpaMode {
    pub fn writeable(&self) -> bool {
        matches!(self, SpaMode::ReadWrite)
    }
}

/// Health of a vdev, ordered from least to most usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VdevState {
    Unknown,
    Closed,
    Offline,
    Removed,
    CantOpen,
    Faulted,
    Degraded,
    Healthy,
}

/// Why a vdev could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VdevAux {
    None,
    OpenFailed,
    BadLabel,
}

/// Sizes reported by a leaf at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VdevGeometry {
    /// Usable size in bytes.
    pub psize: u64,
    /// Largest size the device could grow to.
    pub max_psize: u64,
    /// log2 of the smallest addressable block.
    pub ashift: u64,
    pub nonrot: bool,
}

/// Operations a leaf backend provides to the vdev layer.
pub trait VdevOps: Send + Sync {
    fn open(&self, vd: &Vdev) -> Result<VdevGeometry, ZioError>;
    fn close(&self, vd: &Vdev);
    fn asize(&self, vd: &Vdev, psize: u64) -> u64 {
        vdev_default_asize(vd, psize)
    }
    fn io_start(&self, zio: Zio);
    fn io_done(&self, zio: &mut Zio);
    fn hold(&self, vd: &Vdev);
    fn rele(&self, vd: &Vdev);
    fn type_name(&self) -> &'static str;
    fn is_leaf(&self) -> bool;
}

pub struct Vdev {
    guid: u64,
    path: Option<PathBuf>,
    mode: SpaMode,
    ops: Option<Arc<dyn VdevOps>>,
    state: Mutex<VdevState>,
    aux: Mutex<VdevAux>,
    geometry: Mutex<Option<VdevGeometry>>,
    reopening: AtomicBool,
    delayed_close: AtomicBool,
    nonrot: AtomicBool,
    disk: Mutex<Option<Arc<DiskHandle>>>,
}

impl Vdev {
    /// Creates a vdev node with no backend attached.
    pub fn new(guid: u64, path: Option<PathBuf>, mode: SpaMode) -> Self {
        Self {
            guid,
            path,
            mode,
            ops: None,
            state: Mutex::new(VdevState::Closed),
            aux: Mutex::new(VdevAux::None),
            geometry: Mutex::new(None),
            reopening: AtomicBool::new(false),
            delayed_close: AtomicBool::new(false),
            nonrot: AtomicBool::new(false),
            disk: Mutex::new(None),
        }
    }

    /// Creates a leaf vdev serviced by `ops`.
    pub fn leaf(
        guid: u64,
        path: impl Into<PathBuf>,
        mode: SpaMode,
        ops: Arc<dyn VdevOps>,
    ) -> Arc<Self> {
        let mut vd = Self::new(guid, Some(path.into()), mode);
        vd.ops = Some(ops);
        Arc::new(vd)
    }

    pub fn guid(&self) -> u64 {
        self.guid
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn mode(&self) -> SpaMode {
        self.mode
    }

    pub fn state(&self) -> VdevState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: VdevState) {
        *self.state.lock() = state;
    }

    pub fn aux(&self) -> VdevAux {
        *self.aux.lock()
    }

    pub fn set_aux(&self, aux: VdevAux) {
        *self.aux.lock() = aux;
    }

    pub fn geometry(&self) -> Option<VdevGeometry> {
        *self.geometry.lock()
    }

    pub fn is_readable(&self) -> bool {
        self.state() >= VdevState::Degraded
    }

    pub fn is_reopening(&self) -> bool {
        self.reopening.load(Ordering::Acquire)
    }

    pub fn set_reopening(&self, reopening: bool) {
        self.reopening.store(reopening, Ordering::Release);
    }

    pub fn delayed_close(&self) -> bool {
        self.delayed_close.load(Ordering::Acquire)
    }

    pub fn set_delayed_close(&self, delayed: bool) {
        self.delayed_close.store(delayed, Ordering::Release);
    }

    pub fn is_nonrot(&self) -> bool {
        self.nonrot.load(Ordering::Relaxed)
    }

    pub fn set_nonrot(&self, nonrot: bool) {
        self.nonrot.store(nonrot, Ordering::Relaxed);
    }

    /// The open device handle of a disk leaf, if any.
    pub fn disk(&self) -> Option<Arc<DiskHandle>> {
        self.disk.lock().clone()
    }

    pub(crate) fn set_disk(&self, disk: Option<Arc<DiskHandle>>) -> Option<Arc<DiskHandle>> {
        std::mem::replace(&mut *self.disk.lock(), disk)
    }

    fn ops(&self) -> Result<&Arc<dyn VdevOps>, ZioError> {
        self.ops.as_ref().ok_or(ZioError::DeviceUnavailable)
    }

    /// Opens the leaf, recording its geometry and health.
    pub fn open(&self) -> Result<VdevGeometry, ZioError> {
        let ops = self.ops()?;
        match ops.open(self) {
            Ok(geometry) => {
                *self.geometry.lock() = Some(geometry);
                self.set_aux(VdevAux::None);
                self.set_state(VdevState::Healthy);
                debug!(
                    "Opened {} vdev {}: psize={} ashift={} nonrot={}",
                    ops.type_name(),
                    self.guid,
                    geometry.psize,
                    geometry.ashift,
                    geometry.nonrot
                );
                Ok(geometry)
            }
            Err(e) => {
                warn!("Failed to open vdev {}: {}", self.guid, e);
                self.set_state(VdevState::CantOpen);
                Err(e)
            }
        }
    }

    pub fn close(&self) {
        if let Ok(ops) = self.ops() {
            ops.close(self);
        }
        if !self.is_reopening() {
            self.set_state(VdevState::Closed);
        }
    }

    /// Closes and reopens the leaf while keeping its device handle.
    pub fn reopen(&self) -> Result<VdevGeometry, ZioError> {
        self.set_reopening(true);
        self.close();
        let result = self.open();
        self.set_reopening(false);
        result
    }

    pub fn asize(&self, psize: u64) -> u64 {
        match &self.ops {
            Some(ops) => ops.asize(self, psize),
            None => vdev_default_asize(self, psize),
        }
    }

    pub fn hold(&self) {
        if let Some(ops) = &self.ops {
            ops.hold(self);
        }
    }

    pub fn rele(&self) {
        if let Some(ops) = &self.ops {
            ops.rele(self);
        }
    }

    /// Starts I/O on the leaf. Without a backend the request fails at once.
    pub fn io_start(&self, mut zio: Zio) {
        match &self.ops {
            Some(ops) => ops.io_start(zio),
            None => {
                zio.set_error(ZioError::DeviceUnavailable);
                zio.interrupt();
            }
        }
    }

    pub fn io_done(&self, zio: &mut Zio) {
        if let Some(ops) = &self.ops {
            ops.io_done(zio);
        }
    }
}

impl fmt::Debug for Vdev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vdev")
            .field("guid", &self.guid)
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .field("aux", &self.aux())
            .field("open", &self.disk.lock().is_some())
            .finish()
    }
}

/// Rounds `psize` up to the vdev's minimum block size.
pub fn vdev_default_asize(vd: &Vdev, psize: u64) -> u64 {
    let ashift = vd.geometry().map(|g| g.ashift).unwrap_or(0);
    let align = 1u64 << ashift;
    psize.div_ceil(align) * align
}

/// Position of the highest set bit, counting from 1; zero for zero.
pub fn highbit64(value: u64) -> u64 {
    64 - value.leading_zeros() as u64
}
