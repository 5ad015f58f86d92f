//! Disk leaf backend submitting through the shared AIO context.

use std::sync::Arc;

use log::{debug, trace};

use crate::common::config::SPA_MINBLOCKSIZE;
use crate::common::exception::ZioError;
use crate::storage::disk::aio::AioContext;
use crate::storage::disk::direct_io::{DirectIOConfig, DiskHandle};
use crate::storage::vdev::{Vdev, VdevAux, VdevGeometry, VdevOps, highbit64};
use crate::storage::zio::{Zio, ZioCmd, ZioOp};

pub const VDEV_TYPE_DISK: &str = "disk";

/// `VdevOps` for whole-disk leaves. Every leaf built from the same context
/// shares its queue and poller.
#[derive(Debug, Clone)]
pub struct VdevDiskAio {
    ctx: Arc<AioContext>,
}

impl VdevDiskAio {
    pub fn new(ctx: Arc<AioContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<AioContext> {
        &self.ctx
    }

    fn fail_open(vd: &Vdev, err: &std::io::Error) -> ZioError {
        vd.set_aux(VdevAux::OpenFailed);
        ZioError::open_failed(err)
    }
}

impl VdevOps for VdevDiskAio {
    fn open(&self, vd: &Vdev) -> Result<VdevGeometry, ZioError> {
        let Some(path) = vd.path().filter(|p| p.is_absolute()) else {
            vd.set_aux(VdevAux::BadLabel);
            return Err(ZioError::BadConfig);
        };
        let config = self.ctx.config();

        // A reopen keeps the descriptor and only refreshes the geometry.
        let disk = match vd.disk() {
            Some(disk) => {
                debug_assert!(vd.is_reopening());
                disk
            }
            None => {
                let io_config = DirectIOConfig {
                    enabled: config.direct_io,
                    write: vd.mode().writeable(),
                };
                let disk = DiskHandle::open(path, &io_config)
                    .map_err(|e| Self::fail_open(vd, &e))?;
                Arc::new(disk)
            }
        };

        let geometry = match disk.geometry(config.allow_file_backed) {
            Ok(geometry) => geometry,
            Err(e) => {
                debug!("Geometry query failed on {}: {}", path.display(), e);
                vd.set_disk(None);
                return Err(Self::fail_open(vd, &e));
            }
        };
        vd.set_disk(Some(disk));

        let sector = u64::from(geometry.logical_block_size).max(SPA_MINBLOCKSIZE);
        let nonrot = !geometry.rotational;
        vd.set_nonrot(nonrot);

        Ok(VdevGeometry {
            psize: geometry.capacity,
            max_psize: geometry.capacity,
            ashift: highbit64(sector) - 1,
            nonrot,
        })
    }

    fn close(&self, vd: &Vdev) {
        if vd.is_reopening() || vd.disk().is_none() {
            return;
        }
        // In-flight tasks keep their own clone of the handle.
        vd.set_disk(None);
        vd.set_delayed_close(false);
    }

    fn io_start(&self, mut zio: Zio) {
        let vd = Arc::clone(zio.vd());
        trace!("io_start {:?}", zio);

        match zio.op() {
            ZioOp::Ioctl(cmd) => {
                if !vd.is_readable() {
                    zio.set_error(ZioError::DeviceUnavailable);
                    zio.interrupt();
                    return;
                }
                if *cmd != ZioCmd::FlushWriteCache {
                    zio.set_error(ZioError::NotSupported);
                    zio.execute();
                    return;
                }
                if self.ctx.config().nocacheflush {
                    zio.execute();
                    return;
                }
            }
            ZioOp::Read(_) | ZioOp::Write(_) => {}
            ZioOp::Free | ZioOp::Claim => {
                zio.set_error(ZioError::NotSupported);
                zio.interrupt();
                return;
            }
        }

        let Some(disk) = vd.disk() else {
            zio.set_error(ZioError::DeviceUnavailable);
            zio.interrupt();
            return;
        };
        self.ctx.submit(zio, disk);
    }

    fn io_done(&self, _zio: &mut Zio) {}

    fn hold(&self, vd: &Vdev) {
        debug_assert!(vd.path().is_some());
    }

    fn rele(&self, vd: &Vdev) {
        debug_assert!(vd.path().is_some());
    }

    fn type_name(&self) -> &'static str {
        VDEV_TYPE_DISK
    }

    fn is_leaf(&self) -> bool {
        true
    }
}
