pub mod aio;
pub mod direct_io;
pub mod vdev_disk;

pub use direct_io::{DiskGeometry, DiskHandle};
pub use vdev_disk::VdevDiskAio;
