pub mod abd;
pub mod disk;
pub mod vdev;
pub mod zio;
