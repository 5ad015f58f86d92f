mod aio_scenarios;
mod completion_paths;
mod linux_aio;
mod vdev_lifecycle;
