mod backend;
#[cfg(all(target_os = "linux", feature = "camera"))]
mod gst;
mod manager;
mod mock;
#[cfg(test)]
mod tests;

pub use backend::{
    platform_backend, CaptureBackend, DeviceDescriptor, FrameSink, StreamHandle, StreamItem,
    UnavailableBackend,
};
#[cfg(all(target_os = "linux", feature = "camera"))]
pub use gst::GstBackend;
pub use manager::{pick_default, CaptureDevice, DeviceManager};
pub use mock::MockBackend;
