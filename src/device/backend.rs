use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::CameraConfig;
use crate::error::DeviceError;
use crate::frame::LumaFrame;

/// A captured frame, or the failure that ended the stream
pub type StreamItem = Result<LumaFrame, DeviceError>;

/// Channel end a backend pushes captured frames into. A backend whose device
/// fails mid-stream sends one `Err` and stops producing.
pub type FrameSink = mpsc::Sender<StreamItem>;

/// A device as reported by the platform, before label heuristics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: String,
    pub label: String,
}

impl DeviceDescriptor {
    pub fn new<S: Into<String>>(id: S, label: S) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Platform media-capture capability
pub trait CaptureBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// List the video sources currently present
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError>;

    /// Open a continuous frame feed from `device_id` into `frames`.
    ///
    /// The stream stays open until the returned handle is closed or dropped.
    fn open(&self, device_id: &str, frames: FrameSink) -> Result<StreamHandle, DeviceError>;
}

/// Open capture stream; releases the device when closed or dropped
pub struct StreamHandle {
    device_id: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl StreamHandle {
    pub fn new<F>(device_id: impl Into<String>, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            device_id: device_id.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Release the device now
    pub fn close(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            debug!("Releasing capture stream on {}", self.device_id);
            release();
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("device_id", &self.device_id)
            .field("open", &self.release.is_some())
            .finish()
    }
}

/// Backend used when the crate is built without camera support
#[derive(Debug, Default)]
pub struct UnavailableBackend;

impl CaptureBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        Err(DeviceError::NoCaptureApi)
    }

    fn open(&self, _device_id: &str, _frames: FrameSink) -> Result<StreamHandle, DeviceError> {
        Err(DeviceError::NoCaptureApi)
    }
}

/// Pick the capture backend for this build
#[allow(unused_variables)]
pub fn platform_backend(config: &CameraConfig) -> Arc<dyn CaptureBackend> {
    #[cfg(all(target_os = "linux", feature = "camera"))]
    {
        match super::gst::GstBackend::new(config.clone()) {
            Ok(backend) => return Arc::new(backend),
            Err(e) => tracing::warn!("GStreamer capture unavailable: {}", e),
        }
    }

    Arc::new(UnavailableBackend)
}
