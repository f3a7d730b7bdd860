use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::backend::{CaptureBackend, DeviceDescriptor, FrameSink, StreamHandle};
use crate::error::DeviceError;
use crate::frame::LumaFrame;
use crate::optical::mock::text_frame;

/// In-memory capture backend for tests and demos without camera hardware
pub struct MockBackend {
    devices: Mutex<Vec<DeviceDescriptor>>,
    failure: Mutex<Option<DeviceError>>,
    streams: Arc<Mutex<HashMap<String, FrameSink>>>,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
    frame_counter: AtomicU64,
}

impl MockBackend {
    /// Create a backend exposing `(id, label)` devices
    pub fn new(devices: &[(&str, &str)]) -> Self {
        Self {
            devices: Mutex::new(
                devices
                    .iter()
                    .map(|(id, label)| DeviceDescriptor::new(*id, *label))
                    .collect(),
            ),
            failure: Mutex::new(None),
            streams: Arc::new(Mutex::new(HashMap::new())),
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
            frame_counter: AtomicU64::new(0),
        }
    }

    /// Make every subsequent enumerate/open fail with `error`
    pub fn fail_with(&self, error: Option<DeviceError>) {
        *self.failure.lock() = error;
    }

    pub fn set_devices(&self, devices: &[(&str, &str)]) {
        *self.devices.lock() = devices
            .iter()
            .map(|(id, label)| DeviceDescriptor::new(*id, *label))
            .collect();
    }

    /// Total number of streams ever opened, including permission checks
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Streams currently open
    pub fn live_streams(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn is_open(&self, device_id: &str) -> bool {
        self.streams.lock().contains_key(device_id)
    }

    /// Push a frame to the stream open on `device_id`; false when none is open or it is full
    pub fn push_frame(&self, device_id: &str, frame: LumaFrame) -> bool {
        let sink = self.streams.lock().get(device_id).cloned();
        match sink {
            Some(sink) => sink.try_send(Ok(frame)).is_ok(),
            None => false,
        }
    }

    /// Fail the stream open on `device_id` as an unplugged camera would
    pub fn fail_stream(&self, device_id: &str, error: DeviceError) -> bool {
        let sink = self.streams.lock().get(device_id).cloned();
        match sink {
            Some(sink) => sink.try_send(Err(error)).is_ok(),
            None => false,
        }
    }

    /// Push a frame that the mock decoder reads as `code`
    pub fn push_code(&self, device_id: &str, code: &str) -> bool {
        let id = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        self.push_frame(device_id, text_frame(id, code))
    }

    /// Push a frame without any code in it
    pub fn push_blank(&self, device_id: &str) -> bool {
        let id = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        self.push_frame(device_id, LumaFrame::new(id, vec![0xFF; 64], 8, 8))
    }

    fn check_failure(&self) -> Result<(), DeviceError> {
        match self.failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl CaptureBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        self.check_failure()?;
        Ok(self.devices.lock().clone())
    }

    fn open(&self, device_id: &str, frames: FrameSink) -> Result<StreamHandle, DeviceError> {
        self.check_failure()?;

        if !self.devices.lock().iter().any(|d| d.id == device_id) {
            return Err(DeviceError::Unavailable {
                device: device_id.to_string(),
                details: "no such device".to_string(),
            });
        }

        let mut streams = self.streams.lock();
        if streams.contains_key(device_id) {
            return Err(DeviceError::Unavailable {
                device: device_id.to_string(),
                details: "device is already bound".to_string(),
            });
        }
        streams.insert(device_id.to_string(), frames);
        self.opened.fetch_add(1, Ordering::SeqCst);
        debug!("Mock stream opened on {}", device_id);

        let streams = Arc::clone(&self.streams);
        let released = Arc::clone(&self.released);
        let device = device_id.to_string();
        Ok(StreamHandle::new(device_id, move || {
            streams.lock().remove(&device);
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}
