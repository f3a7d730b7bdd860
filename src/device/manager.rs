use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::backend::CaptureBackend;
use crate::error::DeviceError;

/// A camera the session can bind to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureDevice {
    pub id: String,
    pub label: String,
    /// Label suggests a rear-facing camera
    pub is_preferred_back: bool,
}

impl CaptureDevice {
    pub fn new(id: impl Into<String>, label: impl Into<String>, preferred_labels: &[String]) -> Self {
        let label = label.into();
        let is_preferred_back = label_is_preferred(&label, preferred_labels);
        Self {
            id: id.into(),
            label,
            is_preferred_back,
        }
    }
}

fn label_is_preferred(label: &str, preferred_labels: &[String]) -> bool {
    let label = label.to_lowercase();
    preferred_labels
        .iter()
        .any(|fragment| label.contains(&fragment.to_lowercase()))
}

/// First rear-facing device, else the first device
pub fn pick_default(devices: &[CaptureDevice]) -> Result<CaptureDevice, DeviceError> {
    devices
        .iter()
        .find(|d| d.is_preferred_back)
        .or_else(|| devices.first())
        .cloned()
        .ok_or(DeviceError::NoDevicesFound)
}

/// Enumerates cameras once per permission grant and tracks the selection
pub struct DeviceManager {
    backend: Arc<dyn CaptureBackend>,
    preferred_labels: Vec<String>,
    cache: Option<Vec<CaptureDevice>>,
    /// Permission check succeeded; survives `refresh`
    permission_checked: bool,
    selected: Option<CaptureDevice>,
}

impl DeviceManager {
    pub fn new(backend: Arc<dyn CaptureBackend>, preferred_labels: Vec<String>) -> Self {
        Self {
            backend,
            preferred_labels,
            cache: None,
            permission_checked: false,
            selected: None,
        }
    }

    pub fn backend(&self) -> Arc<dyn CaptureBackend> {
        Arc::clone(&self.backend)
    }

    /// Cached device list, checking permission and enumerating on first use
    pub fn list_devices(&mut self) -> Result<Vec<CaptureDevice>, DeviceError> {
        if let Some(devices) = &self.cache {
            return Ok(devices.clone());
        }

        let mut descriptors = self.backend.enumerate()?;

        if !self.permission_checked {
            if let Some(first) = descriptors.first() {
                // Open and close a stream once so labels are populated and later
                // starts do not stall on the permission prompt. Never repeated,
                // since the device may be streaming by the next refresh.
                let (tx, _rx) = mpsc::channel(1);
                let check = self.backend.open(&first.id, tx)?;
                check.close();
                self.permission_checked = true;
                descriptors = self.backend.enumerate()?;
            }
        }

        let devices: Vec<CaptureDevice> = descriptors
            .into_iter()
            .map(|d| CaptureDevice::new(d.id, d.label, &self.preferred_labels))
            .collect();

        info!(
            "Found {} capture device(s) via {} backend",
            devices.len(),
            self.backend.name()
        );
        for device in &devices {
            debug!(
                "  {} ({}){}",
                device.label,
                device.id,
                if device.is_preferred_back { " [back]" } else { "" }
            );
        }

        self.cache = Some(devices.clone());
        Ok(devices)
    }

    /// Drop the cache and enumerate again without re-checking permission
    pub fn refresh(&mut self) -> Result<Vec<CaptureDevice>, DeviceError> {
        self.cache = None;
        let devices = self.list_devices()?;

        if let Some(selected) = &self.selected {
            if !devices.iter().any(|d| d.id == selected.id) {
                warn!("Selected device {} disappeared", selected.id);
                self.selected = None;
            }
        }

        Ok(devices)
    }

    /// Resolve the default device from the cached list
    pub fn default_device(&mut self) -> Result<CaptureDevice, DeviceError> {
        let devices = self.list_devices()?;
        pick_default(&devices)
    }

    /// Select a device by id, or the default one when `id` is `None` or unknown
    pub fn select(&mut self, id: Option<&str>) -> Result<CaptureDevice, DeviceError> {
        let devices = self.list_devices()?;

        let device = match id {
            Some(id) => match devices.iter().find(|d| d.id == id) {
                Some(device) => device.clone(),
                None => {
                    warn!("Unknown capture device {}, falling back to default", id);
                    pick_default(&devices)?
                }
            },
            None => pick_default(&devices)?,
        };

        info!("Selected capture device: {} ({})", device.label, device.id);
        self.selected = Some(device.clone());
        Ok(device)
    }

    pub fn selected(&self) -> Option<&CaptureDevice> {
        self.selected.as_ref()
    }
}
