use super::*;
use crate::error::DeviceError;
use std::sync::Arc;
use tokio::sync::mpsc;

fn labels() -> Vec<String> {
    crate::config::CameraConfig::default().preferred_labels
}

#[test]
fn test_pick_default_prefers_back_camera() {
    let devices = vec![
        CaptureDevice::new("0", "Integrated Webcam (front)", &labels()),
        CaptureDevice::new("1", "Camera 2, facing BACK", &labels()),
        CaptureDevice::new("2", "Rear Camera", &labels()),
    ];

    let picked = pick_default(&devices).unwrap();
    assert_eq!(picked.id, "1");
    assert!(picked.is_preferred_back);
}

#[test]
fn test_pick_default_matches_spanish_label() {
    let devices = vec![
        CaptureDevice::new("0", "Cámara frontal", &labels()),
        CaptureDevice::new("1", "Cámara trasera", &labels()),
    ];
    assert_eq!(pick_default(&devices).unwrap().id, "1");
}

#[test]
fn test_pick_default_falls_back_to_first() {
    let devices = vec![
        CaptureDevice::new("a", "USB Camera", &labels()),
        CaptureDevice::new("b", "HD Webcam", &labels()),
    ];
    assert_eq!(pick_default(&devices).unwrap().id, "a");
}

#[test]
fn test_pick_default_empty() {
    assert_eq!(pick_default(&[]), Err(DeviceError::NoDevicesFound));
}

#[test]
fn test_list_devices_checks_permission_once_and_caches() {
    let backend = Arc::new(MockBackend::new(&[("/dev/video0", "Front"), ("/dev/video1", "Back")]));
    let mut manager = DeviceManager::new(backend.clone(), labels());

    let devices = manager.list_devices().unwrap();
    assert_eq!(devices.len(), 2);
    // permission check opened and closed a stream
    assert_eq!(backend.open_count(), 1);
    assert_eq!(backend.live_streams(), 0);

    backend.set_devices(&[("/dev/video0", "Front")]);
    assert_eq!(manager.list_devices().unwrap().len(), 2);
    assert_eq!(backend.open_count(), 1);

    assert_eq!(manager.refresh().unwrap().len(), 1);
    assert_eq!(backend.open_count(), 1);
}

#[test]
fn test_refresh_leaves_streaming_device_alone() {
    let backend = Arc::new(MockBackend::new(&[("/dev/video1", "Back")]));
    let mut manager = DeviceManager::new(backend.clone(), labels());
    let device = manager.select(None).unwrap();

    let (tx, _rx) = mpsc::channel(1);
    let _stream = backend.open(&device.id, tx).unwrap();

    let devices = manager.refresh().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(manager.selected().unwrap().id, "/dev/video1");
    assert_eq!(backend.open_count(), 2);
    assert_eq!(backend.live_streams(), 1);
}

#[test]
fn test_failed_permission_check_is_retried() {
    let backend = Arc::new(MockBackend::new(&[("/dev/video0", "Front")]));
    backend.fail_with(Some(DeviceError::PermissionDenied {
        device: "/dev/video0".to_string(),
    }));
    let mut manager = DeviceManager::new(backend.clone(), labels());
    assert!(manager.list_devices().is_err());

    backend.fail_with(None);
    assert_eq!(manager.refresh().unwrap().len(), 1);
    assert_eq!(backend.live_streams(), 0);
}

#[test]
fn test_list_devices_reports_backend_failures() {
    let backend = Arc::new(MockBackend::new(&[("/dev/video0", "Front")]));
    backend.fail_with(Some(DeviceError::PermissionDenied {
        device: "/dev/video0".to_string(),
    }));
    let mut manager = DeviceManager::new(backend.clone(), labels());
    assert!(matches!(
        manager.list_devices(),
        Err(DeviceError::PermissionDenied { .. })
    ));

    let mut unsupported = DeviceManager::new(Arc::new(UnavailableBackend), labels());
    assert_eq!(unsupported.list_devices(), Err(DeviceError::NoCaptureApi));
}

#[test]
fn test_select_device() {
    let backend = Arc::new(MockBackend::new(&[("/dev/video0", "Front"), ("/dev/video1", "Back")]));
    let mut manager = DeviceManager::new(backend, labels());

    assert_eq!(manager.select(None).unwrap().id, "/dev/video1");
    assert_eq!(manager.select(Some("/dev/video0")).unwrap().id, "/dev/video0");
    assert_eq!(manager.selected().unwrap().id, "/dev/video0");
    // unknown ids fall back to the default
    assert_eq!(manager.select(Some("/dev/video9")).unwrap().id, "/dev/video1");
}

#[test]
fn test_refresh_drops_vanished_selection() {
    let backend = Arc::new(MockBackend::new(&[("/dev/video0", "Front"), ("/dev/video1", "Back")]));
    let mut manager = DeviceManager::new(backend.clone(), labels());
    manager.select(Some("/dev/video1")).unwrap();

    backend.set_devices(&[("/dev/video0", "Front")]);
    manager.refresh().unwrap();
    assert!(manager.selected().is_none());
}

#[test]
fn test_stream_handle_releases_once() {
    let backend = MockBackend::new(&[("/dev/video0", "Front")]);
    let (tx, _rx) = mpsc::channel(1);
    let handle = backend.open("/dev/video0", tx.clone()).unwrap();
    assert!(backend.is_open("/dev/video0"));

    // a second bind on the same device is refused
    assert!(backend.open("/dev/video0", tx).is_err());

    drop(handle);
    assert!(!backend.is_open("/dev/video0"));
    assert_eq!(backend.live_streams(), 0);
}
