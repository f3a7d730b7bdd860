use super::mock::{text_frame, TextFrameDecoder};
use super::*;
use crate::device::MockBackend;
use crate::error::DeviceError;
use crate::frame::LumaFrame;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DEVICE: &str = "/dev/video0";

fn settings() -> EngineSettings {
    EngineSettings {
        symbologies: SymbologySet::all(),
        scan_delay: Duration::from_millis(600),
        rotation_fallback_interval: 15,
        frame_queue_capacity: 16,
    }
}

fn text_factory() -> DecoderFactory {
    Arc::new(|_| DecoderSet::custom(vec![Box::new(TextFrameDecoder::default())]))
}

fn engine_with(
    backend: Arc<MockBackend>,
    settings: EngineSettings,
    factory: DecoderFactory,
) -> (OpticalDecodeEngine, Arc<Mutex<Vec<Detection>>>) {
    let detections = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&detections);
    let engine = OpticalDecodeEngine::new(
        backend,
        settings,
        factory,
        Arc::new(move |detection| sink.lock().push(detection)),
    );
    (engine, detections)
}

async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

fn codes(detections: &Mutex<Vec<Detection>>) -> Vec<String> {
    detections.lock().iter().map(|d| d.code.clone()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_identical_decode_on_consecutive_frames_forwards_once() {
    let backend = Arc::new(MockBackend::new(&[(DEVICE, "Back camera")]));
    let (mut engine, detections) = engine_with(backend.clone(), settings(), text_factory());
    engine.start(DEVICE, None).unwrap();

    for _ in 0..9 {
        assert!(backend.push_blank(DEVICE));
    }
    settle(1).await;

    assert!(backend.push_code(DEVICE, "ABC123"));
    settle(30).await;
    assert!(backend.push_code(DEVICE, "ABC123"));
    settle(1).await;

    let detections = detections.lock();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].code, "ABC123");
    assert_eq!(detections[0].frame_number, 10);
    assert!(!detections[0].rotated);
}

#[tokio::test(start_paused = true)]
async fn test_different_code_interrupts_window() {
    let backend = Arc::new(MockBackend::new(&[(DEVICE, "Back camera")]));
    let (mut engine, detections) = engine_with(backend.clone(), settings(), text_factory());
    engine.start(DEVICE, None).unwrap();

    backend.push_code(DEVICE, "ABC123");
    settle(50).await;
    backend.push_code(DEVICE, "XYZ999");
    settle(1).await;

    assert_eq!(codes(&detections), vec!["ABC123", "XYZ999"]);
}

#[tokio::test(start_paused = true)]
async fn test_same_code_forwarded_again_after_window() {
    let backend = Arc::new(MockBackend::new(&[(DEVICE, "Back camera")]));
    let (mut engine, detections) = engine_with(backend.clone(), settings(), text_factory());
    engine.start(DEVICE, None).unwrap();

    backend.push_code(DEVICE, "ABC123");
    settle(599).await;
    backend.push_code(DEVICE, "ABC123");
    settle(1).await;
    assert_eq!(codes(&detections).len(), 1);

    settle(1).await;
    backend.push_code(DEVICE, "ABC123");
    settle(1).await;
    assert_eq!(codes(&detections).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_and_releases_stream() {
    let backend = Arc::new(MockBackend::new(&[(DEVICE, "Back camera")]));
    let (mut engine, detections) = engine_with(backend.clone(), settings(), text_factory());

    engine.stop();
    engine.start(DEVICE, None).unwrap();
    assert!(engine.is_running());
    assert!(backend.is_open(DEVICE));

    engine.stop();
    engine.stop();
    assert!(!engine.is_running());
    assert!(!backend.is_open(DEVICE));

    // frames after stop go nowhere
    assert!(!backend.push_code(DEVICE, "ABC123"));
    settle(1).await;
    assert!(detections.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restart_never_double_binds() {
    let backend = Arc::new(MockBackend::new(&[(DEVICE, "Back"), ("/dev/video1", "Front")]));
    let (mut engine, _detections) = engine_with(backend.clone(), settings(), text_factory());

    engine.start(DEVICE, None).unwrap();
    // the mock refuses a second open of a bound device, so this only works
    // because the previous binding is released first
    engine.start(DEVICE, None).unwrap();
    assert_eq!(backend.live_streams(), 1);

    engine.start("/dev/video1", None).unwrap();
    assert_eq!(backend.live_streams(), 1);
    assert_eq!(engine.device_id(), Some("/dev/video1"));
    assert!(!backend.is_open(DEVICE));
}

#[tokio::test(start_paused = true)]
async fn test_configure_stops_binding_and_rebuilds_decoders() {
    let backend = Arc::new(MockBackend::new(&[(DEVICE, "Back")]));
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&builds);
    let factory: DecoderFactory = Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        DecoderSet::custom(vec![Box::new(TextFrameDecoder::default())])
    });
    let (mut engine, _detections) = engine_with(backend.clone(), settings(), factory);
    assert_eq!(builds.load(Ordering::SeqCst), 1);

    engine.start(DEVICE, None).unwrap();
    engine.configure(SymbologySet {
        linear: true,
        matrix: false,
    });

    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert!(!engine.is_running());
    assert!(!backend.is_open(DEVICE));
    assert!(!engine.symbologies().matrix);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_callback_sees_every_frame() {
    let backend = Arc::new(MockBackend::new(&[(DEVICE, "Back")]));
    let (mut engine, _detections) = engine_with(backend.clone(), settings(), text_factory());

    let attempts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&attempts);
    engine.set_attempt_callback(Some(Arc::new(move |attempt: &ScanAttempt| {
        sink.lock().push(attempt.clone())
    })));
    engine.start(DEVICE, None).unwrap();

    backend.push_blank(DEVICE);
    backend.push_code(DEVICE, "ABC123");
    backend.push_code(DEVICE, "ABC123");
    settle(1).await;

    let attempts = attempts.lock();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[0].frame_number, 1);
    assert!(!attempts[0].has_result);
    // suppressed duplicates are still reported as attempts
    assert!(attempts[2].has_result);
    assert_eq!(attempts[2].result.as_deref(), Some("ABC123"));
    assert_eq!(attempts[2].format, Some(CodeFormat::QrCode));
    assert!(attempts[2].attempts_per_second >= 3.0);
    assert_eq!(engine.stats().frames_processed, 3);
}

/// Only reads frames that are a single column wide, i.e. rotated text frames
struct ColumnDecoder;

impl SymbologyDecoder for ColumnDecoder {
    fn name(&self) -> &'static str {
        "column"
    }

    fn decode(&self, frame: &LumaFrame) -> Option<Decoded> {
        if frame.width != 1 {
            return None;
        }
        TextFrameDecoder::default().decode(&LumaFrame::new(
            frame.id,
            frame.data.as_ref().clone(),
            frame.height,
            1,
        ))
    }
}

#[tokio::test(start_paused = true)]
async fn test_rotated_fallback_runs_on_cadence() {
    let backend = Arc::new(MockBackend::new(&[(DEVICE, "Back")]));
    let mut settings = settings();
    settings.rotation_fallback_interval = 3;
    let factory: DecoderFactory = Arc::new(|_| DecoderSet::custom(vec![Box::new(ColumnDecoder)]));
    let (mut engine, detections) = engine_with(backend.clone(), settings, factory);
    engine.start(DEVICE, None).unwrap();

    backend.push_code(DEVICE, "ROT123");
    backend.push_code(DEVICE, "ROT123");
    settle(1).await;
    assert!(detections.lock().is_empty());

    backend.push_code(DEVICE, "ROT123");
    settle(1).await;

    let detections = detections.lock();
    assert_eq!(detections.len(), 1);
    assert!(detections[0].rotated);
    assert_eq!(detections[0].frame_number, 3);
}

#[tokio::test(start_paused = true)]
async fn test_preview_receives_frames() {
    let backend = Arc::new(MockBackend::new(&[(DEVICE, "Back")]));
    let (mut engine, _detections) = engine_with(backend.clone(), settings(), text_factory());
    let (preview, preview_rx) = tokio::sync::watch::channel(None);

    engine.start(DEVICE, Some(Arc::new(preview))).unwrap();
    backend.push_frame(DEVICE, text_frame(42, "ABC123"));
    settle(1).await;

    assert_eq!(preview_rx.borrow().as_ref().map(|f| f.id), Some(42));
}

#[tokio::test(start_paused = true)]
async fn test_reset_filter_allows_immediate_repeat() {
    let backend = Arc::new(MockBackend::new(&[(DEVICE, "Back")]));
    let (mut engine, detections) = engine_with(backend.clone(), settings(), text_factory());
    engine.start(DEVICE, None).unwrap();

    backend.push_code(DEVICE, "ABC123");
    settle(1).await;
    engine.reset_filter();
    backend.push_code(DEVICE, "ABC123");
    settle(1).await;

    assert_eq!(codes(&detections).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stream_failure_reported_once_and_loop_ends() {
    let backend = Arc::new(MockBackend::new(&[(DEVICE, "Back camera")]));
    let (mut engine, detections) = engine_with(backend.clone(), settings(), text_factory());
    let faults = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&faults);
    engine.set_fault_callback(Some(Arc::new(move |device_id: &str, error: DeviceError| {
        sink.lock().push((device_id.to_string(), error))
    })));
    engine.start(DEVICE, None).unwrap();

    let unplugged = DeviceError::Unavailable {
        device: DEVICE.to_string(),
        details: "device unplugged".to_string(),
    };
    assert!(backend.fail_stream(DEVICE, unplugged.clone()));
    settle(1).await;

    assert_eq!(faults.lock().as_slice(), &[(DEVICE.to_string(), unplugged)]);
    // the receiving end is gone, nothing more is decoded
    assert!(!backend.push_code(DEVICE, "ABC123"));
    assert!(codes(&detections).is_empty());

    engine.stop();
    assert_eq!(backend.live_streams(), 0);
}
