use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::decoder::{CodeFormat, Decoded, DecoderFactory, DecoderSet, SymbologySet};
use super::dedupe::DuplicateFilter;
use super::stats::{AttemptStats, ScanAttempt};
use crate::config::PoscanConfig;
use crate::device::{CaptureBackend, StreamHandle, StreamItem};
use crate::error::DeviceError;
use crate::frame::LumaFrame;

/// Receives the latest frame for on-screen preview
pub type PreviewSink = Arc<watch::Sender<Option<LumaFrame>>>;

/// Called for every processed frame
pub type AttemptCallback = Arc<dyn Fn(&ScanAttempt) + Send + Sync>;

/// Called once when the bound device fails mid-stream, with the failed device id
pub type FaultCallback = Arc<dyn Fn(&str, DeviceError) + Send + Sync>;

/// Called for every decode that passes duplicate suppression
pub type DetectCallback = Arc<dyn Fn(Detection) + Send + Sync>;

/// A forwarded camera decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub code: String,
    pub format: CodeFormat,
    pub frame_number: u64,
    /// Found by the rotated-frame fallback
    pub rotated: bool,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub symbologies: SymbologySet,
    /// Duplicate window on the camera path
    pub scan_delay: Duration,
    /// Try a rotated decode every N frames without a result (0 disables)
    pub rotation_fallback_interval: u32,
    pub frame_queue_capacity: usize,
}

impl EngineSettings {
    pub fn from_config(config: &PoscanConfig) -> Self {
        Self {
            symbologies: config.scanner.symbologies(),
            scan_delay: config.scanner.camera_scan_delay(),
            rotation_fallback_interval: config.camera.rotation_fallback_interval,
            frame_queue_capacity: config.system.frame_queue_capacity,
        }
    }
}

/// Live decoder binding to one device; dropping it stops the loop and closes the stream
struct Binding {
    device_id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    _stream: StreamHandle,
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Binds the enabled decoders to a camera feed
pub struct OpticalDecodeEngine {
    backend: Arc<dyn CaptureBackend>,
    settings: EngineSettings,
    factory: DecoderFactory,
    decoders: Arc<DecoderSet>,
    filter: Arc<Mutex<DuplicateFilter>>,
    stats: Arc<Mutex<AttemptStats>>,
    on_detect: DetectCallback,
    on_attempt: Option<AttemptCallback>,
    on_fault: Option<FaultCallback>,
    binding: Option<Binding>,
}

impl OpticalDecodeEngine {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        settings: EngineSettings,
        factory: DecoderFactory,
        on_detect: DetectCallback,
    ) -> Self {
        let decoders = Arc::new(factory(settings.symbologies));
        let filter = Arc::new(Mutex::new(DuplicateFilter::new(settings.scan_delay)));

        Self {
            backend,
            settings,
            factory,
            decoders,
            filter,
            stats: Arc::new(Mutex::new(AttemptStats::default())),
            on_detect,
            on_attempt: None,
            on_fault: None,
            binding: None,
        }
    }

    /// Install the per-frame diagnostics callback; applies from the next `start`
    pub fn set_attempt_callback(&mut self, callback: Option<AttemptCallback>) {
        self.on_attempt = callback;
    }

    /// Install the stream failure callback; applies from the next `start`
    pub fn set_fault_callback(&mut self, callback: Option<FaultCallback>) {
        self.on_fault = callback;
    }

    /// Stop any live binding and rebuild the decoders for `symbologies`
    pub fn configure(&mut self, symbologies: SymbologySet) {
        self.stop();
        self.settings.symbologies = symbologies;
        self.decoders = Arc::new((self.factory)(symbologies));
        info!(
            "Decoder reconfigured (linear: {}, matrix: {})",
            symbologies.linear, symbologies.matrix
        );
    }

    /// Bind to `device_id`. A live binding is stopped first, never overlapped.
    pub fn start(&mut self, device_id: &str, preview: Option<PreviewSink>) -> Result<(), DeviceError> {
        self.stop();

        let (tx, rx) = mpsc::channel(self.settings.frame_queue_capacity.max(1));
        let stream = self.backend.open(device_id, tx)?;

        let cancel = CancellationToken::new();
        let decode_loop = DecodeLoop {
            decoders: Arc::clone(&self.decoders),
            filter: Arc::clone(&self.filter),
            stats: Arc::clone(&self.stats),
            on_detect: Arc::clone(&self.on_detect),
            on_attempt: self.on_attempt.clone(),
            on_fault: self.on_fault.clone(),
            device_id: device_id.to_string(),
            preview,
            rotation_fallback_interval: self.settings.rotation_fallback_interval,
        };
        let task = tokio::spawn(decode_loop.run(rx, cancel.clone()));

        info!("Optical decoding started on {}", device_id);
        self.binding = Some(Binding {
            device_id: device_id.to_string(),
            cancel,
            task,
            _stream: stream,
        });

        Ok(())
    }

    /// Release the binding; safe to call when already stopped
    pub fn stop(&mut self) {
        if let Some(binding) = self.binding.take() {
            let stats = self.stats.lock();
            info!(
                "Optical decoding stopped on {} ({} frames, hit ratio {:.2})",
                binding.device_id,
                stats.frames_processed,
                stats.hit_ratio()
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.binding.is_some()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.device_id.as_str())
    }

    pub fn symbologies(&self) -> SymbologySet {
        self.settings.symbologies
    }

    pub fn stats(&self) -> AttemptStats {
        self.stats.lock().clone()
    }

    /// Forget the last forwarded code so it may be forwarded again at once
    pub fn reset_filter(&self) {
        self.filter.lock().reset();
    }
}

impl Drop for OpticalDecodeEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct DecodeLoop {
    decoders: Arc<DecoderSet>,
    filter: Arc<Mutex<DuplicateFilter>>,
    stats: Arc<Mutex<AttemptStats>>,
    on_detect: DetectCallback,
    on_attempt: Option<AttemptCallback>,
    on_fault: Option<FaultCallback>,
    device_id: String,
    preview: Option<PreviewSink>,
    rotation_fallback_interval: u32,
}

impl DecodeLoop {
    async fn run(self, mut frames: mpsc::Receiver<StreamItem>, cancel: CancellationToken) {
        let mut frame_number = 0u64;
        let mut misses = 0u32;

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        warn!("Capture stream on {} failed: {}", self.device_id, e);
                        if !cancel.is_cancelled() {
                            if let Some(on_fault) = &self.on_fault {
                                on_fault(&self.device_id, e);
                            }
                        }
                        break;
                    }
                    None => break,
                },
            };
            frame_number += 1;

            if let Some(preview) = &self.preview {
                preview.send_replace(Some(frame.clone()));
            }

            let primary = self.decoders.decode(&frame);
            self.report_attempt(frame_number, primary.as_ref());

            let hit = match primary {
                Some(decoded) => {
                    misses = 0;
                    Some((decoded, false))
                }
                None => {
                    misses += 1;
                    self.rotated_fallback(&frame, misses).map(|d| (d, true))
                }
            };

            if cancel.is_cancelled() {
                break;
            }

            if let Some((decoded, rotated)) = hit {
                self.forward(decoded, frame_number, rotated);
            }
        }

        debug!("Decode loop exited after {} frames", frame_number);
    }

    fn report_attempt(&self, frame_number: u64, decoded: Option<&Decoded>) {
        let rate = self.stats.lock().record(
            Instant::now(),
            decoded.map(|d| (d.code.as_str(), d.format)),
        );

        if let Some(callback) = &self.on_attempt {
            callback(&ScanAttempt {
                frame_number,
                has_result: decoded.is_some(),
                result: decoded.map(|d| d.code.clone()),
                format: decoded.map(|d| d.format),
                attempts_per_second: rate,
            });
        }
    }

    fn rotated_fallback(&self, frame: &LumaFrame, misses: u32) -> Option<Decoded> {
        let interval = self.rotation_fallback_interval;
        if interval == 0 || misses % interval != 0 {
            return None;
        }

        trace!("Trying rotated decode of frame {}", frame.id);
        self.decoders.decode(&frame.rotated_90()?)
    }

    fn forward(&self, decoded: Decoded, frame_number: u64, rotated: bool) {
        if !self.filter.lock().admit(&decoded.code, Instant::now()) {
            trace!("Suppressed repeat of {} on frame {}", decoded.code, frame_number);
            return;
        }

        debug!(
            "Frame {}: {} {}{}",
            frame_number,
            decoded.format,
            decoded.code,
            if rotated { " (rotated)" } else { "" }
        );
        (self.on_detect)(Detection {
            code: decoded.code,
            format: decoded.format,
            frame_number,
            rotated,
        });
    }
}
