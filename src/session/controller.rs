use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::state::{SessionState, SessionStateKind};
use crate::config::PoscanConfig;
use crate::consumer::{ScanConsumer, ScanSink};
use crate::device::{CaptureBackend, CaptureDevice, DeviceManager};
use crate::error::{ConsumerError, DeviceError, Result, ScanError, ValidationError};
use crate::events::{EventBus, PipelineEvent, ScanEvent, ScanSource};
use crate::frame::LumaFrame;
use crate::keystroke::{DetectorHandle, DetectorSettings, KeySource, KeystrokeScanDetector};
use crate::optical::{
    AttemptStats, DecoderFactory, DecoderSet, EngineSettings,
    OpticalDecodeEngine, ScanAttempt, SymbologySet,
};
use crate::timer::Timer;
use crate::validation::LengthBounds;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub bounds: LengthBounds,
    /// Success hold time, and the duplicate window for keystroke scans
    pub scan_delay: Duration,
    pub auto_close_on_success: bool,
    pub auto_close_delay: Duration,
    pub error_display: Duration,
    pub detector: DetectorSettings,
    pub engine: EngineSettings,
    pub preferred_labels: Vec<String>,
    pub event_bus_capacity: usize,
}

impl SessionSettings {
    pub fn from_config(config: &PoscanConfig) -> Self {
        Self {
            bounds: config.scanner.length_bounds(),
            scan_delay: config.scanner.scan_delay(),
            auto_close_on_success: config.scanner.auto_close_on_success,
            auto_close_delay: config.scanner.auto_close_delay(),
            error_display: config.session.error_display(),
            detector: DetectorSettings::from_config(config),
            engine: EngineSettings::from_config(config),
            preferred_labels: config.camera.preferred_labels.clone(),
            event_bus_capacity: config.system.event_bus_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TimerAction {
    /// Back to scanning after a success or an error display
    Resume,
    /// Auto-close after a success
    Close,
}

/// Work that has to happen after the session lock is released
#[must_use]
enum Followup {
    None,
    DeviceFailed(DeviceError),
    Closed(String),
}

struct SessionCore {
    state: SessionState,
    session_id: String,
    /// Bumped on every teardown; completions carrying an older epoch are stale
    epoch: u64,
    devices: DeviceManager,
    engine: OpticalDecodeEngine,
    /// Camera bound to this session, kept across Processing so it can be restarted
    active_device: Option<CaptureDevice>,
    detector: Option<DetectorHandle>,
    timer: Timer,
    /// Code and success time of the last scan the consumer accepted
    last_accepted: Option<(String, Instant)>,
    last_error: Option<String>,
}

struct Inner {
    core: Mutex<SessionCore>,
    consumer: Arc<dyn ScanConsumer>,
    events: EventBus,
    state_tx: watch::Sender<SessionStateKind>,
    preview: Arc<watch::Sender<Option<LumaFrame>>>,
    settings: SessionSettings,
}

/// Drives one capture session at a time across camera and keystroke inputs.
///
/// Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct ScanSessionController {
    inner: Arc<Inner>,
}

impl ScanSessionController {
    pub fn new(
        config: &PoscanConfig,
        backend: Arc<dyn CaptureBackend>,
        consumer: Arc<dyn ScanConsumer>,
    ) -> Self {
        Self::with_decoder_factory(config, backend, consumer, DecoderSet::default_factory())
    }

    /// Like [`new`](Self::new) but with a custom decoder set builder
    pub fn with_decoder_factory(
        config: &PoscanConfig,
        backend: Arc<dyn CaptureBackend>,
        consumer: Arc<dyn ScanConsumer>,
        factory: DecoderFactory,
    ) -> Self {
        let settings = SessionSettings::from_config(config);

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let sink = SessionSink {
                inner: weak.clone(),
            };
            let mut engine = OpticalDecodeEngine::new(
                Arc::clone(&backend),
                settings.engine.clone(),
                factory,
                Arc::new(move |detection| {
                    sink.submit(ScanEvent::camera(detection.code, detection.format))
                }),
            );
            let attempts = Arc::clone(&consumer);
            engine.set_attempt_callback(Some(Arc::new(move |attempt: &ScanAttempt| {
                attempts.on_scan_attempt(attempt)
            })));
            let faults = weak.clone();
            engine.set_fault_callback(Some(Arc::new(move |device_id: &str, error: DeviceError| {
                if let Some(inner) = faults.upgrade() {
                    inner.stream_failed(device_id, error);
                }
            })));

            let core = SessionCore {
                state: SessionState::Idle,
                session_id: Uuid::new_v4().to_string(),
                epoch: 0,
                devices: DeviceManager::new(backend, settings.preferred_labels.clone()),
                engine,
                active_device: None,
                detector: None,
                timer: Timer::default(),
                last_accepted: None,
                last_error: None,
            };

            let (state_tx, _) = watch::channel(SessionStateKind::Idle);
            let (preview, _) = watch::channel(None);

            Inner {
                core: Mutex::new(core),
                consumer,
                events: EventBus::new(settings.event_bus_capacity),
                state_tx,
                preview: Arc::new(preview),
                settings,
            }
        });

        Self { inner }
    }

    /// Bind the camera (`device` or the preferred default) and start scanning.
    ///
    /// Allowed while idle or scanning; a camera already bound to the session is
    /// released first. Device failures are reported to the consumer once and
    /// leave the session idle.
    pub fn start_camera(&self, device: Option<&str>) -> Result<CaptureDevice> {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        inner.ensure_startable(&core)?;

        let result = core
            .devices
            .select(device)
            .and_then(|selected| inner.bind_camera(&mut core, selected));

        match result {
            Ok(selected) => {
                if core.state == SessionState::Idle {
                    inner.begin_session(&mut core);
                }
                Ok(selected)
            }
            Err(e) => {
                let followup = inner.device_failed(&mut core, e.clone());
                drop(core);
                inner.run_followup(followup);
                Err(ScanError::Device(e))
            }
        }
    }

    /// Listen for keyboard-wedge scans from `source` with a fresh detector.
    ///
    /// Allowed while idle or scanning; a previously attached source is detached.
    pub fn start_keystrokes(&self, source: Box<dyn KeySource>) -> Result<()> {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        inner.ensure_startable(&core)?;

        if let Some(mut previous) = core.detector.take() {
            previous.detach();
        }

        let detector = KeystrokeScanDetector::new(inner.settings.detector.clone());
        let sink = Arc::new(SessionSink {
            inner: Arc::downgrade(&self.inner),
        });
        core.detector = Some(detector.attach(source, sink)?);

        if core.state == SessionState::Idle {
            inner.begin_session(&mut core);
        }
        Ok(())
    }

    /// Hand a scan to the session as if an input had produced it
    pub fn submit(&self, event: ScanEvent) {
        self.inner.submit(event);
    }

    /// Intake handle for external input sources
    pub fn sink(&self) -> Arc<dyn ScanSink> {
        Arc::new(SessionSink {
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Tear the session down from any state. Idempotent; resources are
    /// released before this returns. A consumer call still in flight is
    /// allowed to finish but its result is ignored.
    pub fn cancel(&self) {
        let mut core = self.inner.core.lock();
        if core.state == SessionState::Idle && core.detector.is_none() && !core.engine.is_running() {
            return;
        }

        info!("Cancelling session {}", core.session_id);
        let session_id = core.session_id.clone();
        self.inner.teardown(&mut core);
        drop(core);
        self.inner.events.publish(PipelineEvent::Closed { session_id });
    }

    /// Move the camera to another device, stop-then-start
    pub fn switch_device(&self, device_id: &str) -> Result<CaptureDevice> {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        if core.active_device.is_none() {
            drop(core);
            return self.start_camera(Some(device_id));
        }

        let result = core.devices.select(Some(device_id)).and_then(|selected| {
            if core.state == SessionState::Scanning {
                inner.bind_camera(&mut core, selected)
            } else {
                // picked up when the session resumes scanning
                core.active_device = Some(selected.clone());
                Ok(selected)
            }
        });

        result.or_else(|e| {
            let followup = inner.device_failed(&mut core, e.clone());
            drop(core);
            inner.run_followup(followup);
            Err(ScanError::Device(e))
        })
    }

    /// Rebuild the decoders for `symbologies`, rebinding the camera if it was live
    pub fn reconfigure(&self, symbologies: SymbologySet) -> Result<()> {
        let inner = &self.inner;
        let mut core = inner.core.lock();
        core.engine.configure(symbologies);

        if core.state != SessionState::Scanning {
            return Ok(());
        }
        let device = match core.active_device.clone() {
            Some(device) => device,
            None => return Ok(()),
        };

        inner.bind_camera(&mut core, device).map(|_| ()).or_else(|e| {
            let followup = inner.device_failed(&mut core, e.clone());
            drop(core);
            inner.run_followup(followup);
            Err(ScanError::Device(e))
        })
    }

    pub fn list_devices(&self) -> Result<Vec<CaptureDevice>> {
        Ok(self.inner.core.lock().devices.list_devices()?)
    }

    pub fn refresh_devices(&self) -> Result<Vec<CaptureDevice>> {
        Ok(self.inner.core.lock().devices.refresh()?)
    }

    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state.clone()
    }

    pub fn state_kind(&self) -> SessionStateKind {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionStateKind> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    /// Latest camera frame while the camera is bound
    pub fn subscribe_preview(&self) -> watch::Receiver<Option<LumaFrame>> {
        self.inner.preview.subscribe()
    }

    pub fn session_id(&self) -> String {
        self.inner.core.lock().session_id.clone()
    }

    pub fn active_device(&self) -> Option<CaptureDevice> {
        self.inner.core.lock().active_device.clone()
    }

    pub fn is_camera_running(&self) -> bool {
        self.inner.core.lock().engine.is_running()
    }

    pub fn is_listening(&self) -> bool {
        self.inner.core.lock().detector.is_some()
    }

    pub fn last_accepted(&self) -> Option<String> {
        self.inner
            .core
            .lock()
            .last_accepted
            .as_ref()
            .map(|(code, _)| code.clone())
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.core.lock().last_error.clone()
    }

    pub fn decode_stats(&self) -> AttemptStats {
        self.inner.core.lock().engine.stats()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }
}

impl Inner {
    fn ensure_startable(&self, core: &SessionCore) -> Result<()> {
        match core.state {
            SessionState::Idle | SessionState::Scanning => Ok(()),
            ref other => Err(ScanError::invalid_state(format!(
                "cannot start an input while {}",
                other.kind()
            ))),
        }
    }

    fn begin_session(&self, core: &mut SessionCore) {
        core.session_id = Uuid::new_v4().to_string();
        core.last_accepted = None;
        info!("Session {} started", core.session_id);
        self.set_state(core, SessionState::Scanning);
    }

    /// Start decoding on `device`; the engine releases any previous binding first
    fn bind_camera(&self, core: &mut SessionCore, device: CaptureDevice) -> std::result::Result<CaptureDevice, DeviceError> {
        core.engine.start(&device.id, Some(Arc::clone(&self.preview)))?;
        core.active_device = Some(device.clone());
        self.events.publish(PipelineEvent::DeviceSelected {
            device_id: device.id.clone(),
            label: device.label.clone(),
        });
        Ok(device)
    }

    fn set_state(&self, core: &mut SessionCore, state: SessionState) {
        let kind = state.kind();
        if core.state.kind() != kind {
            debug!("Session {}: {} -> {}", core.session_id, core.state.kind(), kind);
        }
        core.state = state;
        self.state_tx.send_replace(kind);
        self.events.publish(PipelineEvent::StateChanged {
            session_id: core.session_id.clone(),
            state: kind,
        });
    }

    /// Release everything the session holds and go idle
    fn teardown(&self, core: &mut SessionCore) {
        core.epoch += 1;
        core.timer.cancel();
        core.engine.stop();
        core.engine.reset_filter();
        if let Some(mut detector) = core.detector.take() {
            detector.detach();
        }
        core.active_device = None;
        self.preview.send_replace(None);
        if core.state != SessionState::Idle {
            self.set_state(core, SessionState::Idle);
        }
    }

    fn device_failed(&self, core: &mut SessionCore, error: DeviceError) -> Followup {
        error!("Capture device failure: {}", error);
        core.last_error = Some(error.user_message());
        self.teardown(core);
        Followup::DeviceFailed(error)
    }

    /// The bound camera failed while streaming
    fn stream_failed(&self, device_id: &str, error: DeviceError) {
        let mut core = self.core.lock();
        if core.engine.device_id() != Some(device_id) {
            debug!("Ignoring failure of released stream on {}", device_id);
            return;
        }
        let followup = self.device_failed(&mut core, error);
        drop(core);
        self.run_followup(followup);
    }

    fn run_followup(&self, followup: Followup) {
        match followup {
            Followup::None => {}
            Followup::DeviceFailed(error) => {
                self.events.publish(PipelineEvent::DeviceFailed {
                    message: error.to_string(),
                });
                self.consumer.on_error(&error);
            }
            Followup::Closed(session_id) => {
                self.consumer.on_close();
                self.events.publish(PipelineEvent::Closed { session_id });
            }
        }
    }

    fn arm_timer(self: &Arc<Self>, core: &mut SessionCore, delay: Duration, action: TimerAction) {
        let weak = Arc::downgrade(self);
        let epoch = core.epoch;
        core.timer.arm(delay, move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_timer(epoch, action);
            }
        });
    }

    fn submit(self: &Arc<Self>, mut event: ScanEvent) {
        let mut core = self.core.lock();

        match core.state {
            SessionState::Scanning => {}
            SessionState::Processing { .. } => {
                debug!("Discarding {}: a scan is already in flight", event.code);
                self.events.publish(PipelineEvent::ScanDiscarded {
                    code: event.code,
                    reason: "scan in flight".to_string(),
                });
                return;
            }
            ref other => {
                debug!("Discarding {}: session is {}", event.code, other.kind());
                let reason = format!("session is {}", other.kind());
                self.events.publish(PipelineEvent::ScanDiscarded {
                    code: event.code,
                    reason,
                });
                return;
            }
        }

        if event.source == ScanSource::Hardware && self.is_keystroke_repeat(&core, &event.code, Instant::now()) {
            debug!("Discarding repeated keystroke scan {}", event.code);
            self.events.publish(PipelineEvent::ScanDiscarded {
                code: event.code,
                reason: "duplicate".to_string(),
            });
            return;
        }

        let validated = self.settings.bounds.validate(&event.code);
        if let Ok(code) = &validated {
            event.code = code.clone();
        }

        // Claim the in-flight slot before anything else can observe Scanning
        self.set_state(&mut core, SessionState::Processing { event: event.clone() });
        core.engine.stop();

        if let Err(e) = validated {
            self.enter_error_display(&mut core, event.code, e.to_string());
            return;
        }

        self.events.publish(PipelineEvent::ScanAccepted {
            event: event.clone(),
        });

        let epoch = core.epoch;
        let inner = Arc::clone(self);
        drop(core);

        tokio::spawn(async move {
            let result = inner.consumer.on_scan(&event).await;
            inner.complete(epoch, event, result);
        });
    }

    /// The keystroke duplicate window opens when scanning resumes after the
    /// success hold, so it spans the hold plus one more `scan_delay`
    fn is_keystroke_repeat(&self, core: &SessionCore, code: &str, now: Instant) -> bool {
        match &core.last_accepted {
            Some((last_code, accepted_at)) => {
                last_code.as_str() == code.trim()
                    && now.saturating_duration_since(*accepted_at) < self.settings.scan_delay * 2
            }
            None => false,
        }
    }

    fn complete(self: &Arc<Self>, epoch: u64, event: ScanEvent, result: std::result::Result<(), ConsumerError>) {
        let mut core = self.core.lock();
        if core.epoch != epoch || !core.state.is_in_flight() {
            debug!("Ignoring stale consumer result for {}", event.code);
            return;
        }

        match result {
            Ok(()) => {
                core.last_accepted = Some((event.code.clone(), Instant::now()));
                self.set_state(&mut core, SessionState::Success { code: event.code });

                if self.settings.auto_close_on_success {
                    let delay = self.settings.auto_close_delay;
                    self.arm_timer(&mut core, delay, TimerAction::Close);
                } else {
                    let delay = self.settings.scan_delay;
                    self.arm_timer(&mut core, delay, TimerAction::Resume);
                }
            }
            Err(e) => {
                self.enter_error_display(&mut core, event.code, e.message);
            }
        }
    }

    fn enter_error_display(self: &Arc<Self>, core: &mut SessionCore, code: String, message: String) {
        warn!("Scan {} failed: {}", code, message);
        self.events.publish(PipelineEvent::ScanFailed {
            code,
            message: message.clone(),
        });
        core.last_error = Some(message.clone());
        self.set_state(core, SessionState::ErrorDisplay { message });

        let delay = self.settings.error_display;
        self.arm_timer(core, delay, TimerAction::Resume);
    }

    fn on_timer(self: &Arc<Self>, epoch: u64, action: TimerAction) {
        let mut core = self.core.lock();
        if core.epoch != epoch {
            return;
        }
        core.timer.disarm();

        let followup = match action {
            TimerAction::Resume => self.resume(&mut core),
            TimerAction::Close => {
                info!("Session {} closing after success", core.session_id);
                let session_id = core.session_id.clone();
                self.teardown(&mut core);
                Followup::Closed(session_id)
            }
        };

        drop(core);
        self.run_followup(followup);
    }

    fn resume(&self, core: &mut SessionCore) -> Followup {
        if !matches!(
            core.state,
            SessionState::Success { .. } | SessionState::ErrorDisplay { .. }
        ) {
            return Followup::None;
        }

        if let Some(device) = core.active_device.clone() {
            if let Err(e) = self.bind_camera(core, device) {
                return self.device_failed(core, e);
            }
        }

        self.set_state(core, SessionState::Scanning);
        Followup::None
    }

    fn report_invalid(&self, source: ScanSource, error: ValidationError) {
        let mut core = self.core.lock();
        if core.state == SessionState::Idle {
            return;
        }
        core.last_error = Some(error.to_string());
        drop(core);

        self.events.publish(PipelineEvent::ValidationFailed {
            source,
            message: error.to_string(),
        });
    }
}

/// [`ScanSink`] that forwards into a controller without keeping it alive
struct SessionSink {
    inner: Weak<Inner>,
}

impl ScanSink for SessionSink {
    fn submit(&self, event: ScanEvent) {
        if let Some(inner) = self.inner.upgrade() {
            inner.submit(event);
        }
    }

    fn report_invalid(&self, source: ScanSource, error: ValidationError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.report_invalid(source, error);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        core.timer.cancel();
        core.engine.stop();
        if let Some(mut detector) = core.detector.take() {
            detector.detach();
        }
    }
}
