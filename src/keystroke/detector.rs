use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::buffer::{classify_burst, BurstClass, KeystrokeBuffer};
use super::source::KeySource;
use crate::config::PoscanConfig;
use crate::consumer::ScanSink;
use crate::error::{Result, ValidationError};
use crate::events::{ScanEvent, ScanSource};
use crate::validation::LengthBounds;

/// A key as seen by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Escape,
    Other,
}

/// What had input focus when the key arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusTarget {
    /// Nothing in particular; the global listener owns the key
    None,
    /// A text-entry surface that is not collecting scans
    TextEntry,
    /// A text-entry surface that is itself a scan target
    CaptureTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInput {
    pub key: Key,
    pub focus: FocusTarget,
}

impl KeyInput {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            focus: FocusTarget::None,
        }
    }

    pub fn focused(key: Key, focus: FocusTarget) -> Self {
        Self { key, focus }
    }
}

/// Result of feeding one key or timer firing to the detector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Key was not for us
    Ignored,
    /// Character appended
    Buffered,
    /// Escape cleared the buffer
    Reset,
    /// Buffer timed out as human typing and was dropped
    Discarded,
    /// Buffer finished, validated or not
    Finalized(std::result::Result<ScanEvent, ValidationError>),
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub bounds: LengthBounds,
    pub inactivity_timeout: Duration,
    /// Mean keystroke interval below which a burst counts as a scanner
    pub scanner_interval: Duration,
    pub timestamp_window: usize,
}

impl DetectorSettings {
    pub fn from_config(config: &PoscanConfig) -> Self {
        Self {
            bounds: config.scanner.length_bounds(),
            inactivity_timeout: config.keystroke.inactivity_timeout(),
            scanner_interval: config.keystroke.scanner_interval(),
            timestamp_window: config.keystroke.timestamp_window,
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self::from_config(&PoscanConfig::default())
    }
}

/// Turns raw keystrokes into hardware scans.
///
/// The state transitions live in [`handle_key`](Self::handle_key) and
/// [`on_inactivity`](Self::on_inactivity) so they can be driven without a
/// runtime; [`attach`](Self::attach) wires them to a [`KeySource`].
#[derive(Debug)]
pub struct KeystrokeScanDetector {
    settings: DetectorSettings,
    buffer: KeystrokeBuffer,
    deadline: Option<Instant>,
}

impl KeystrokeScanDetector {
    pub fn new(settings: DetectorSettings) -> Self {
        let buffer = KeystrokeBuffer::new(settings.bounds.max, settings.timestamp_window);
        Self {
            settings,
            buffer,
            deadline: None,
        }
    }

    pub fn buffer(&self) -> &KeystrokeBuffer {
        &self.buffer
    }

    /// When the inactivity timer fires next, if armed
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn handle_key(&mut self, input: KeyInput, now: Instant) -> KeyOutcome {
        if input.focus == FocusTarget::TextEntry {
            return KeyOutcome::Ignored;
        }

        match input.key {
            Key::Enter if !self.buffer.is_empty() => self.finalize(),
            Key::Enter | Key::Other => KeyOutcome::Ignored,
            Key::Escape => {
                self.reset();
                KeyOutcome::Reset
            }
            Key::Char(ch) if ch.is_control() => KeyOutcome::Ignored,
            Key::Char(ch) => {
                self.buffer.push(ch, now);
                self.deadline = Some(now + self.settings.inactivity_timeout);
                KeyOutcome::Buffered
            }
        }
    }

    /// The inactivity timer fired
    pub fn on_inactivity(&mut self, _now: Instant) -> KeyOutcome {
        self.deadline = None;
        if self.buffer.is_empty() {
            return KeyOutcome::Ignored;
        }

        let class = classify_burst(
            self.buffer.timestamps(),
            self.buffer.typed(),
            self.settings.bounds.min,
            self.settings.scanner_interval,
        );

        match class {
            BurstClass::Scanner => self.finalize(),
            BurstClass::Human => {
                trace!("Dropping {} hand-typed keystrokes", self.buffer.typed());
                self.reset();
                KeyOutcome::Discarded
            }
        }
    }

    fn finalize(&mut self) -> KeyOutcome {
        self.deadline = None;
        let length = self.buffer.trimmed_len();
        let overflowed = self.buffer.overflowed();
        let text = self.buffer.take();

        let result = if overflowed {
            Err(ValidationError::TooLong {
                length,
                max: self.settings.bounds.max,
            })
        } else {
            self.settings.bounds.validate(&text).map(ScanEvent::hardware)
        };

        KeyOutcome::Finalized(result)
    }

    fn reset(&mut self) {
        self.buffer.reset();
        self.deadline = None;
    }

    /// Start listening on `source`, pushing finished scans into `sink`
    pub fn attach(self, mut source: Box<dyn KeySource>, sink: Arc<dyn ScanSink>) -> Result<DetectorHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        source.attach(tx)?;
        info!("Keystroke detector attached to {} source", source.name());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(rx, sink, cancel.clone()));

        Ok(DetectorHandle {
            source: Some(source),
            cancel,
            task: Some(task),
        })
    }

    async fn run(
        mut self,
        mut keys: mpsc::UnboundedReceiver<KeyInput>,
        sink: Arc<dyn ScanSink>,
        cancel: CancellationToken,
    ) {
        loop {
            let deadline = self.deadline;
            let inactivity = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                key = keys.recv() => match key {
                    Some(input) => self.handle_key(input, Instant::now()),
                    None => break,
                },
                _ = inactivity => self.on_inactivity(Instant::now()),
            };

            match outcome {
                KeyOutcome::Finalized(Ok(event)) => {
                    debug!("Keystroke scan finished: {}", event.code);
                    sink.submit(event);
                }
                KeyOutcome::Finalized(Err(error)) => {
                    debug!("Keystroke scan rejected: {}", error);
                    sink.report_invalid(ScanSource::Hardware, error);
                }
                _ => {}
            }
        }

        debug!("Keystroke detector loop exited");
    }
}

/// Live listener returned by [`KeystrokeScanDetector::attach`]; detaches on drop
pub struct DetectorHandle {
    source: Option<Box<dyn KeySource>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DetectorHandle {
    /// Stop listening; safe to call more than once
    pub fn detach(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.detach();
            info!("Keystroke detector detached from {} source", source.name());
        }
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.source.is_some()
    }
}

impl Drop for DetectorHandle {
    fn drop(&mut self) {
        self.detach();
    }
}
