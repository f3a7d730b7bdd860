//! Manual-entry field that also accepts wedge keystrokes while focused.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::PoscanConfig;
use crate::consumer::ScanConsumer;
use crate::error::{Result, ScanError};
use crate::events::ScanEvent;
use crate::keystroke::{Key, KeyInput};
use crate::timer::Timer;
use crate::validation::LengthBounds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// What the field currently shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldView {
    pub value: String,
    pub status: FieldStatus,
    pub message: Option<String>,
    pub focused: bool,
}

impl Default for FieldView {
    fn default() -> Self {
        Self {
            value: String::new(),
            status: FieldStatus::Idle,
            message: None,
            focused: true,
        }
    }
}

struct FieldCore {
    view: FieldView,
    epoch: u64,
    timer: Timer,
}

struct FieldInner {
    core: Mutex<FieldCore>,
    view_tx: watch::Sender<FieldView>,
    consumer: Arc<dyn ScanConsumer>,
    bounds: LengthBounds,
    focus_delay: Duration,
    error_display: Duration,
}

/// Text field bound to the same validation and consumer as the scan session
#[derive(Clone)]
pub struct BarcodeInputField {
    inner: Arc<FieldInner>,
}

impl BarcodeInputField {
    pub fn new(config: &PoscanConfig, consumer: Arc<dyn ScanConsumer>) -> Self {
        let (view_tx, _) = watch::channel(FieldView::default());
        Self {
            inner: Arc::new(FieldInner {
                core: Mutex::new(FieldCore {
                    view: FieldView::default(),
                    epoch: 0,
                    timer: Timer::default(),
                }),
                view_tx,
                consumer,
                bounds: config.scanner.length_bounds(),
                focus_delay: config.scanner.scan_delay(),
                error_display: config.session.error_display(),
            }),
        }
    }

    pub fn view(&self) -> FieldView {
        self.inner.core.lock().view.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FieldView> {
        self.inner.view_tx.subscribe()
    }

    /// Replace the typed value; refused while a submission is loading
    pub fn set_value(&self, value: &str) -> bool {
        self.inner.update(|view| {
            if view.status == FieldStatus::Loading {
                return false;
            }
            view.value = value.to_string();
            true
        })
    }

    pub fn focus(&self, focused: bool) {
        self.inner.update(|view| view.focused = focused);
    }

    /// Feed one keystroke. Enter submits the current value.
    pub async fn handle_key(&self, input: KeyInput) -> Option<Result<ScanEvent>> {
        match input.key {
            Key::Char(ch) if !ch.is_control() => {
                self.inner.update(|view| {
                    if view.status != FieldStatus::Loading {
                        view.value.push(ch);
                    }
                });
                None
            }
            Key::Escape => {
                self.set_value("");
                None
            }
            Key::Enter => Some(self.submit_current().await),
            _ => None,
        }
    }

    /// Submit `value` as if it had been typed and confirmed
    pub async fn submit(&self, value: &str) -> Result<ScanEvent> {
        if !self.set_value(value) {
            return Err(ScanError::invalid_state("a submission is already loading"));
        }
        self.submit_current().await
    }

    /// Validate the current value and hand it to the consumer
    pub async fn submit_current(&self) -> Result<ScanEvent> {
        let inner = &self.inner;

        let (event, epoch) = {
            let mut core = inner.core.lock();
            if core.view.status == FieldStatus::Loading {
                return Err(ScanError::invalid_state("a submission is already loading"));
            }
            core.timer.cancel();
            core.epoch += 1;

            match inner.bounds.validate(&core.view.value) {
                Ok(code) => {
                    core.view.status = FieldStatus::Loading;
                    core.view.message = None;
                    inner.publish(&core);
                    (ScanEvent::hardware(code), core.epoch)
                }
                Err(e) => {
                    debug!("Field value rejected: {}", e);
                    inner.show_error(&mut core, e.to_string());
                    return Err(e.into());
                }
            }
        };

        info!("Field submitted {}", event.code);
        let loading = LoadingGuard {
            inner,
            epoch,
            armed: true,
        };
        let result = inner.consumer.on_scan(&event).await;
        loading.disarm();

        let mut core = inner.core.lock();
        if core.epoch != epoch {
            debug!("Field was reset while {} was loading", event.code);
            return result.map(|_| event).map_err(ScanError::from);
        }

        match result {
            Ok(()) => {
                core.view.value.clear();
                core.view.status = FieldStatus::Success;
                core.view.focused = false;
                inner.publish(&core);

                let weak = Arc::downgrade(inner);
                let delay = inner.focus_delay;
                core.timer.arm(delay, move || FieldInner::settle(weak, epoch, true));
                Ok(event)
            }
            Err(e) => {
                warn!("Field scan {} rejected: {}", event.code, e);
                inner.show_error(&mut core, e.message.clone());
                Err(e.into())
            }
        }
    }

    /// Drop any pending submission result and timers and clear the field
    pub fn reset(&self) {
        let mut core = self.inner.core.lock();
        core.epoch += 1;
        core.timer.cancel();
        core.view = FieldView::default();
        self.inner.publish(&core);
    }
}

/// Leaves `Loading` if a submission future is dropped before the consumer answers
struct LoadingGuard<'a> {
    inner: &'a Arc<FieldInner>,
    epoch: u64,
    armed: bool,
}

impl LoadingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut core = self.inner.core.lock();
        if core.epoch != self.epoch || core.view.status != FieldStatus::Loading {
            return;
        }
        debug!("Field submission abandoned, keeping {}", core.view.value);
        core.epoch += 1;
        core.view.status = FieldStatus::Idle;
        core.view.message = None;
        self.inner.publish(&core);
    }
}

impl FieldInner {
    fn update<R>(&self, f: impl FnOnce(&mut FieldView) -> R) -> R {
        let mut core = self.core.lock();
        let result = f(&mut core.view);
        self.publish(&core);
        result
    }

    fn publish(&self, core: &FieldCore) {
        self.view_tx.send_replace(core.view.clone());
    }

    fn show_error(self: &Arc<Self>, core: &mut FieldCore, message: String) {
        core.view.status = FieldStatus::Error;
        core.view.message = Some(message);
        self.publish(core);

        let weak = Arc::downgrade(self);
        let epoch = core.epoch;
        core.timer
            .arm(self.error_display, move || FieldInner::settle(weak, epoch, false));
    }

    /// Timer end of a success or error: back to idle
    fn settle(weak: Weak<Self>, epoch: u64, refocus: bool) {
        let inner = match weak.upgrade() {
            Some(inner) => inner,
            None => return,
        };
        let mut core = inner.core.lock();
        if core.epoch != epoch {
            return;
        }
        core.timer.disarm();
        core.view.status = FieldStatus::Idle;
        core.view.message = None;
        if refocus {
            core.view.focused = true;
        }
        inner.publish(&core);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConsumerError, ValidationError};
    use async_trait::async_trait;

    struct CatalogConsumer {
        known: Vec<&'static str>,
        delay: Duration,
        calls: Mutex<Vec<String>>,
    }

    impl CatalogConsumer {
        fn new(known: Vec<&'static str>) -> Self {
            Self {
                known,
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ScanConsumer for CatalogConsumer {
        async fn on_scan(&self, event: &ScanEvent) -> std::result::Result<(), ConsumerError> {
            self.calls.lock().push(event.code.clone());
            tokio::time::sleep(self.delay).await;
            if self.known.contains(&event.code.as_str()) {
                Ok(())
            } else {
                Err(ConsumerError::new("Product not found"))
            }
        }
    }

    fn field(consumer: Arc<CatalogConsumer>) -> BarcodeInputField {
        BarcodeInputField::new(&PoscanConfig::default(), consumer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_submit_clears_and_refocuses() {
        let consumer = Arc::new(CatalogConsumer::new(vec!["7501234567890"]));
        let field = field(consumer.clone());

        let event = field.submit("  7501234567890 ").await.unwrap();
        assert_eq!(event.code, "7501234567890");

        let view = field.view();
        assert_eq!(view.status, FieldStatus::Success);
        assert!(view.value.is_empty());
        assert!(!view.focused);

        tokio::time::sleep(Duration::from_millis(301)).await;
        let view = field.view();
        assert_eq!(view.status, FieldStatus::Idle);
        assert!(view.focused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_value_shows_error_then_idles() {
        let consumer = Arc::new(CatalogConsumer::new(vec![]));
        let field = field(consumer.clone());

        match field.submit("ab").await {
            Err(ScanError::Validation(ValidationError::TooShort { length: 2, min: 3 })) => {}
            other => panic!("Unexpected result: {:?}", other),
        }
        assert!(consumer.calls.lock().is_empty());
        assert_eq!(field.view().status, FieldStatus::Error);
        assert_eq!(field.view().value, "ab");

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(field.view().status, FieldStatus::Error);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(field.view().status, FieldStatus::Idle);
        assert!(field.view().message.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_scan_keeps_message() {
        let consumer = Arc::new(CatalogConsumer::new(vec![]));
        let field = field(consumer);

        assert!(matches!(field.submit("ABC123").await, Err(ScanError::Consumer(_))));
        let view = field.view();
        assert_eq!(view.status, FieldStatus::Error);
        assert_eq!(view.message.as_deref(), Some("Product not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_submit_refused_while_loading() {
        let consumer = Arc::new(CatalogConsumer {
            delay: Duration::from_millis(200),
            ..CatalogConsumer::new(vec!["ABC123"])
        });
        let field = field(consumer.clone());

        let first = tokio::spawn({
            let field = field.clone();
            async move { field.submit("ABC123").await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(field.view().status, FieldStatus::Loading);

        assert!(matches!(
            field.submit("XYZ999").await,
            Err(ScanError::InvalidState { .. })
        ));
        assert!(!field.set_value("XYZ999"));

        assert!(first.await.unwrap().is_ok());
        assert_eq!(consumer.calls.lock().as_slice(), &["ABC123".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_submit_does_not_stay_loading() {
        let consumer = Arc::new(CatalogConsumer {
            delay: Duration::from_secs(10),
            ..CatalogConsumer::new(vec!["ABC123", "XYZ999"])
        });
        let field = field(consumer.clone());

        let abandoned = tokio::time::timeout(Duration::from_millis(100), field.submit("ABC123")).await;
        assert!(abandoned.is_err());

        let view = field.view();
        assert_eq!(view.status, FieldStatus::Idle);
        assert_eq!(view.value, "ABC123");

        let event = field.submit("XYZ999").await.unwrap();
        assert_eq!(event.code, "XYZ999");
        assert_eq!(field.view().status, FieldStatus::Success);
        assert_eq!(
            consumer.calls.lock().as_slice(),
            &["ABC123".to_string(), "XYZ999".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_keystrokes_into_field() {
        let consumer = Arc::new(CatalogConsumer::new(vec!["A1B2"]));
        let field = field(consumer);

        for ch in "A1B2".chars() {
            assert!(field.handle_key(KeyInput::new(Key::Char(ch))).await.is_none());
        }
        assert_eq!(field.view().value, "A1B2");

        let result = field.handle_key(KeyInput::new(Key::Enter)).await;
        assert_eq!(result.unwrap().unwrap().code, "A1B2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_discards_pending_timer() {
        let consumer = Arc::new(CatalogConsumer::new(vec![]));
        let field = field(consumer);

        let _ = field.submit("ab").await;
        field.reset();
        assert_eq!(field.view(), FieldView::default());

        field.set_value("typed");
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(field.view().value, "typed");
        assert_eq!(field.view().status, FieldStatus::Idle);
    }
}
