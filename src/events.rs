use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::optical::CodeFormat;
use crate::session::SessionStateKind;

/// Where a scanned code came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanSource {
    /// Keyboard-wedge scanner or manual entry
    Hardware,
    /// Decoded from the camera feed
    Camera,
}

/// A validated code on its way to the consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub code: String,
    pub source: ScanSource,
    /// Symbology of the decoded code, camera scans only
    pub format: Option<CodeFormat>,
    pub observed_at: DateTime<Utc>,
}

impl ScanEvent {
    pub fn hardware<S: Into<String>>(code: S) -> Self {
        Self {
            code: code.into(),
            source: ScanSource::Hardware,
            format: None,
            observed_at: Utc::now(),
        }
    }

    pub fn camera<S: Into<String>>(code: S, format: CodeFormat) -> Self {
        Self {
            code: code.into(),
            source: ScanSource::Camera,
            format: Some(format),
            observed_at: Utc::now(),
        }
    }
}

/// Notifications published while a capture session runs
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// The session moved to a new state
    StateChanged {
        session_id: String,
        state: SessionStateKind,
    },
    /// A camera device was bound to the session
    DeviceSelected { device_id: String, label: String },
    /// A scan entered processing and was handed to the consumer
    ScanAccepted { event: ScanEvent },
    /// A scan arrived while another one was in flight or outside a scanning state
    ScanDiscarded { code: String, reason: String },
    /// The consumer rejected a scan or it failed validation in processing
    ScanFailed { code: String, message: String },
    /// Keystroke or field input did not pass validation
    ValidationFailed { source: ScanSource, message: String },
    /// A device or permission failure ended the session
    DeviceFailed { message: String },
    /// The session was torn down
    Closed { session_id: String },
}

impl PipelineEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            PipelineEvent::StateChanged { session_id, state } => {
                format!("Session {} is now {:?}", session_id, state)
            }
            PipelineEvent::DeviceSelected { device_id, label } => {
                format!("Device selected: {} ({})", label, device_id)
            }
            PipelineEvent::ScanAccepted { event } => {
                format!("Scan accepted: {} ({:?})", event.code, event.source)
            }
            PipelineEvent::ScanDiscarded { code, reason } => {
                format!("Scan discarded: {} ({})", code, reason)
            }
            PipelineEvent::ScanFailed { code, message } => {
                format!("Scan failed: {} ({})", code, message)
            }
            PipelineEvent::ValidationFailed { source, message } => {
                format!("Invalid {:?} input: {}", source, message)
            }
            PipelineEvent::DeviceFailed { message } => format!("Device failure: {}", message),
            PipelineEvent::Closed { session_id } => format!("Session {} closed", session_id),
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::StateChanged { .. } => "state_changed",
            PipelineEvent::DeviceSelected { .. } => "device_selected",
            PipelineEvent::ScanAccepted { .. } => "scan_accepted",
            PipelineEvent::ScanDiscarded { .. } => "scan_discarded",
            PipelineEvent::ScanFailed { .. } => "scan_failed",
            PipelineEvent::ValidationFailed { .. } => "validation_failed",
            PipelineEvent::DeviceFailed { .. } => "device_failed",
            PipelineEvent::Closed { .. } => "closed",
        }
    }
}

/// Broadcast bus carrying [`PipelineEvent`]s to any number of observers
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Publishing with no subscribers is not an error; the event is dropped.
    pub fn publish(&self, event: PipelineEvent) -> usize {
        match &event {
            PipelineEvent::ScanAccepted { event } => {
                info!("Scan accepted: {} ({:?})", event.code, event.source);
            }
            PipelineEvent::ScanFailed { code, message } => {
                warn!("Scan {} failed: {}", code, message);
            }
            PipelineEvent::DeviceFailed { message } => {
                error!("Device failure: {}", message);
            }
            _ => debug!("Event: {}", event.description()),
        }

        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let delivered = bus.publish(PipelineEvent::ScanAccepted {
            event: ScanEvent::hardware("7501234567890"),
        });
        assert_eq!(delivered, 1);

        match rx.recv().await.unwrap() {
            PipelineEvent::ScanAccepted { event } => {
                assert_eq!(event.code, "7501234567890");
                assert_eq!(event.source, ScanSource::Hardware);
                assert!(event.format.is_none());
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        assert_eq!(
            bus.publish(PipelineEvent::Closed {
                session_id: "s".to_string()
            }),
            0
        );
    }

    #[test]
    fn test_scan_event_serializes() {
        let event = ScanEvent::camera("ABC123", CodeFormat::QrCode);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["code"], "ABC123");
        assert_eq!(json["source"], "camera");
    }
}
