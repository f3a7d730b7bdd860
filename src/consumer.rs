//! The host application's side of the pipeline.

use async_trait::async_trait;

use crate::error::{ConsumerError, DeviceError, ValidationError};
use crate::events::{ScanEvent, ScanSource};
use crate::optical::ScanAttempt;

/// Callbacks supplied by the application hosting a capture session.
///
/// `on_scan` is where the host looks the product up; the pipeline only cares
/// whether it resolves or rejects.
#[async_trait]
pub trait ScanConsumer: Send + Sync {
    /// Handle one accepted scan. Called at most once per scan.
    async fn on_scan(&self, event: &ScanEvent) -> Result<(), ConsumerError>;

    /// Device or permission failure; the session has already been torn down.
    fn on_error(&self, _error: &DeviceError) {}

    /// Per-frame decode diagnostics from the camera path.
    fn on_scan_attempt(&self, _attempt: &ScanAttempt) {}

    /// The session closed itself after a successful scan.
    fn on_close(&self) {}
}

/// Intake side of a capture session; input sources push their results here.
pub trait ScanSink: Send + Sync {
    /// A validated code ready for processing
    fn submit(&self, event: ScanEvent);

    /// Input that finished but did not pass validation
    fn report_invalid(&self, source: ScanSource, error: ValidationError);
}
