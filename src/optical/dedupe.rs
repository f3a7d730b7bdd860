use std::time::Duration;
use tokio::time::Instant;

/// Suppresses a code repeated inside the window; a different code always passes
#[derive(Debug, Clone)]
pub struct DuplicateFilter {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl DuplicateFilter {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record `code` seen at `now` and report whether it should be forwarded
    pub fn admit(&mut self, code: &str, now: Instant) -> bool {
        if let Some((last_code, at)) = &self.last {
            if last_code == code && now.saturating_duration_since(*at) < self.window {
                return false;
            }
        }

        self.last = Some((code.to_string(), now));
        true
    }

    pub fn last_code(&self) -> Option<&str> {
        self.last.as_ref().map(|(code, _)| code.as_str())
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
