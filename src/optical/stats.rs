use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use super::decoder::CodeFormat;

/// Diagnostics for one processed frame, handed to `on_scan_attempt`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanAttempt {
    pub frame_number: u64,
    pub has_result: bool,
    pub result: Option<String>,
    pub format: Option<CodeFormat>,
    /// Decode attempts during the last sampling window
    pub attempts_per_second: f64,
}

/// Rolling decode-attempt statistics
#[derive(Debug, Clone)]
pub struct AttemptStats {
    window: Duration,
    samples: VecDeque<Instant>,
    pub frames_processed: u64,
    pub results: u64,
    pub last_result: Option<String>,
    pub last_format: Option<CodeFormat>,
}

impl AttemptStats {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            frames_processed: 0,
            results: 0,
            last_result: None,
            last_format: None,
        }
    }

    /// Record an attempt and return the current rate
    pub fn record(&mut self, now: Instant, result: Option<(&str, CodeFormat)>) -> f64 {
        self.frames_processed += 1;
        if let Some((code, format)) = result {
            self.results += 1;
            self.last_result = Some(code.to_string());
            self.last_format = Some(format);
        }

        self.samples.push_back(now);
        while let Some(oldest) = self.samples.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        self.rate()
    }

    pub fn rate(&self) -> f64 {
        self.samples.len() as f64 / self.window.as_secs_f64()
    }

    pub fn hit_ratio(&self) -> f64 {
        if self.frames_processed > 0 {
            self.results as f64 / self.frames_processed as f64
        } else {
            0.0
        }
    }
}

impl Default for AttemptStats {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_over_window() {
        let start = Instant::now();
        let mut stats = AttemptStats::default();

        for i in 0..30 {
            stats.record(start + Duration::from_millis(i * 33), None);
        }
        assert_eq!(stats.rate(), 30.0);

        // samples older than a second fall out
        let rate = stats.record(start + Duration::from_millis(1500), Some(("ABC123", CodeFormat::QrCode)));
        assert!(rate < 30.0);
        assert_eq!(stats.frames_processed, 31);
        assert_eq!(stats.last_result.as_deref(), Some("ABC123"));
        assert_eq!(stats.last_format, Some(CodeFormat::QrCode));
    }

    #[test]
    fn test_hit_ratio() {
        let now = Instant::now();
        let mut stats = AttemptStats::default();
        assert_eq!(stats.hit_ratio(), 0.0);
        stats.record(now, None);
        stats.record(now, Some(("X1", CodeFormat::Ean8)));
        assert_eq!(stats.hit_ratio(), 0.5);
    }
}
