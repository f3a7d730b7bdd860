use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::optical::SymbologySet;
use crate::validation::LengthBounds;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PoscanConfig {
    pub scanner: ScannerConfig,
    pub keystroke: KeystrokeConfig,
    pub session: SessionConfig,
    pub camera: CameraConfig,
    pub system: SystemConfig,
}

/// Consumer-facing scanner options
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScannerConfig {
    /// Decode QR / DataMatrix / Aztec codes
    #[serde(default = "default_enable_matrix_codes")]
    pub enable_matrix_codes: bool,

    /// Decode 1D codes (EAN, UPC)
    #[serde(default = "default_enable_linear_codes")]
    pub enable_linear_codes: bool,

    /// Duplicate suppression window for keystroke scans, doubled for the camera
    #[serde(default = "default_scan_delay_ms")]
    pub scan_delay_ms: u64,

    /// Minimum accepted code length
    #[serde(default = "default_min_length")]
    pub min_length: usize,

    /// Maximum accepted code length
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Tear the session down after the first successful scan
    #[serde(default = "default_auto_close_on_success")]
    pub auto_close_on_success: bool,

    /// Delay between success and teardown when auto-close is on
    #[serde(default = "default_auto_close_delay_ms")]
    pub auto_close_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct KeystrokeConfig {
    /// Quiet period after the last keystroke before a burst is classified
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,

    /// Mean inter-key interval below which a burst counts as scanner input
    #[serde(default = "default_scanner_interval_ms")]
    pub scanner_interval_ms: u64,

    /// Number of keystroke timestamps kept for classification
    #[serde(default = "default_timestamp_window")]
    pub timestamp_window: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// How long an error stays visible before scanning resumes
    #[serde(default = "default_error_display_ms")]
    pub error_display_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Device id to use; the default device is picked when unset
    pub device: Option<String>,

    /// Capture resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Label fragments marking a rear-facing camera
    #[serde(default = "default_preferred_labels")]
    pub preferred_labels: Vec<String>,

    /// Try a rotated decode every N frames without a result (0 disables)
    #[serde(default = "default_rotation_fallback_interval")]
    pub rotation_fallback_interval: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Frames queued between the camera and the decoder before dropping
    #[serde(default = "default_frame_queue_capacity")]
    pub frame_queue_capacity: usize,
}

impl PoscanConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("poscan.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("scanner.enable_matrix_codes", default_enable_matrix_codes())?
            .set_default("scanner.enable_linear_codes", default_enable_linear_codes())?
            .set_default("scanner.scan_delay_ms", default_scan_delay_ms())?
            .set_default("scanner.min_length", default_min_length() as i64)?
            .set_default("scanner.max_length", default_max_length() as i64)?
            .set_default(
                "scanner.auto_close_on_success",
                default_auto_close_on_success(),
            )?
            .set_default("scanner.auto_close_delay_ms", default_auto_close_delay_ms())?
            .set_default(
                "keystroke.inactivity_timeout_ms",
                default_inactivity_timeout_ms(),
            )?
            .set_default("keystroke.scanner_interval_ms", default_scanner_interval_ms())?
            .set_default(
                "keystroke.timestamp_window",
                default_timestamp_window() as i64,
            )?
            .set_default("session.error_display_ms", default_error_display_ms())?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.preferred_labels", default_preferred_labels())?
            .set_default(
                "camera.rotation_fallback_interval",
                default_rotation_fallback_interval(),
            )?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "system.frame_queue_capacity",
                default_frame_queue_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            // POSCAN_SCANNER__SCAN_DELAY_MS=500
            .add_source(
                Environment::with_prefix("POSCAN")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: PoscanConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scanner.min_length == 0 {
            return Err(ConfigError::Message(
                "Scanner min_length must be greater than 0".to_string(),
            ));
        }

        if self.scanner.min_length > self.scanner.max_length {
            return Err(ConfigError::Message(format!(
                "Scanner min_length ({}) must not exceed max_length ({})",
                self.scanner.min_length, self.scanner.max_length
            )));
        }

        if !self.scanner.enable_matrix_codes && !self.scanner.enable_linear_codes {
            return Err(ConfigError::Message(
                "At least one of enable_matrix_codes / enable_linear_codes must be set"
                    .to_string(),
            ));
        }

        if self.keystroke.inactivity_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Keystroke inactivity_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.keystroke.timestamp_window < 2 {
            return Err(ConfigError::Message(
                "Keystroke timestamp_window must keep at least 2 timestamps".to_string(),
            ));
        }

        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.frame_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Frame queue capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl ScannerConfig {
    pub fn symbologies(&self) -> SymbologySet {
        SymbologySet {
            linear: self.enable_linear_codes,
            matrix: self.enable_matrix_codes,
        }
    }

    pub fn length_bounds(&self) -> LengthBounds {
        LengthBounds::new(self.min_length, self.max_length)
    }

    /// Duplicate window on the keystroke path
    pub fn scan_delay(&self) -> Duration {
        Duration::from_millis(self.scan_delay_ms)
    }

    /// Duplicate window on the camera path
    pub fn camera_scan_delay(&self) -> Duration {
        Duration::from_millis(self.scan_delay_ms.saturating_mul(2))
    }

    pub fn auto_close_delay(&self) -> Duration {
        Duration::from_millis(self.auto_close_delay_ms)
    }
}

impl KeystrokeConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    pub fn scanner_interval(&self) -> Duration {
        Duration::from_millis(self.scanner_interval_ms)
    }
}

impl SessionConfig {
    pub fn error_display(&self) -> Duration {
        Duration::from_millis(self.error_display_ms)
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enable_matrix_codes: default_enable_matrix_codes(),
            enable_linear_codes: default_enable_linear_codes(),
            scan_delay_ms: default_scan_delay_ms(),
            min_length: default_min_length(),
            max_length: default_max_length(),
            auto_close_on_success: default_auto_close_on_success(),
            auto_close_delay_ms: default_auto_close_delay_ms(),
        }
    }
}

impl Default for KeystrokeConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: default_inactivity_timeout_ms(),
            scanner_interval_ms: default_scanner_interval_ms(),
            timestamp_window: default_timestamp_window(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            error_display_ms: default_error_display_ms(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: None,
            resolution: default_camera_resolution(),
            fps: default_camera_fps(),
            preferred_labels: default_preferred_labels(),
            rotation_fallback_interval: default_rotation_fallback_interval(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
            frame_queue_capacity: default_frame_queue_capacity(),
        }
    }
}

impl Default for PoscanConfig {
    fn default() -> Self {
        Self {
            scanner: ScannerConfig::default(),
            keystroke: KeystrokeConfig::default(),
            session: SessionConfig::default(),
            camera: CameraConfig::default(),
            system: SystemConfig::default(),
        }
    }
}

// Default value functions
fn default_enable_matrix_codes() -> bool {
    true
}
fn default_enable_linear_codes() -> bool {
    true
}
fn default_scan_delay_ms() -> u64 {
    300
}
fn default_min_length() -> usize {
    3
}
fn default_max_length() -> usize {
    50
}
fn default_auto_close_on_success() -> bool {
    false
}
fn default_auto_close_delay_ms() -> u64 {
    1000
}

fn default_inactivity_timeout_ms() -> u64 {
    100
}
fn default_scanner_interval_ms() -> u64 {
    50
}
fn default_timestamp_window() -> usize {
    10
}

fn default_error_display_ms() -> u64 {
    2000
}

fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_camera_fps() -> u32 {
    30
}
fn default_preferred_labels() -> Vec<String> {
    ["back", "rear", "environment", "trasera"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_rotation_fallback_interval() -> u32 {
    15
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_frame_queue_capacity() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PoscanConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scanner.scan_delay(), Duration::from_millis(300));
        assert_eq!(config.scanner.camera_scan_delay(), Duration::from_millis(600));
        assert_eq!(config.keystroke.timestamp_window, 10);
        assert_eq!(config.session.error_display(), Duration::from_millis(2000));
    }

    #[test]
    fn test_config_validation() {
        let mut config = PoscanConfig::default();

        config.scanner.min_length = 10;
        config.scanner.max_length = 5;
        assert!(config.validate().is_err());

        config.scanner.max_length = 50;
        assert!(config.validate().is_ok());

        config.scanner.enable_linear_codes = false;
        config.scanner.enable_matrix_codes = false;
        assert!(config.validate().is_err());

        config.scanner.enable_linear_codes = true;
        config.camera.fps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[scanner]
scan_delay_ms = 500
auto_close_on_success = true

[camera]
device = "/dev/video2"
"#
        )
        .unwrap();

        let config = PoscanConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.scanner.scan_delay_ms, 500);
        assert!(config.scanner.auto_close_on_success);
        assert_eq!(config.scanner.min_length, 3);
        assert_eq!(config.camera.device.as_deref(), Some("/dev/video2"));
        assert_eq!(config.camera.resolution, (640, 480));
        assert_eq!(config.camera.preferred_labels.len(), 4);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = PoscanConfig::load_from_file("/nonexistent/poscan-test.toml").unwrap();
        assert_eq!(config.scanner.max_length, 50);
        assert_eq!(config.keystroke.inactivity_timeout_ms, 100);
    }
}
